//! End-to-end co-signing walkthrough.
//!
//! Alice proposes a coin transfer that needs both Alice and Bob. Each of them
//! adds a detached proof in a later block, then the deferred transaction is
//! executed and the balances move.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;

use cosigned::contracts::coin::{ARG_COINS, ARG_DESTINATION};
use cosigned::contracts::deferred::{
    ARG_EXPIRE_BLOCK_INDEX, ARG_IDENTITY, ARG_INDEX, ARG_PROPOSED_TRANSACTION, ARG_SIGNATURE,
    CMD_ADD_PROOF, CMD_EXEC_PROPOSED_TX,
};
use cosigned::{
    hash_data, Arguments, ClientTransaction, CoinContract, CoinData, DeferredContract,
    DeferredData, ExecutionContext, Identity, InstanceId, Instruction, InstructionProcessor,
    MemoryState, NodeConfig, Rule, Scheme, Signer, WireFormat,
};

/// Load the configuration, or defaults when no path is given
pub fn load_config(path: Option<&str>) -> Result<NodeConfig> {
    match path {
        Some(path) => NodeConfig::load(Path::new(path))
            .with_context(|| format!("loading config from {path}")),
        None => Ok(NodeConfig::default()),
    }
}

/// Run the walkthrough
pub fn run(config: &NodeConfig) -> Result<()> {
    let registry = config.build_registry()?;
    for required in [DeferredContract::ID, CoinContract::ID] {
        if !registry.contains(required) {
            bail!("demo needs the {required} contract registered");
        }
    }

    let alice = Signer::generate(Scheme::Ed25519);
    let bob = Signer::generate(Scheme::Ed25519);
    let (alice_id, bob_id) = (Identity::from_signer(&alice), Identity::from_signer(&bob));

    let domain = hash_data(b"demo-domain");
    let mut policy = config.build_policy()?;
    policy.set_rule(domain, "spawn:deferred", Rule::any_of(vec![alice_id.clone()]));
    policy.set_rule(
        domain,
        "invoke:deferred.addProof",
        Rule::any_of(vec![alice_id.clone(), bob_id.clone()]),
    );
    policy.set_rule(
        domain,
        "invoke:deferred.execProposedTx",
        Rule::any_of(vec![alice_id.clone()]),
    );
    policy.set_rule(domain, "invoke:coin.transfer", Rule::all_of(vec![alice_id, bob_id]));

    let processor = InstructionProcessor::new(ExecutionContext::new(
        Arc::new(registry),
        Arc::new(policy),
    ));

    let root = hash_data(b"demo-root");
    let (from, to) = (hash_data(b"demo-coin-a"), hash_data(b"demo-coin-b"));
    let mut state = MemoryState::new();
    state.insert(root, "darc", Vec::new(), domain);
    state.insert(from, CoinContract::ID, CoinData { value: 100 }.to_wire(), domain);
    state.insert(to, CoinContract::ID, CoinData::default().to_wire(), domain);

    let proposed = ClientTransaction::new(vec![Instruction::invoke(
        from,
        CoinContract::ID,
        "transfer",
        Arguments::new()
            .with(ARG_COINS, 25u64.to_le_bytes().to_vec())
            .with(ARG_DESTINATION, to.to_vec()),
    )]);

    state.set_index(1);
    let spawn = Instruction::spawn(
        root,
        DeferredContract::ID,
        Arguments::new()
            .with(ARG_PROPOSED_TRANSACTION, proposed.to_wire())
            .with(ARG_EXPIRE_BLOCK_INDEX, b"100".to_vec()),
    );
    let changes = submit(&processor, &mut state, spawn, &alice)?;
    let deferred = changes
        .first()
        .map(|c| c.instance_id)
        .context("spawn produced no instance")?;
    let hash = read_deferred(&state, &deferred)?
        .instruction_hashes
        .first()
        .copied()
        .context("proposal has no instructions")?;
    info!(instance = %deferred, %hash, "Proposal stored, waiting for proofs");

    for (index, signer) in [(10, &alice), (12, &bob)] {
        state.set_index(index);
        let proof = Instruction::invoke(
            deferred,
            DeferredContract::ID,
            CMD_ADD_PROOF,
            Arguments::new()
                .with(ARG_INDEX, 0u32.to_le_bytes().to_vec())
                .with(ARG_IDENTITY, Identity::from_signer(signer).to_wire())
                .with(ARG_SIGNATURE, signer.sign(hash.as_bytes())?),
        );
        submit(&processor, &mut state, proof, signer)?;
    }

    state.set_index(20);
    let exec = Instruction::invoke(
        deferred,
        DeferredContract::ID,
        CMD_EXEC_PROPOSED_TX,
        Arguments::new(),
    );
    let changes = submit(&processor, &mut state, exec, &alice)?;

    let data = read_deferred(&state, &deferred)?;
    let (from_balance, to_balance) = (balance(&state, &from)?, balance(&state, &to)?);
    info!(
        from = from_balance,
        to = to_balance,
        remaining_executions = data.num_execution,
        exec_result = ?data.exec_result,
        "Deferred transaction executed"
    );
    println!("{}", serde_json::to_string_pretty(&changes)?);
    Ok(())
}

fn submit(
    processor: &InstructionProcessor,
    state: &mut MemoryState,
    inst: Instruction,
    signer: &Signer,
) -> Result<Vec<cosigned::StateChange>> {
    let mut tx = ClientTransaction::new(vec![inst]);
    tx.sign_with(&[signer])?;
    Ok(processor.execute_transaction(state, &tx)?)
}

fn read_deferred(state: &MemoryState, id: &InstanceId) -> Result<DeferredData> {
    let value = state.get(id).context("deferred instance missing")?;
    Ok(DeferredData::from_wire(&value.data)?)
}

fn balance(state: &MemoryState, id: &InstanceId) -> Result<u64> {
    let value = state.get(id).context("coin instance missing")?;
    Ok(CoinData::from_wire(&value.data)?.value)
}
