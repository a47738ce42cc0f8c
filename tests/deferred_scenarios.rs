//! Deferred transaction scenarios driven through the instruction processor.
//!
//! Each test submits a sequence of discrete client transactions against an
//! in-memory ledger, advancing the block index between them, and checks the
//! resulting state and errors.

use std::sync::Arc;

use cosigned::contracts::coin::{ARG_COINS, ARG_DESTINATION};
use cosigned::contracts::deferred::{
    ARG_EXPIRE_BLOCK_INDEX, ARG_IDENTITY, ARG_INDEX, ARG_NUM_EXECUTION,
    ARG_PROPOSED_TRANSACTION, ARG_SIGNATURE, CMD_ADD_PROOF, CMD_EXEC_PROPOSED_TX,
};
use cosigned::{
    hash_data, Arguments, ClientTransaction, CoinContract, CoinData, ContractError,
    ContractRegistry, ContractResult, DeferredContract, DeferredData, DomainId, ErrorClass,
    ExecutionContext, Hash, Identity, InstanceId, Instruction, InstructionProcessor, MemoryState,
    Rule, RulePolicy, Scheme, Signer, StateAction, StateChange, WireFormat,
};

/// In-memory ledger with three coins and three co-signers
struct Ledger {
    processor: InstructionProcessor,
    state: MemoryState,
    signers: Vec<Signer>,
    root: InstanceId,
    coins: [InstanceId; 3],
}

impl Ledger {
    /// `transfer_threshold` of the three signers must prove a coin transfer
    fn new(transfer_threshold: usize) -> Self {
        let signers: Vec<Signer> = (1..=3u8)
            .map(|i| Signer::from_seed(Scheme::Ed25519, &[i; 32]))
            .collect();
        let ids: Vec<Identity> = signers.iter().map(Identity::from_signer).collect();
        let domain: DomainId = hash_data(b"ledger-domain");

        let mut policy = RulePolicy::new();
        for action in [
            "spawn:deferred",
            "invoke:deferred.addProof",
            "invoke:deferred.execProposedTx",
            "delete:deferred",
        ] {
            policy.set_rule(domain, action, Rule::any_of(ids.clone()));
        }
        policy.set_rule(
            domain,
            "invoke:coin.transfer",
            Rule::threshold(transfer_threshold, ids),
        );

        let root = hash_data(b"root");
        let coins = [hash_data(b"coin-0"), hash_data(b"coin-1"), hash_data(b"coin-2")];
        let mut state = MemoryState::new();
        state.insert(root, "darc", Vec::new(), domain);
        state.insert(coins[0], CoinContract::ID, CoinData { value: 100 }.to_wire(), domain);
        for coin in &coins[1..] {
            state.insert(*coin, CoinContract::ID, CoinData::default().to_wire(), domain);
        }

        let ctx = ExecutionContext::new(
            Arc::new(ContractRegistry::with_builtins()),
            Arc::new(policy),
        );
        Self {
            processor: InstructionProcessor::new(ctx),
            state,
            signers,
            root,
            coins,
        }
    }

    fn at(&mut self, index: u64) -> &mut Self {
        self.state.set_index(index);
        self
    }

    fn submit_as(&mut self, signer: usize, inst: Instruction) -> ContractResult<Vec<StateChange>> {
        let mut tx = ClientTransaction::new(vec![inst]);
        tx.sign_with(&[&self.signers[signer]]).unwrap();
        self.processor.execute_transaction(&mut self.state, &tx)
    }

    fn spawn_deferred(
        &mut self,
        proposed: &ClientTransaction,
        expire: u64,
        num_execution: Option<u64>,
    ) -> InstanceId {
        let mut args = Arguments::new()
            .with(ARG_PROPOSED_TRANSACTION, proposed.to_wire())
            .with(ARG_EXPIRE_BLOCK_INDEX, expire.to_string().into_bytes());
        if let Some(n) = num_execution {
            args = args.with(ARG_NUM_EXECUTION, n.to_string().into_bytes());
        }
        let changes = self
            .submit_as(0, Instruction::spawn(self.root, DeferredContract::ID, args))
            .unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, StateAction::Create);
        changes[0].instance_id
    }

    fn proof_instruction(
        id: InstanceId,
        index: u32,
        identity: &Identity,
        signature: Vec<u8>,
    ) -> Instruction {
        Instruction::invoke(
            id,
            DeferredContract::ID,
            CMD_ADD_PROOF,
            Arguments::new()
                .with(ARG_INDEX, index.to_le_bytes().to_vec())
                .with(ARG_IDENTITY, identity.to_wire())
                .with(ARG_SIGNATURE, signature),
        )
    }

    /// `signer` signs `instruction_hashes[index]` and submits the proof
    fn add_proof(
        &mut self,
        id: InstanceId,
        index: u32,
        signer: usize,
    ) -> ContractResult<Vec<StateChange>> {
        let hash = self.deferred(&id).instruction_hashes[index as usize];
        let identity = Identity::from_signer(&self.signers[signer]);
        let signature = self.signers[signer].sign(hash.as_bytes()).unwrap();
        self.submit_as(signer, Self::proof_instruction(id, index, &identity, signature))
    }

    fn exec_instruction(id: InstanceId) -> Instruction {
        Instruction::invoke(id, DeferredContract::ID, CMD_EXEC_PROPOSED_TX, Arguments::new())
    }

    fn exec(&mut self, id: InstanceId) -> ContractResult<Vec<StateChange>> {
        self.submit_as(0, Self::exec_instruction(id))
    }

    fn deferred(&self, id: &InstanceId) -> DeferredData {
        DeferredData::from_wire(&self.state.get(id).unwrap().data).unwrap()
    }

    fn balance(&self, coin: usize) -> u64 {
        CoinData::from_wire(&self.state.get(&self.coins[coin]).unwrap().data)
            .unwrap()
            .value
    }

    fn transfer(&self, from: usize, to: usize, coins: u64) -> Instruction {
        Instruction::invoke(
            self.coins[from],
            CoinContract::ID,
            "transfer",
            Arguments::new()
                .with(ARG_COINS, coins.to_le_bytes().to_vec())
                .with(ARG_DESTINATION, self.coins[to].to_vec()),
        )
    }
}

#[test]
fn test_coin_transfer_scenario() {
    let mut ledger = Ledger::new(1);
    let proposed = ClientTransaction::new(vec![ledger.transfer(0, 1, 30)]);
    let id = ledger.at(1).spawn_deferred(&proposed, 100, Some(1));

    let spawned = ledger.deferred(&id);
    assert_eq!(spawned.instruction_hashes.len(), 1);
    assert_eq!(spawned.num_execution, 1);
    assert!(spawned.exec_result.is_empty());

    ledger.at(10).add_proof(id, 0, 0).unwrap();

    let changes = ledger.at(20).exec(id).unwrap();
    // two coin updates from the transfer, then the deferred instance
    assert_eq!(changes.len(), 3);
    assert!(changes[..2].iter().all(|c| c.contract_id == CoinContract::ID));
    assert_eq!(changes[2].instance_id, id);
    assert_eq!(ledger.balance(0), 70);
    assert_eq!(ledger.balance(1), 30);

    let after = ledger.deferred(&id);
    assert_eq!(after.num_execution, 0);
    assert_eq!(after.exec_result.len(), 1);
    assert_eq!(
        after.exec_result[0],
        after.proposed_transaction.instructions[0].derive_id("")
    );
    assert_eq!(after.instruction_hashes, spawned.instruction_hashes);

    let err = ledger.at(21).exec(id).unwrap_err();
    assert_eq!(err.to_string(), "execution ceiling reached");
    assert_eq!(ledger.balance(0), 70);
}

#[test]
fn test_expired_scenario() {
    let mut ledger = Ledger::new(1);
    let proposed = ClientTransaction::new(vec![ledger.transfer(0, 1, 30)]);
    let id = ledger.at(1).spawn_deferred(&proposed, 5, Some(1));
    ledger.at(3).add_proof(id, 0, 0).unwrap();

    let err = ledger.at(20).exec(id).unwrap_err();
    assert!(matches!(err, ContractError::Expired { current: 20, expire: 5 }));
    assert!(err.to_string().starts_with("expired"));
    assert_eq!(err.class(), ErrorClass::Policy);
    assert_eq!(ledger.deferred(&id).num_execution, 1);
    assert_eq!(ledger.balance(0), 100);
}

#[test]
fn test_expiry_applies_regardless_of_executions_left() {
    let mut ledger = Ledger::new(1);
    let proposed = ClientTransaction::new(vec![ledger.transfer(0, 1, 1)]);
    let id = ledger.at(1).spawn_deferred(&proposed, 10, Some(5));

    assert!(matches!(
        ledger.at(11).add_proof(id, 0, 0),
        Err(ContractError::Expired { .. })
    ));
    // the expiry block itself is still accepted
    ledger.at(10).add_proof(id, 0, 0).unwrap();
}

#[test]
fn test_duplicate_proof_leaves_state() {
    let mut ledger = Ledger::new(2);
    let proposed = ClientTransaction::new(vec![ledger.transfer(0, 1, 30)]);
    let id = ledger.at(1).spawn_deferred(&proposed, 100, None);
    ledger.at(2).add_proof(id, 0, 1).unwrap();

    let before = ledger.state.get(&id).cloned().unwrap();
    let err = ledger.at(3).add_proof(id, 0, 1).unwrap_err();
    assert!(err.to_string().starts_with("duplicate proof"));
    assert_eq!(ledger.state.get(&id), Some(&before));
}

#[test]
fn test_proof_index_out_of_range() {
    let mut ledger = Ledger::new(1);
    let proposed = ClientTransaction::new(vec![ledger.transfer(0, 1, 30)]);
    let id = ledger.at(1).spawn_deferred(&proposed, 100, None);

    let signer = &ledger.signers[0];
    let identity = Identity::from_signer(signer);
    let signature = signer.sign(b"anything").unwrap();
    let inst = Ledger::proof_instruction(id, 1, &identity, signature);
    assert!(matches!(
        ledger.at(2).submit_as(0, inst),
        Err(ContractError::IndexOutOfRange { index: 1, len: 1 })
    ));
}

#[test]
fn test_bad_signature_rejected() {
    let mut ledger = Ledger::new(1);
    let proposed = ClientTransaction::new(vec![ledger.transfer(0, 1, 30)]);
    let id = ledger.at(1).spawn_deferred(&proposed, 100, None);

    // signed by signer 1, presented as signer 0
    let identity = Identity::from_signer(&ledger.signers[0]);
    let hash = ledger.deferred(&id).instruction_hashes[0];
    let signature = ledger.signers[1].sign(hash.as_bytes()).unwrap();
    let inst = Ledger::proof_instruction(id, 0, &identity, signature);
    let err = ledger.at(2).submit_as(0, inst).unwrap_err();
    assert!(err.to_string().starts_with("bad signature"));
}

#[test]
fn test_proof_not_replayable_across_instances() {
    let mut ledger = Ledger::new(1);
    let proposed = ClientTransaction::new(vec![ledger.transfer(0, 1, 30)]);
    let first = ledger.at(1).spawn_deferred(&proposed, 100, None);
    let second = ledger.spawn_deferred(&proposed, 101, None);
    assert_ne!(first, second);

    let first_hash = ledger.deferred(&first).instruction_hashes[0];
    assert_ne!(first_hash, ledger.deferred(&second).instruction_hashes[0]);

    let identity = Identity::from_signer(&ledger.signers[0]);
    let signature = ledger.signers[0].sign(first_hash.as_bytes()).unwrap();
    let replay = Ledger::proof_instruction(second, 0, &identity, signature);
    assert!(matches!(
        ledger.at(2).submit_as(0, replay),
        Err(ContractError::BadSignature(_))
    ));
}

#[test]
fn test_two_of_three_needs_both_proofs() {
    let mut ledger = Ledger::new(2);
    let proposed = ClientTransaction::new(vec![ledger.transfer(0, 2, 40)]);
    let id = ledger.at(1).spawn_deferred(&proposed, 100, None);

    ledger.at(2).add_proof(id, 0, 0).unwrap();
    let err = ledger.at(3).exec(id).unwrap_err();
    assert!(matches!(err, ContractError::VerificationFailed { index: 0, .. }));
    assert!(err.to_string().starts_with("instruction verification failed: "));
    assert_eq!(err.class(), ErrorClass::Dependency);
    assert_eq!(ledger.deferred(&id).num_execution, 1);
    assert_eq!(ledger.balance(0), 100);

    ledger.at(4).add_proof(id, 0, 2).unwrap();
    ledger.at(5).exec(id).unwrap();
    assert_eq!(ledger.balance(0), 60);
    assert_eq!(ledger.balance(2), 40);
}

#[test]
fn test_batch_is_all_or_nothing() {
    let mut ledger = Ledger::new(1);
    let proposed =
        ClientTransaction::new(vec![ledger.transfer(0, 1, 60), ledger.transfer(0, 2, 60)]);
    let id = ledger.at(1).spawn_deferred(&proposed, 100, None);
    ledger.at(2).add_proof(id, 0, 0).unwrap();
    ledger.at(3).add_proof(id, 1, 0).unwrap();

    let before = ledger.state.get(&id).cloned().unwrap();
    let err = ledger.at(4).exec(id).unwrap_err();
    match err {
        ContractError::ExecutionFailed { index, source } => {
            assert_eq!(index, 1);
            assert!(matches!(*source, ContractError::InsufficientBalance { need: 60, have: 40 }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(ledger.balance(0), 100);
    assert_eq!(ledger.balance(1), 0);
    assert_eq!(ledger.state.get(&id), Some(&before));
}

#[test]
fn test_later_instructions_see_earlier_effects() {
    let mut ledger = Ledger::new(1);
    let proposed =
        ClientTransaction::new(vec![ledger.transfer(0, 1, 60), ledger.transfer(1, 2, 25)]);
    let id = ledger.at(1).spawn_deferred(&proposed, 100, None);
    ledger.at(2).add_proof(id, 0, 0).unwrap();
    ledger.at(2).add_proof(id, 1, 1).unwrap();

    let changes = ledger.at(3).exec(id).unwrap();
    assert_eq!(changes.len(), 5);
    assert_eq!(ledger.balance(0), 40);
    assert_eq!(ledger.balance(1), 35);
    assert_eq!(ledger.balance(2), 25);
    assert_eq!(ledger.deferred(&id).exec_result.len(), 2);
}

#[test]
fn test_unregistered_target_contract() {
    let mut ledger = Ledger::new(1);
    let proposed =
        ClientTransaction::new(vec![Instruction::delete(hash_data(b"nowhere"), "value")]);
    let id = ledger.at(1).spawn_deferred(&proposed, 100, None);

    let err = ledger.at(2).exec(id).unwrap_err();
    assert_eq!(err.to_string(), "target contract not registered: value");
    assert_eq!(err.class(), ErrorClass::Dependency);
}

#[test]
fn test_spent_instance_is_inert_but_deletable() {
    let mut ledger = Ledger::new(1);
    let proposed = ClientTransaction::new(vec![ledger.transfer(0, 1, 10)]);
    let id = ledger.at(1).spawn_deferred(&proposed, 100, None);
    ledger.at(2).add_proof(id, 0, 0).unwrap();
    ledger.at(3).exec(id).unwrap();

    assert!(matches!(
        ledger.at(4).add_proof(id, 0, 1),
        Err(ContractError::ExecutionCeilingReached)
    ));

    let changes = ledger
        .submit_as(0, Instruction::delete(id, DeferredContract::ID))
        .unwrap();
    assert_eq!(changes[0].action, StateAction::Remove);
    assert!(ledger.state.get(&id).is_none());
    // the proposal's effects stay
    assert_eq!(ledger.balance(1), 10);
}

#[test]
fn test_multiple_executions() {
    let mut ledger = Ledger::new(1);
    let proposed = ClientTransaction::new(vec![ledger.transfer(0, 1, 10)]);
    let id = ledger.at(1).spawn_deferred(&proposed, 100, Some(2));
    ledger.at(2).add_proof(id, 0, 0).unwrap();

    ledger.at(3).exec(id).unwrap();
    ledger.at(4).exec(id).unwrap();
    assert_eq!(ledger.balance(1), 20);
    assert_eq!(ledger.deferred(&id).num_execution, 0);
    assert!(ledger.at(5).exec(id).is_err());
}

#[test]
fn test_unauthorized_outer_signer() {
    let mut ledger = Ledger::new(1);
    let proposed = ClientTransaction::new(vec![ledger.transfer(0, 1, 10)]);
    let id = ledger.at(1).spawn_deferred(&proposed, 100, None);

    let outsider = Signer::from_seed(Scheme::Ed25519, &[42; 32]);
    let mut tx = ClientTransaction::new(vec![Ledger::exec_instruction(id)]);
    tx.sign_with(&[&outsider]).unwrap();
    assert!(matches!(
        ledger.processor.execute_transaction(&mut ledger.state, &tx),
        Err(ContractError::Unauthorized(_))
    ));
}

#[test]
fn test_mldsa_cosigner() {
    let mut ledger = Ledger::new(1);
    let pq = Signer::from_seed(Scheme::MlDsa65, &[7; 32]);
    let pq_id = Identity::from_signer(&pq);

    let proposed = ClientTransaction::new(vec![ledger.transfer(0, 1, 5)]);
    let id = ledger.at(1).spawn_deferred(&proposed, 100, None);
    let hash: Hash = ledger.deferred(&id).instruction_hashes[0];
    let proof = Ledger::proof_instruction(id, 0, &pq_id, pq.sign(hash.as_bytes()).unwrap());
    ledger.at(2).submit_as(0, proof).unwrap();

    let stored = ledger.deferred(&id);
    assert!(stored.proposed_transaction.instructions[0].has_signer(&pq_id));
}

#[test]
fn test_nested_exec_respects_expiry() {
    let mut ledger = Ledger::new(1);
    let inner = ClientTransaction::new(vec![ledger.transfer(0, 1, 30)]);
    let inner_id = ledger.at(1).spawn_deferred(&inner, 5, None);
    ledger.add_proof(inner_id, 0, 0).unwrap();

    let outer = ClientTransaction::new(vec![Ledger::exec_instruction(inner_id)]);
    let outer_id = ledger.at(2).spawn_deferred(&outer, 100, None);
    ledger.add_proof(outer_id, 0, 0).unwrap();

    let direct = ledger.at(20).exec(inner_id).unwrap_err();
    assert!(matches!(direct, ContractError::Expired { current: 20, expire: 5 }));

    let nested = ledger.exec(outer_id).unwrap_err();
    match nested {
        ContractError::VerificationFailed { index: 0, source } => {
            assert!(matches!(*source, ContractError::Expired { current: 20, expire: 5 }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(ledger.balance(0), 100);
    assert_eq!(ledger.balance(1), 0);
    assert_eq!(ledger.deferred(&inner_id).num_execution, 1);
    assert_eq!(ledger.deferred(&outer_id).num_execution, 1);
}

#[test]
fn test_nested_add_proof_checks_signature() {
    let mut ledger = Ledger::new(2);
    let inner = ClientTransaction::new(vec![ledger.transfer(0, 1, 30)]);
    let inner_id = ledger.at(1).spawn_deferred(&inner, 100, None);

    let forged = Ledger::proof_instruction(
        inner_id,
        0,
        &Identity::from_signer(&ledger.signers[1]),
        ledger.signers[1].sign(b"not the instruction hash").unwrap(),
    );
    let outer = ClientTransaction::new(vec![forged]);
    let outer_id = ledger.at(2).spawn_deferred(&outer, 100, None);
    ledger.add_proof(outer_id, 0, 0).unwrap();

    let err = ledger.at(3).exec(outer_id).unwrap_err();
    match err {
        ContractError::VerificationFailed { index: 0, source } => {
            assert!(matches!(*source, ContractError::BadSignature(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    let stored = ledger.deferred(&inner_id);
    assert!(stored.proposed_transaction.instructions[0].signatures.is_empty());
}
