//! Deferred transaction contract.
//!
//! A deferred instance holds a proposed client transaction whose instructions
//! collect detached proofs from several parties over time, then runs the
//! whole transaction at once:
//!
//! - **Spawn** stores the proposal and fixes one canonical hash per proposed
//!   instruction, bound to the new instance's id
//! - **Invoke `addProof`** attaches an `(identity, signature)` pair to one
//!   proposed instruction
//! - **Invoke `execProposedTx`** verifies and executes every proposed
//!   instruction against current state, all or nothing
//! - **Delete** removes the instance
//!
//! Expiry, the execution ceiling and proof validity are checked in
//! [`Contract::verify_instruction`] before any Invoke body runs.

use tracing::{debug, info};

use super::state::{ReadOnlyState, StagedState, StateChange};
use super::{Contract, ContractError, ContractResult, ExecutionContext};
use crate::crypto::Hash;
use crate::types::wire::{hash_from_wire, wire_via_proto, DeferredDataProto};
use crate::types::{
    ClientTransaction, DomainId, Identity, InstanceId, Instruction, InstructionKind, WireError,
    WireFormat, WireResult,
};

/// Spawn argument: encoded proposed transaction
pub const ARG_PROPOSED_TRANSACTION: &str = "proposedTransaction";
/// Spawn argument: last accepted block index, decimal
pub const ARG_EXPIRE_BLOCK_INDEX: &str = "expireBlockIndex";
/// Spawn argument: number of allowed executions, decimal, optional
pub const ARG_NUM_EXECUTION: &str = "NumExecution";
/// addProof argument: target instruction index, u32 LE
pub const ARG_INDEX: &str = "index";
/// addProof argument: encoded identity
pub const ARG_IDENTITY: &str = "identity";
/// addProof argument: raw signature
pub const ARG_SIGNATURE: &str = "signature";

/// Command attaching a proof
pub const CMD_ADD_PROOF: &str = "addProof";
/// Command executing the proposed transaction
pub const CMD_EXEC_PROPOSED_TX: &str = "execProposedTx";

/// Executions allowed when `NumExecution` is absent
pub const DEFAULT_NUM_EXECUTION: u64 = 1;

/// Stored state of a deferred instance
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeferredData {
    /// Instructions to run; each collects its own proofs
    pub proposed_transaction: ClientTransaction,
    /// Invokes are rejected once the current index exceeds this
    pub expire_block_index: u64,
    /// Canonical hash per proposed instruction, fixed at spawn
    pub instruction_hashes: Vec<Hash>,
    /// Remaining executions
    pub num_execution: u64,
    /// Derived ids from the last successful execution
    pub exec_result: Vec<InstanceId>,
}

impl From<&DeferredData> for DeferredDataProto {
    fn from(d: &DeferredData) -> Self {
        Self {
            proposed_transaction: Some((&d.proposed_transaction).into()),
            expire_block_index: d.expire_block_index,
            instruction_hashes: d.instruction_hashes.iter().map(Hash::to_vec).collect(),
            num_execution: d.num_execution,
            exec_result: d.exec_result.iter().map(Hash::to_vec).collect(),
        }
    }
}

impl TryFrom<DeferredDataProto> for DeferredData {
    type Error = WireError;

    fn try_from(p: DeferredDataProto) -> WireResult<Self> {
        let proposed_transaction = p
            .proposed_transaction
            .map(ClientTransaction::try_from)
            .transpose()?
            .unwrap_or_default();
        let instruction_hashes = p
            .instruction_hashes
            .iter()
            .map(|h| hash_from_wire(h, "instruction hash"))
            .collect::<WireResult<Vec<_>>>()?;
        if instruction_hashes.len() != proposed_transaction.instructions.len() {
            return Err(WireError::Invalid(format!(
                "{} instruction hashes for {} instructions",
                instruction_hashes.len(),
                proposed_transaction.instructions.len()
            )));
        }
        let exec_result = p
            .exec_result
            .iter()
            .map(|h| hash_from_wire(h, "exec result"))
            .collect::<WireResult<Vec<_>>>()?;
        Ok(Self {
            proposed_transaction,
            expire_block_index: p.expire_block_index,
            instruction_hashes,
            num_execution: p.num_execution,
            exec_result,
        })
    }
}

wire_via_proto!(DeferredData, DeferredDataProto);

/// Decoded `addProof` arguments
struct Proof {
    index: usize,
    identity: Identity,
    signature: Vec<u8>,
}

/// The deferred transaction contract, hydrated from one instance
#[derive(Clone, Debug, Default)]
pub struct DeferredContract {
    data: DeferredData,
}

impl DeferredContract {
    /// Contract identifier
    pub const ID: &'static str = "deferred";

    /// Registry constructor; empty bytes give an empty contract (used by Spawn)
    ///
    /// # Errors
    /// Returns `ContractError::Decode` if the stored data is malformed
    pub fn from_bytes(bytes: &[u8]) -> ContractResult<Box<dyn Contract>> {
        let data = DeferredData::from_wire(bytes)
            .map_err(|e| ContractError::decode("deferred data", e))?;
        Ok(Box::new(Self { data }))
    }

    /// Stored data
    #[must_use]
    pub fn data(&self) -> &DeferredData {
        &self.data
    }

    fn proposed(&self) -> &[Instruction] {
        &self.data.proposed_transaction.instructions
    }

    /// Invoke preconditions shared by every command
    fn check_invocable(&self, current_index: u64) -> ContractResult<()> {
        if self.data.num_execution < 1 {
            return Err(ContractError::ExecutionCeilingReached);
        }
        if current_index > self.data.expire_block_index {
            return Err(ContractError::Expired {
                current: current_index,
                expire: self.data.expire_block_index,
            });
        }
        Ok(())
    }

    /// Guards run after authorization, whether invoked directly or nested
    fn check_instruction(
        &self,
        state: &dyn ReadOnlyState,
        inst: &Instruction,
    ) -> ContractResult<()> {
        if let InstructionKind::Invoke { command, .. } = &inst.kind {
            self.check_invocable(state.current_index())?;
            if command == CMD_ADD_PROOF {
                self.check_proof(inst)?;
            }
        }
        Ok(())
    }

    fn parse_proof(&self, inst: &Instruction) -> ContractResult<Proof> {
        let index_bytes = inst
            .arg(ARG_INDEX)
            .ok_or(ContractError::MissingArgument(ARG_INDEX))?;
        let index_bytes: [u8; 4] =
            index_bytes
                .try_into()
                .map_err(|_| ContractError::InvalidArgument {
                    name: ARG_INDEX,
                    reason: format!("expected 4 bytes, got {}", index_bytes.len()),
                })?;
        let index = u32::from_le_bytes(index_bytes);
        let len = self.proposed().len();
        let index_usize = usize::try_from(index)
            .ok()
            .filter(|i| *i < len)
            .ok_or(ContractError::IndexOutOfRange { index, len })?;

        let identity = inst
            .arg(ARG_IDENTITY)
            .ok_or(ContractError::MissingArgument(ARG_IDENTITY))?;
        let identity =
            Identity::from_wire(identity).map_err(|e| ContractError::decode("identity", e))?;
        let signature = inst
            .arg(ARG_SIGNATURE)
            .ok_or(ContractError::MissingArgument(ARG_SIGNATURE))?
            .to_vec();

        Ok(Proof {
            index: index_usize,
            identity,
            signature,
        })
    }

    fn check_proof(&self, inst: &Instruction) -> ContractResult<()> {
        let proof = self.parse_proof(inst)?;
        if self.proposed()[proof.index].has_signer(&proof.identity) {
            debug!(
                instance = %inst.instance_id,
                index = proof.index,
                identity = %proof.identity,
                "Duplicate proof"
            );
            return Err(ContractError::DuplicateProof(proof.identity));
        }
        let hash = &self.data.instruction_hashes[proof.index];
        proof
            .identity
            .verify(hash.as_bytes(), &proof.signature)
            .map_err(ContractError::BadSignature)
    }

    fn add_proof(&self, inst: &Instruction, domain: DomainId) -> ContractResult<Vec<StateChange>> {
        let proof = self.parse_proof(inst)?;
        let mut data = self.data.clone();
        let target = &mut data.proposed_transaction.instructions[proof.index];
        info!(
            instance = %inst.instance_id,
            index = proof.index,
            identity = %proof.identity,
            proofs = target.signatures.len() + 1,
            "Proof added"
        );
        target.push_proof(proof.identity, proof.signature);

        Ok(vec![StateChange::update(
            inst.instance_id,
            Self::ID,
            data.to_wire(),
            domain,
        )])
    }

    fn exec_proposed_tx(
        &self,
        ctx: &ExecutionContext,
        state: &dyn ReadOnlyState,
        inst: &Instruction,
        domain: DomainId,
    ) -> ContractResult<Vec<StateChange>> {
        let mut staged = StagedState::new(state);
        let mut exec_result = Vec::with_capacity(self.proposed().len());

        for (index, proposed) in self.proposed().iter().enumerate() {
            exec_result.push(proposed.derive_id(""));

            let contract = ctx.load(&staged, proposed).map_err(|e| match e {
                ContractError::ContractNotRegistered(_) => e,
                other => ContractError::ExecutionFailed {
                    index,
                    source: Box::new(other),
                },
            })?;

            contract
                .verify_deferred_instruction(
                    ctx,
                    &staged,
                    proposed,
                    &self.data.instruction_hashes[index],
                )
                .map_err(|e| {
                    debug!(
                        instance = %inst.instance_id,
                        index,
                        error = %e,
                        "Proposed instruction rejected"
                    );
                    ContractError::VerificationFailed {
                        index,
                        source: Box::new(e),
                    }
                })?;

            ctx.dispatch(contract.as_ref(), &staged, proposed)
                .and_then(|changes| staged.apply_all(&changes))
                .map_err(|e| ContractError::ExecutionFailed {
                    index,
                    source: Box::new(e),
                })?;
        }

        let mut data = self.data.clone();
        data.num_execution = data
            .num_execution
            .checked_sub(1)
            .ok_or(ContractError::ExecutionCeilingReached)?;
        data.exec_result = exec_result;

        let mut changes = staged.into_changes();
        info!(
            instance = %inst.instance_id,
            instructions = data.exec_result.len(),
            changes = changes.len(),
            remaining = data.num_execution,
            "Executed proposed transaction"
        );
        changes.push(StateChange::update(
            inst.instance_id,
            Self::ID,
            data.to_wire(),
            domain,
        ));
        Ok(changes)
    }
}

/// Parse an unsigned decimal argument
fn parse_decimal(inst: &Instruction, name: &'static str) -> ContractResult<Option<u64>> {
    let Some(raw) = inst.arg(name) else {
        return Ok(None);
    };
    let text = std::str::from_utf8(raw).map_err(|e| ContractError::InvalidArgument {
        name,
        reason: e.to_string(),
    })?;
    text.parse::<u64>()
        .map(Some)
        .map_err(|e| ContractError::InvalidArgument {
            name,
            reason: format!("{text:?}: {e}"),
        })
}

impl Contract for DeferredContract {
    fn spawn(
        &self,
        _ctx: &ExecutionContext,
        state: &dyn ReadOnlyState,
        inst: &Instruction,
    ) -> ContractResult<Vec<StateChange>> {
        let domain = state.get_values(&inst.instance_id)?.domain_id;

        let proposed = inst
            .arg(ARG_PROPOSED_TRANSACTION)
            .ok_or(ContractError::MissingArgument(ARG_PROPOSED_TRANSACTION))?;
        let proposed_transaction = ClientTransaction::from_wire(proposed)
            .map_err(|e| ContractError::decode("proposed transaction", e))?;
        let expire_block_index = parse_decimal(inst, ARG_EXPIRE_BLOCK_INDEX)?
            .ok_or(ContractError::MissingArgument(ARG_EXPIRE_BLOCK_INDEX))?;
        let num_execution =
            parse_decimal(inst, ARG_NUM_EXECUTION)?.unwrap_or(DEFAULT_NUM_EXECUTION);

        let instance_id = inst.derive_id("");
        let instruction_hashes = proposed_transaction
            .instructions
            .iter()
            .map(|i| i.deferred_hash(&instance_id))
            .collect();
        let data = DeferredData {
            proposed_transaction,
            expire_block_index,
            instruction_hashes,
            num_execution,
            exec_result: Vec::new(),
        };

        info!(
            instance = %instance_id,
            instructions = data.instruction_hashes.len(),
            expire_block_index,
            num_execution,
            "Spawned deferred transaction"
        );
        Ok(vec![StateChange::create(
            instance_id,
            Self::ID,
            data.to_wire(),
            domain,
        )])
    }

    fn invoke(
        &self,
        ctx: &ExecutionContext,
        state: &dyn ReadOnlyState,
        inst: &Instruction,
    ) -> ContractResult<Vec<StateChange>> {
        let domain = state.get_values(&inst.instance_id)?.domain_id;
        match inst.command() {
            Some(CMD_ADD_PROOF) => self.add_proof(inst, domain),
            Some(CMD_EXEC_PROPOSED_TX) => self.exec_proposed_tx(ctx, state, inst, domain),
            other => Err(ContractError::UnknownCommand {
                contract_id: Self::ID.to_string(),
                command: other.unwrap_or_default().to_string(),
            }),
        }
    }

    fn delete(
        &self,
        _ctx: &ExecutionContext,
        state: &dyn ReadOnlyState,
        inst: &Instruction,
    ) -> ContractResult<Vec<StateChange>> {
        let domain = state.get_values(&inst.instance_id)?.domain_id;
        info!(instance = %inst.instance_id, "Deleted deferred transaction");
        Ok(vec![StateChange::remove(inst.instance_id, Self::ID, domain)])
    }

    fn verify_instruction(
        &self,
        ctx: &ExecutionContext,
        state: &dyn ReadOnlyState,
        inst: &Instruction,
        msg: &[u8],
    ) -> ContractResult<()> {
        ctx.authorizer().verify(state, inst, msg)?;
        self.check_instruction(state, inst)
    }

    fn verify_deferred_instruction(
        &self,
        ctx: &ExecutionContext,
        state: &dyn ReadOnlyState,
        inst: &Instruction,
        hash: &Hash,
    ) -> ContractResult<()> {
        ctx.authorizer().verify(state, inst, hash.as_bytes())?;
        self.check_instruction(state, inst)
    }
}
