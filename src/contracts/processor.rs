//! Instruction processor - executes client transactions against ledger state.
//!
//! For each instruction the processor resolves the target contract through
//! the registry, hydrates it from the addressed instance, runs its
//! `verify_instruction` gate with the transaction hash and dispatches the
//! instruction. Effects of a whole transaction are applied atomically: if any
//! instruction fails, state is left as it was.

use tracing::{debug, info, warn};

use super::state::{MemoryState, ReadOnlyState, StagedState, StateChange};
use super::{ContractResult, ExecutionContext};
use crate::crypto::Hash;
use crate::types::{ClientTransaction, Instruction};

/// Executes client transactions
#[derive(Clone, Debug)]
pub struct InstructionProcessor {
    ctx: ExecutionContext,
}

impl InstructionProcessor {
    /// Create a processor over an execution context
    #[must_use]
    pub const fn new(ctx: ExecutionContext) -> Self {
        Self { ctx }
    }

    /// Execution context shared with contracts
    #[must_use]
    pub const fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// Verify and execute one instruction, returning its effects
    ///
    /// `ctx_hash` is the hash of the enclosing client transaction; outer
    /// signatures are checked against it.
    ///
    /// # Errors
    /// Returns error if the contract is unknown, verification fails or the
    /// contract rejects the instruction
    pub fn execute_instruction(
        &self,
        state: &dyn ReadOnlyState,
        inst: &Instruction,
        ctx_hash: &Hash,
    ) -> ContractResult<Vec<StateChange>> {
        let contract = self.ctx.load(state, inst)?;

        debug!(
            instance = %inst.instance_id,
            contract = inst.contract_id(),
            kind = inst.kind.name(),
            "Executing instruction"
        );

        contract.verify_instruction(&self.ctx, state, inst, ctx_hash.as_bytes())?;
        self.ctx.dispatch(contract.as_ref(), state, inst)
    }

    /// Execute a client transaction atomically
    ///
    /// Each instruction sees the effects of the ones before it. On success the
    /// combined effects are applied to `state` and returned.
    ///
    /// # Errors
    /// Returns the first failing instruction's error; `state` is unchanged
    pub fn execute_transaction(
        &self,
        state: &mut MemoryState,
        tx: &ClientTransaction,
    ) -> ContractResult<Vec<StateChange>> {
        let tx_hash = tx.hash();

        let changes = {
            let mut staged = StagedState::new(&*state);
            for (index, inst) in tx.instructions.iter().enumerate() {
                let result = self
                    .execute_instruction(&staged, inst, &tx_hash)
                    .and_then(|changes| staged.apply_all(&changes));
                if let Err(e) = result {
                    warn!(
                        tx = %tx_hash,
                        index,
                        instance = %inst.instance_id,
                        error = %e,
                        "Transaction rejected"
                    );
                    return Err(e);
                }
            }
            staged.into_changes()
        };

        state.apply(&changes)?;

        info!(
            tx = %tx_hash,
            instructions = tx.instructions.len(),
            changes = changes.len(),
            index = state.current_index(),
            "Transaction applied"
        );
        Ok(changes)
    }
}
