//! Smart contract execution framework.
//!
//! Every contract type implements [`Contract`]: it is rebuilt from the bytes
//! stored in its instance, gates each instruction in
//! [`Contract::verify_instruction`], and turns Spawn / Invoke / Delete
//! instructions into [`StateChange`]s. Contracts never write state; the caller
//! applies the returned changes atomically.
//!
//! ## Architecture
//!
//! 1. **Registry**: contract id -> constructor, shared by all executions
//! 2. **Context**: registry + authorization policy, passed to every call
//! 3. **Contracts**: `deferred` (multi-party co-signed transactions) and `coin`
//! 4. **Processor**: drives client transactions against a ledger state
//!
//! All logic is deterministic: the same state and instruction yield the same
//! changes on every replica.

pub mod authorization;
pub mod coin;
pub mod deferred;
pub mod processor;
pub mod registry;
pub mod state;

use std::fmt;
use std::sync::Arc;

use crate::crypto::{CryptoError, Hash};
use crate::types::{Identity, InstanceId, Instruction, InstructionKind, WireError};

use self::authorization::Authorizer;
use self::registry::ContractRegistry;
use self::state::{ReadOnlyState, StateChange};

/// Result type for contract operations
pub type ContractResult<T> = Result<T, ContractError>;

/// Builds a contract from its instance's stored bytes
pub type ContractFn = fn(&[u8]) -> ContractResult<Box<dyn Contract>>;

/// A contract type.
///
/// The kind-specific methods default to rejecting the instruction, so a
/// contract only implements what it supports.
pub trait Contract: Send + Sync {
    /// Create a new instance
    fn spawn(
        &self,
        ctx: &ExecutionContext,
        state: &dyn ReadOnlyState,
        inst: &Instruction,
    ) -> ContractResult<Vec<StateChange>> {
        let _ = (ctx, state);
        Err(ContractError::unsupported(inst))
    }

    /// Run a command on an existing instance
    fn invoke(
        &self,
        ctx: &ExecutionContext,
        state: &dyn ReadOnlyState,
        inst: &Instruction,
    ) -> ContractResult<Vec<StateChange>> {
        let _ = (ctx, state);
        Err(ContractError::unsupported(inst))
    }

    /// Remove an instance
    fn delete(
        &self,
        ctx: &ExecutionContext,
        state: &dyn ReadOnlyState,
        inst: &Instruction,
    ) -> ContractResult<Vec<StateChange>> {
        let _ = (ctx, state);
        Err(ContractError::unsupported(inst))
    }

    /// Gate run before any kind-specific method.
    ///
    /// `msg` is what the instruction's signatures were made over (the client
    /// transaction hash). The default is the base authorization check.
    fn verify_instruction(
        &self,
        ctx: &ExecutionContext,
        state: &dyn ReadOnlyState,
        inst: &Instruction,
        msg: &[u8],
    ) -> ContractResult<()> {
        ctx.authorizer().verify(state, inst, msg)
    }

    /// Gate used when the instruction runs from inside a deferred transaction.
    ///
    /// Signatures were collected over `hash`, the canonical hash fixed when the
    /// deferred transaction was spawned.
    fn verify_deferred_instruction(
        &self,
        ctx: &ExecutionContext,
        state: &dyn ReadOnlyState,
        inst: &Instruction,
        hash: &Hash,
    ) -> ContractResult<()> {
        ctx.authorizer().verify(state, inst, hash.as_bytes())
    }
}

/// Shared services handed to every contract call
#[derive(Clone)]
pub struct ExecutionContext {
    registry: Arc<ContractRegistry>,
    authorizer: Arc<dyn Authorizer>,
}

impl ExecutionContext {
    /// Bundle a registry and an authorization policy
    #[must_use]
    pub fn new(registry: Arc<ContractRegistry>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            registry,
            authorizer,
        }
    }

    /// Contract registry
    #[must_use]
    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    /// Authorization policy
    #[must_use]
    pub fn authorizer(&self) -> &dyn Authorizer {
        self.authorizer.as_ref()
    }

    /// Resolve and hydrate the contract an instruction targets.
    ///
    /// Spawn builds the contract from empty data; Invoke and Delete build it
    /// from the addressed instance, which must belong to the declared contract.
    pub fn load(
        &self,
        state: &dyn ReadOnlyState,
        inst: &Instruction,
    ) -> ContractResult<Box<dyn Contract>> {
        let contract_id = inst.contract_id();
        let constructor = self
            .registry
            .lookup(contract_id)
            .ok_or_else(|| ContractError::ContractNotRegistered(contract_id.to_string()))?;

        match inst.kind {
            InstructionKind::Spawn { .. } => constructor(&[]),
            InstructionKind::Invoke { .. } | InstructionKind::Delete { .. } => {
                let value = state.get_values(&inst.instance_id)?;
                if value.contract_id != contract_id {
                    return Err(ContractError::ContractMismatch {
                        instance_id: inst.instance_id,
                        expected: value.contract_id,
                        got: contract_id.to_string(),
                    });
                }
                constructor(&value.data)
            }
        }
    }

    /// Run the kind-specific method of `contract` for `inst`
    pub fn dispatch(
        &self,
        contract: &dyn Contract,
        state: &dyn ReadOnlyState,
        inst: &Instruction,
    ) -> ContractResult<Vec<StateChange>> {
        match inst.kind {
            InstructionKind::Spawn { .. } => contract.spawn(self, state, inst),
            InstructionKind::Invoke { .. } => contract.invoke(self, state, inst),
            InstructionKind::Delete { .. } => contract.delete(self, state, inst),
        }
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Broad class of a contract error
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Malformed persisted or argument bytes
    Decoding,
    /// The instruction breaks a rule; a corrected one may succeed later
    Policy,
    /// A collaborator (registry, nested contract) failed
    Dependency,
    /// The instruction conflicts with current ledger state
    State,
}

/// Contract execution errors
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    /// Bytes could not be decoded
    #[error("cannot decode {what}: {source}")]
    Decode {
        /// What was being decoded
        what: &'static str,
        /// Underlying wire error
        #[source]
        source: WireError,
    },

    /// Required argument absent
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    /// Argument present but unusable
    #[error("invalid argument {name}: {reason}")]
    InvalidArgument {
        /// Argument name
        name: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// Proof index beyond the proposed instructions
    #[error("index out of range ({index} >= {len})")]
    IndexOutOfRange {
        /// Requested index
        index: u32,
        /// Number of proposed instructions
        len: usize,
    },

    /// Deferred transaction is past its expiry block
    #[error("expired: current block index {current} > {expire}")]
    Expired {
        /// Current block index
        current: u64,
        /// Expiry block index
        expire: u64,
    },

    /// Deferred transaction has no executions left
    #[error("execution ceiling reached")]
    ExecutionCeilingReached,

    /// Identity already proved this instruction
    #[error("duplicate proof from {0}")]
    DuplicateProof(Identity),

    /// Proof signature does not verify
    #[error("bad signature: {0}")]
    BadSignature(#[source] CryptoError),

    /// Base authorization check failed
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Command not handled by the contract
    #[error("unknown command {command:?} for contract {contract_id}")]
    UnknownCommand {
        /// Contract id
        contract_id: String,
        /// Offending command
        command: String,
    },

    /// Instruction kind not handled by the contract
    #[error("contract {contract_id} does not support {kind}")]
    UnsupportedKind {
        /// Contract id
        contract_id: String,
        /// Instruction kind name
        kind: &'static str,
    },

    /// Not enough coins
    #[error("insufficient balance: need {need}, have {have}")]
    InsufficientBalance {
        /// Amount needed
        need: u64,
        /// Amount available
        have: u64,
    },

    /// Balance arithmetic overflowed
    #[error("balance overflow")]
    Overflow,

    /// No constructor for the contract id
    #[error("target contract not registered: {0}")]
    ContractNotRegistered(String),

    /// A proposed instruction failed its own verification
    #[error("instruction verification failed: {source}")]
    VerificationFailed {
        /// Position in the proposed transaction
        index: usize,
        /// Nested reason
        #[source]
        source: Box<ContractError>,
    },

    /// A proposed instruction failed while executing
    #[error("instruction execution failed: {source}")]
    ExecutionFailed {
        /// Position in the proposed transaction
        index: usize,
        /// Nested reason
        #[source]
        source: Box<ContractError>,
    },

    /// Instance does not exist
    #[error("instance not found: {0}")]
    NotFound(InstanceId),

    /// Instance already exists
    #[error("instance already exists: {0}")]
    InstanceExists(InstanceId),

    /// Instance belongs to another contract
    #[error("instance {instance_id} belongs to {expected}, not {got}")]
    ContractMismatch {
        /// Instance
        instance_id: InstanceId,
        /// Contract that owns it
        expected: String,
        /// Contract named by the instruction or change
        got: String,
    },
}

impl ContractError {
    fn unsupported(inst: &Instruction) -> Self {
        Self::UnsupportedKind {
            contract_id: inst.contract_id().to_string(),
            kind: inst.kind.name(),
        }
    }

    /// Decoding error helper
    #[must_use]
    pub fn decode(what: &'static str, source: WireError) -> Self {
        Self::Decode { what, source }
    }

    /// Error class, for callers deciding how to report a rejection
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Decode { .. } => ErrorClass::Decoding,
            Self::MissingArgument(_)
            | Self::InvalidArgument { .. }
            | Self::IndexOutOfRange { .. }
            | Self::Expired { .. }
            | Self::ExecutionCeilingReached
            | Self::DuplicateProof(_)
            | Self::BadSignature(_)
            | Self::Unauthorized(_)
            | Self::UnknownCommand { .. }
            | Self::UnsupportedKind { .. }
            | Self::InsufficientBalance { .. }
            | Self::Overflow => ErrorClass::Policy,
            Self::ContractNotRegistered(_)
            | Self::VerificationFailed { .. }
            | Self::ExecutionFailed { .. } => ErrorClass::Dependency,
            Self::NotFound(_) | Self::InstanceExists(_) | Self::ContractMismatch { .. } => {
                ErrorClass::State
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::authorization::RulePolicy;
    use crate::contracts::state::MemoryState;
    use crate::crypto::hash_data;
    use crate::types::Arguments;

    struct SpawnOnly;

    impl Contract for SpawnOnly {}

    fn spawn_only(_: &[u8]) -> ContractResult<Box<dyn Contract>> {
        Ok(Box::new(SpawnOnly))
    }

    fn context() -> ExecutionContext {
        let registry = ContractRegistry::new();
        registry.register("noop", spawn_only);
        ExecutionContext::new(Arc::new(registry), Arc::new(RulePolicy::new()))
    }

    #[test]
    fn test_default_methods_reject() {
        let ctx = context();
        let state = MemoryState::new();
        let inst = Instruction::spawn(hash_data(b"x"), "noop", Arguments::new());
        let contract = ctx.load(&state, &inst).unwrap();
        let err = ctx.dispatch(contract.as_ref(), &state, &inst).unwrap_err();
        assert!(matches!(err, ContractError::UnsupportedKind { kind: "spawn", .. }));
        assert_eq!(err.class(), ErrorClass::Policy);
    }

    #[test]
    fn test_load_unregistered() {
        let ctx = context();
        let state = MemoryState::new();
        let inst = Instruction::spawn(hash_data(b"x"), "missing", Arguments::new());
        let err = ctx.load(&state, &inst).err().unwrap();
        assert!(matches!(err, ContractError::ContractNotRegistered(ref id) if id == "missing"));
        assert_eq!(err.class(), ErrorClass::Dependency);
    }

    #[test]
    fn test_load_checks_instance_owner() {
        let ctx = context();
        let mut state = MemoryState::new();
        let id = hash_data(b"instance");
        state.insert(id, "other", vec![], hash_data(b"d"));
        let inst = Instruction::delete(id, "noop");
        assert!(matches!(
            ctx.load(&state, &inst).err().unwrap(),
            ContractError::ContractMismatch { .. }
        ));
    }

    #[test]
    fn test_nested_error_messages() {
        let err = ContractError::VerificationFailed {
            index: 0,
            source: Box::new(ContractError::Unauthorized("no rule".into())),
        };
        assert_eq!(
            err.to_string(),
            "instruction verification failed: unauthorized: no rule"
        );
    }
}
