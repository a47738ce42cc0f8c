//! # Cosigned
//!
//! Deterministic contract execution core for a BFT ledger, with deferred
//! transactions co-signed by several parties over time.
//!
//! ## Architecture
//!
//! - **Registry**: contract id -> constructor, shared by every execution
//! - **Deferred contract**: stores a proposed transaction, collects detached
//!   proofs per instruction, then executes the whole transaction atomically
//! - **Verification protocol**: every contract gates its instructions; the
//!   deferred contract adds expiry, an execution ceiling and proof checks
//! - **Canonical hash**: binds proofs to an instruction's content and to one
//!   deferred instance
//!
//! ## Determinism
//!
//! Contracts read state, never write it. They return state changes that the
//! ledger layer applies atomically, so every replica reaches the same state
//! from the same instructions.

#![forbid(unsafe_code)]
#![deny(clippy::all, rust_2018_idioms)]
#![warn(clippy::pedantic, clippy::nursery, missing_docs)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    // Signature counts and indices are bounded by message sizes
    clippy::cast_possible_truncation,
    // Const fn not always beneficial for complex types
    clippy::missing_const_for_fn,
    // must_use on every fn is excessive
    clippy::must_use_candidate,
    // Pass by value is fine for small Copy types
    clippy::needless_pass_by_value,
    // Match arms with same body are sometimes clearer separate
    clippy::match_same_arms
)]

pub mod config;
pub mod contracts;
pub mod crypto;
pub mod types;

pub use config::{ConfigError, NodeConfig};
pub use contracts::authorization::{Authorizer, Rule, RulePolicy};
pub use contracts::coin::{CoinContract, CoinData};
pub use contracts::deferred::{DeferredContract, DeferredData};
pub use contracts::processor::InstructionProcessor;
pub use contracts::registry::ContractRegistry;
pub use contracts::state::{MemoryState, ReadOnlyState, StateAction, StateChange, StateValue};
pub use contracts::{
    Contract, ContractError, ContractFn, ContractResult, ErrorClass, ExecutionContext,
};
pub use crypto::{hash_data, CryptoError, Hash, Scheme, Signer};
pub use types::{
    Arguments, ClientTransaction, DomainId, Identity, InstanceId, Instruction, InstructionKind,
    WireFormat,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
