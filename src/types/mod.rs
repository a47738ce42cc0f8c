//! Core ledger data types: identities, instructions and their wire encoding.

mod identity;
mod instruction;
pub mod wire;

pub use identity::Identity;
pub use instruction::{Argument, Arguments, ClientTransaction, Instruction, InstructionKind};
pub use wire::{WireError, WireFormat, WireResult};

use crate::crypto::Hash;

/// Identifier of a ledger instance
pub type InstanceId = Hash;

/// Identifier of an authorization domain (the rule set guarding an instance)
pub type DomainId = Hash;
