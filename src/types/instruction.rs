//! Instructions and client transactions.
//!
//! An instruction addresses one ledger instance and asks a contract to spawn a
//! new instance from it, invoke a command on it, or delete it. Each
//! instruction carries its own `(identity, signature)` pairs.

use serde::{Deserialize, Serialize};

use super::{Identity, InstanceId};
use crate::crypto::{CryptoResult, Hash, Hasher, Signer};

/// A named argument
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    /// Argument name
    pub name: String,
    /// Raw value
    pub value: Vec<u8>,
}

/// Ordered arguments with unique names
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arguments(Vec<Argument>);

impl Arguments {
    /// Empty argument list
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Build from pairs; returns `None` if a name repeats
    #[must_use]
    pub fn from_pairs<N, V, I>(pairs: I) -> Option<Self>
    where
        N: Into<String>,
        V: Into<Vec<u8>>,
        I: IntoIterator<Item = (N, V)>,
    {
        let mut args = Self::new();
        for (name, value) in pairs {
            let name = name.into();
            if args.search(&name).is_some() {
                return None;
            }
            args.0.push(Argument {
                name,
                value: value.into(),
            });
        }
        Some(args)
    }

    /// Set an argument, replacing the value if the name exists (order is kept)
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|a| a.name == name) {
            Some(arg) => arg.value = value,
            None => self.0.push(Argument { name, value }),
        }
        self
    }

    /// Value of the named argument
    #[must_use]
    pub fn search(&self, name: &str) -> Option<&[u8]> {
        self.0
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_slice())
    }

    /// Arguments in stored order
    #[must_use]
    pub fn as_slice(&self) -> &[Argument] {
        &self.0
    }

    /// Number of arguments
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if there are no arguments
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What an instruction does
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstructionKind {
    /// Create a new instance of `contract_id`
    Spawn {
        /// Contract to spawn
        contract_id: String,
        /// Spawn arguments
        args: Arguments,
    },
    /// Run `command` on the addressed instance
    Invoke {
        /// Contract of the addressed instance
        contract_id: String,
        /// Command name
        command: String,
        /// Command arguments
        args: Arguments,
    },
    /// Remove the addressed instance
    Delete {
        /// Contract of the addressed instance
        contract_id: String,
    },
}

impl InstructionKind {
    /// One-byte tag used in hashes: 0 spawn, 1 invoke, 2 delete
    #[must_use]
    pub const fn tag(&self) -> u8 {
        match self {
            Self::Spawn { .. } => 0,
            Self::Invoke { .. } => 1,
            Self::Delete { .. } => 2,
        }
    }

    /// Lowercase kind name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn",
            Self::Invoke { .. } => "invoke",
            Self::Delete { .. } => "delete",
        }
    }
}

/// A single ledger instruction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Instance the instruction is addressed to
    pub instance_id: InstanceId,
    /// Spawn / Invoke / Delete payload
    pub kind: InstructionKind,
    /// Who signed (parallel to `signatures`)
    pub signer_identities: Vec<Identity>,
    /// Signatures (parallel to `signer_identities`)
    pub signatures: Vec<Vec<u8>>,
}

impl Instruction {
    /// Spawn a `contract_id` instance from `instance_id`
    #[must_use]
    pub fn spawn(instance_id: InstanceId, contract_id: impl Into<String>, args: Arguments) -> Self {
        Self::unsigned(
            instance_id,
            InstructionKind::Spawn {
                contract_id: contract_id.into(),
                args,
            },
        )
    }

    /// Invoke `command` on `instance_id`
    #[must_use]
    pub fn invoke(
        instance_id: InstanceId,
        contract_id: impl Into<String>,
        command: impl Into<String>,
        args: Arguments,
    ) -> Self {
        Self::unsigned(
            instance_id,
            InstructionKind::Invoke {
                contract_id: contract_id.into(),
                command: command.into(),
                args,
            },
        )
    }

    /// Delete `instance_id`
    #[must_use]
    pub fn delete(instance_id: InstanceId, contract_id: impl Into<String>) -> Self {
        Self::unsigned(
            instance_id,
            InstructionKind::Delete {
                contract_id: contract_id.into(),
            },
        )
    }

    fn unsigned(instance_id: InstanceId, kind: InstructionKind) -> Self {
        Self {
            instance_id,
            kind,
            signer_identities: Vec::new(),
            signatures: Vec::new(),
        }
    }

    /// Target contract identifier
    #[must_use]
    pub fn contract_id(&self) -> &str {
        match &self.kind {
            InstructionKind::Spawn { contract_id, .. }
            | InstructionKind::Invoke { contract_id, .. }
            | InstructionKind::Delete { contract_id } => contract_id,
        }
    }

    /// Invoke command, if this is an invoke
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        match &self.kind {
            InstructionKind::Invoke { command, .. } => Some(command),
            _ => None,
        }
    }

    /// Arguments (empty for delete)
    #[must_use]
    pub fn args(&self) -> &[Argument] {
        match &self.kind {
            InstructionKind::Spawn { args, .. } | InstructionKind::Invoke { args, .. } => {
                args.as_slice()
            }
            InstructionKind::Delete { .. } => &[],
        }
    }

    /// Value of a named argument
    #[must_use]
    pub fn arg(&self, name: &str) -> Option<&[u8]> {
        match &self.kind {
            InstructionKind::Spawn { args, .. } | InstructionKind::Invoke { args, .. } => {
                args.search(name)
            }
            InstructionKind::Delete { .. } => None,
        }
    }

    /// Authorization action string: `spawn:<c>`, `invoke:<c>.<cmd>` or `delete:<c>`
    #[must_use]
    pub fn action(&self) -> String {
        match &self.kind {
            InstructionKind::Spawn { contract_id, .. } => format!("spawn:{contract_id}"),
            InstructionKind::Invoke {
                contract_id,
                command,
                ..
            } => format!("invoke:{contract_id}.{command}"),
            InstructionKind::Delete { contract_id } => format!("delete:{contract_id}"),
        }
    }

    /// Full instruction hash, committing to the signer identities but not to
    /// the signatures
    #[must_use]
    pub fn hash(&self) -> Hash {
        let mut h = Hasher::new();
        h.update(self.instance_id.as_bytes());
        h.update([self.kind.tag()]);
        h.update_prefixed(self.contract_id().as_bytes());
        if let Some(command) = self.command() {
            h.update_prefixed(command.as_bytes());
        }
        for arg in self.args() {
            h.update_prefixed(arg.name.as_bytes());
            h.update_prefixed(&arg.value);
        }
        for identity in &self.signer_identities {
            h.update_prefixed(identity.public_bytes());
        }
        h.finalize()
    }

    /// Canonical hash used by deferred transactions.
    ///
    /// Covers the instance id, kind tag, contract id and arguments, then the
    /// `binding` instance id. Signer identities and signatures are left out so
    /// the hash stays fixed while proofs accumulate.
    #[must_use]
    pub fn deferred_hash(&self, binding: &InstanceId) -> Hash {
        let mut h = Hasher::new();
        h.update(self.instance_id.as_bytes());
        h.update([self.kind.tag()]);
        h.update(self.contract_id().as_bytes());
        for arg in self.args() {
            h.update_prefixed(arg.name.as_bytes());
            h.update_prefixed(&arg.value);
        }
        h.update(binding.as_bytes());
        h.finalize()
    }

    /// Derive the id of the instance this instruction creates or names
    #[must_use]
    pub fn derive_id(&self, what: &str) -> InstanceId {
        let mut h = Hasher::new();
        h.update(self.hash().as_bytes());
        h.update((self.signatures.len() as u32).to_le_bytes());
        for sig in &self.signatures {
            h.update_prefixed(sig);
        }
        h.update(what.as_bytes());
        h.finalize()
    }

    /// Append a detached proof
    pub fn push_proof(&mut self, identity: Identity, signature: Vec<u8>) {
        self.signer_identities.push(identity);
        self.signatures.push(signature);
    }

    /// True if `identity` already signed this instruction
    #[must_use]
    pub fn has_signer(&self, identity: &Identity) -> bool {
        self.signer_identities.iter().any(|id| id == identity)
    }
}

/// An ordered batch of instructions applied atomically
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTransaction {
    /// Instructions in execution order
    pub instructions: Vec<Instruction>,
}

impl ClientTransaction {
    /// Wrap instructions
    #[must_use]
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    /// Transaction hash over all instruction hashes; outer signatures are made over it
    #[must_use]
    pub fn hash(&self) -> Hash {
        let mut h = Hasher::new();
        for instruction in &self.instructions {
            h.update(instruction.hash().as_bytes());
        }
        h.finalize()
    }

    /// Set every instruction's signers to `signers` and sign the transaction hash
    ///
    /// # Errors
    /// Returns error if a signer fails to sign
    pub fn sign_with(&mut self, signers: &[&Signer]) -> CryptoResult<()> {
        let identities: Vec<Identity> = signers.iter().map(|s| Identity::from_signer(s)).collect();
        for instruction in &mut self.instructions {
            instruction.signer_identities.clone_from(&identities);
            instruction.signatures.clear();
        }
        let digest = self.hash();
        for instruction in &mut self.instructions {
            for signer in signers {
                instruction.signatures.push(signer.sign(digest.as_bytes())?);
            }
        }
        Ok(())
    }
}
