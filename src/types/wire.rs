//! Field-tagged binary encoding for everything persisted in the ledger.
//!
//! Instance data outlives the code that wrote it, so persisted values are
//! protobuf messages (via `prost`): fields are tagged, unknown fields are
//! skipped on decode, and encoding a decoded value reproduces the same bytes.
//! Domain types convert to and from the `*Proto` messages below.

use thiserror::Error;

use super::{Argument, Arguments, ClientTransaction, Identity, Instruction, InstructionKind};
use crate::crypto::{Hash, Scheme};

/// Wire decoding errors
#[derive(Debug, Error)]
pub enum WireError {
    /// Bytes are not a valid protobuf message
    #[error("protobuf: {0}")]
    Protobuf(#[from] prost::DecodeError),
    /// Message decoded but violates a domain rule
    #[error("{0}")]
    Invalid(String),
}

/// Result type for wire decoding
pub type WireResult<T> = Result<T, WireError>;

/// Types with a stable persisted encoding
pub trait WireFormat: Sized {
    /// Encode to bytes
    fn to_wire(&self) -> Vec<u8>;

    /// Decode from bytes
    ///
    /// # Errors
    /// Returns error if the bytes are malformed
    fn from_wire(bytes: &[u8]) -> WireResult<Self>;
}

/// Signature scheme tag
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum SchemeProto {
    /// Missing or unknown
    Unspecified = 0,
    /// Ed25519
    Ed25519 = 1,
    /// ML-DSA-65
    MlDsa65 = 2,
}

/// Identity message
#[derive(Clone, PartialEq, prost::Message)]
pub struct IdentityProto {
    /// Scheme tag
    #[prost(enumeration = "SchemeProto", tag = "1")]
    pub scheme: i32,
    /// Raw public key
    #[prost(bytes = "vec", tag = "2")]
    pub public_key: Vec<u8>,
}

/// Argument message
#[derive(Clone, PartialEq, prost::Message)]
pub struct ArgumentProto {
    /// Name
    #[prost(string, tag = "1")]
    pub name: String,
    /// Value
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

/// Spawn payload
#[derive(Clone, PartialEq, prost::Message)]
pub struct SpawnProto {
    /// Contract to spawn
    #[prost(string, tag = "1")]
    pub contract_id: String,
    /// Arguments
    #[prost(message, repeated, tag = "2")]
    pub args: Vec<ArgumentProto>,
}

/// Invoke payload
#[derive(Clone, PartialEq, prost::Message)]
pub struct InvokeProto {
    /// Contract of the addressed instance
    #[prost(string, tag = "1")]
    pub contract_id: String,
    /// Command
    #[prost(string, tag = "2")]
    pub command: String,
    /// Arguments
    #[prost(message, repeated, tag = "3")]
    pub args: Vec<ArgumentProto>,
}

/// Delete payload
#[derive(Clone, PartialEq, prost::Message)]
pub struct DeleteProto {
    /// Contract of the addressed instance
    #[prost(string, tag = "1")]
    pub contract_id: String,
}

/// Instruction message
#[derive(Clone, PartialEq, prost::Message)]
pub struct InstructionProto {
    /// Addressed instance
    #[prost(bytes = "vec", tag = "1")]
    pub instance_id: Vec<u8>,
    /// Kind payload
    #[prost(oneof = "instruction_proto::Kind", tags = "2, 3, 4")]
    pub kind: Option<instruction_proto::Kind>,
    /// Signers
    #[prost(message, repeated, tag = "5")]
    pub signer_identities: Vec<IdentityProto>,
    /// Signatures
    #[prost(bytes = "vec", repeated, tag = "6")]
    pub signatures: Vec<Vec<u8>>,
}

/// Nested types for [`InstructionProto`]
pub mod instruction_proto {
    /// Instruction kind
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        /// Spawn
        #[prost(message, tag = "2")]
        Spawn(super::SpawnProto),
        /// Invoke
        #[prost(message, tag = "3")]
        Invoke(super::InvokeProto),
        /// Delete
        #[prost(message, tag = "4")]
        Delete(super::DeleteProto),
    }
}

/// Client transaction message
#[derive(Clone, PartialEq, prost::Message)]
pub struct ClientTransactionProto {
    /// Instructions in order
    #[prost(message, repeated, tag = "1")]
    pub instructions: Vec<InstructionProto>,
}

/// Deferred contract instance data
#[derive(Clone, PartialEq, prost::Message)]
pub struct DeferredDataProto {
    /// Proposed transaction
    #[prost(message, optional, tag = "1")]
    pub proposed_transaction: Option<ClientTransactionProto>,
    /// Last block index at which invokes are accepted
    #[prost(uint64, tag = "2")]
    pub expire_block_index: u64,
    /// Canonical hash per proposed instruction
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub instruction_hashes: Vec<Vec<u8>>,
    /// Remaining executions
    #[prost(uint64, tag = "4")]
    pub num_execution: u64,
    /// Derived ids of the last execution
    #[prost(bytes = "vec", repeated, tag = "5")]
    pub exec_result: Vec<Vec<u8>>,
}

/// Coin contract instance data
#[derive(Clone, PartialEq, prost::Message)]
pub struct CoinProto {
    /// Balance
    #[prost(uint64, tag = "1")]
    pub value: u64,
}

pub(crate) fn hash_from_wire(bytes: &[u8], what: &str) -> WireResult<Hash> {
    Hash::from_slice(bytes).map_err(|e| WireError::Invalid(format!("{what}: {e}")))
}

impl From<&Identity> for IdentityProto {
    fn from(id: &Identity) -> Self {
        let scheme = match id.scheme() {
            Scheme::Ed25519 => SchemeProto::Ed25519,
            Scheme::MlDsa65 => SchemeProto::MlDsa65,
        };
        Self {
            scheme: scheme as i32,
            public_key: id.public_key().to_vec(),
        }
    }
}

impl TryFrom<IdentityProto> for Identity {
    type Error = WireError;

    fn try_from(p: IdentityProto) -> WireResult<Self> {
        let scheme = if p.scheme == SchemeProto::Ed25519 as i32 {
            Scheme::Ed25519
        } else if p.scheme == SchemeProto::MlDsa65 as i32 {
            Scheme::MlDsa65
        } else {
            return Err(WireError::Invalid(format!("unknown identity scheme {}", p.scheme)));
        };
        Self::new(scheme, p.public_key).map_err(|e| WireError::Invalid(e.to_string()))
    }
}

impl From<&Argument> for ArgumentProto {
    fn from(a: &Argument) -> Self {
        Self {
            name: a.name.clone(),
            value: a.value.clone(),
        }
    }
}

fn args_to_wire(args: &Arguments) -> Vec<ArgumentProto> {
    args.as_slice().iter().map(ArgumentProto::from).collect()
}

fn args_from_wire(args: Vec<ArgumentProto>) -> WireResult<Arguments> {
    Arguments::from_pairs(args.into_iter().map(|a| (a.name, a.value)))
        .ok_or_else(|| WireError::Invalid("duplicate argument name".into()))
}

impl From<&Instruction> for InstructionProto {
    fn from(inst: &Instruction) -> Self {
        let kind = match &inst.kind {
            InstructionKind::Spawn { contract_id, args } => {
                instruction_proto::Kind::Spawn(SpawnProto {
                    contract_id: contract_id.clone(),
                    args: args_to_wire(args),
                })
            }
            InstructionKind::Invoke {
                contract_id,
                command,
                args,
            } => instruction_proto::Kind::Invoke(InvokeProto {
                contract_id: contract_id.clone(),
                command: command.clone(),
                args: args_to_wire(args),
            }),
            InstructionKind::Delete { contract_id } => {
                instruction_proto::Kind::Delete(DeleteProto {
                    contract_id: contract_id.clone(),
                })
            }
        };
        Self {
            instance_id: inst.instance_id.to_vec(),
            kind: Some(kind),
            signer_identities: inst.signer_identities.iter().map(IdentityProto::from).collect(),
            signatures: inst.signatures.clone(),
        }
    }
}

impl TryFrom<InstructionProto> for Instruction {
    type Error = WireError;

    fn try_from(p: InstructionProto) -> WireResult<Self> {
        let instance_id = hash_from_wire(&p.instance_id, "instance id")?;
        let kind = match p.kind {
            Some(instruction_proto::Kind::Spawn(s)) => InstructionKind::Spawn {
                contract_id: s.contract_id,
                args: args_from_wire(s.args)?,
            },
            Some(instruction_proto::Kind::Invoke(i)) => InstructionKind::Invoke {
                contract_id: i.contract_id,
                command: i.command,
                args: args_from_wire(i.args)?,
            },
            Some(instruction_proto::Kind::Delete(d)) => InstructionKind::Delete {
                contract_id: d.contract_id,
            },
            None => return Err(WireError::Invalid("instruction has no kind".into())),
        };
        if p.signer_identities.len() != p.signatures.len() {
            return Err(WireError::Invalid(format!(
                "{} signers but {} signatures",
                p.signer_identities.len(),
                p.signatures.len()
            )));
        }
        let signer_identities = p
            .signer_identities
            .into_iter()
            .map(Identity::try_from)
            .collect::<WireResult<Vec<_>>>()?;
        Ok(Self {
            instance_id,
            kind,
            signer_identities,
            signatures: p.signatures,
        })
    }
}

impl From<&ClientTransaction> for ClientTransactionProto {
    fn from(tx: &ClientTransaction) -> Self {
        Self {
            instructions: tx.instructions.iter().map(InstructionProto::from).collect(),
        }
    }
}

impl TryFrom<ClientTransactionProto> for ClientTransaction {
    type Error = WireError;

    fn try_from(p: ClientTransactionProto) -> WireResult<Self> {
        let instructions = p
            .instructions
            .into_iter()
            .map(Instruction::try_from)
            .collect::<WireResult<Vec<_>>>()?;
        Ok(Self { instructions })
    }
}

/// Implements [`WireFormat`] for a domain type through its proto message
macro_rules! wire_via_proto {
    ($ty:ty, $proto:ty) => {
        impl $crate::types::wire::WireFormat for $ty {
            fn to_wire(&self) -> Vec<u8> {
                ::prost::Message::encode_to_vec(&<$proto>::from(self))
            }

            fn from_wire(bytes: &[u8]) -> $crate::types::wire::WireResult<Self> {
                let proto = <$proto as ::prost::Message>::decode(bytes)?;
                <$ty>::try_from(proto)
            }
        }
    };
}

pub(crate) use wire_via_proto;

wire_via_proto!(Identity, IdentityProto);
wire_via_proto!(Instruction, InstructionProto);
wire_via_proto!(ClientTransaction, ClientTransactionProto);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{hash_data, Signer};

    fn sample_tx() -> ClientTransaction {
        let signer = Signer::from_seed(Scheme::Ed25519, &[3u8; 32]);
        let mut invoke = Instruction::invoke(
            hash_data(b"coin"),
            "coin",
            "transfer",
            Arguments::new().with("coins", 5u64.to_le_bytes().to_vec()),
        );
        invoke.push_proof(Identity::from_signer(&signer), vec![7u8; 64]);
        ClientTransaction::new(vec![
            Instruction::spawn(hash_data(b"darc"), "coin", Arguments::new()),
            invoke,
            Instruction::delete(hash_data(b"old"), "coin"),
        ])
    }

    #[test]
    fn test_transaction_roundtrip_is_stable() {
        let tx = sample_tx();
        let bytes = tx.to_wire();
        let decoded = ClientTransaction::from_wire(&bytes).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.to_wire(), bytes);
    }

    #[test]
    fn test_identity_roundtrip() {
        let signer = Signer::from_seed(Scheme::MlDsa65, &[4u8; 32]);
        let id = Identity::from_signer(&signer);
        assert_eq!(Identity::from_wire(&id.to_wire()).unwrap(), id);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(ClientTransaction::from_wire(&[0xff, 0xff, 0xff]).is_err());
        assert!(Identity::from_wire(&[]).is_err());
    }

    #[test]
    fn test_rejects_mismatched_signers() {
        let mut proto = InstructionProto::from(&sample_tx().instructions[1]);
        proto.signatures.push(vec![1]);
        assert!(matches!(
            Instruction::try_from(proto),
            Err(WireError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_args() {
        let proto = InstructionProto {
            instance_id: hash_data(b"x").to_vec(),
            kind: Some(instruction_proto::Kind::Spawn(SpawnProto {
                contract_id: "coin".into(),
                args: vec![
                    ArgumentProto { name: "a".into(), value: vec![] },
                    ArgumentProto { name: "a".into(), value: vec![1] },
                ],
            })),
            signer_identities: vec![],
            signatures: vec![],
        };
        assert!(Instruction::try_from(proto).is_err());
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        let mut bytes = Instruction::delete(hash_data(b"x"), "coin").to_wire();
        // field 15, varint 1
        bytes.extend_from_slice(&[0x78, 0x01]);
        let decoded = Instruction::from_wire(&bytes).unwrap();
        assert_eq!(decoded.contract_id(), "coin");
    }
}
