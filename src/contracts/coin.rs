//! Coin contract: a balance held in one instance.
//!
//! Commands:
//! - `mint { coins }` adds to the balance
//! - `transfer { coins, destination }` moves coins to another coin instance
//!
//! `coins` is a u64 little-endian, `destination` a 32-byte instance id.

use tracing::debug;

use super::state::{ReadOnlyState, StateChange};
use super::{Contract, ContractError, ContractResult, ExecutionContext};
use crate::crypto::Hash;
use crate::types::wire::{wire_via_proto, CoinProto};
use crate::types::{Instruction, WireError, WireFormat};

/// Amount argument
pub const ARG_COINS: &str = "coins";
/// Transfer target argument
pub const ARG_DESTINATION: &str = "destination";

/// Stored state of a coin instance
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CoinData {
    /// Balance
    pub value: u64,
}

impl From<&CoinData> for CoinProto {
    fn from(c: &CoinData) -> Self {
        Self { value: c.value }
    }
}

impl TryFrom<CoinProto> for CoinData {
    type Error = WireError;

    fn try_from(p: CoinProto) -> Result<Self, WireError> {
        Ok(Self { value: p.value })
    }
}

wire_via_proto!(CoinData, CoinProto);

/// The coin contract, hydrated from one instance
#[derive(Clone, Debug, Default)]
pub struct CoinContract {
    data: CoinData,
}

impl CoinContract {
    /// Contract identifier
    pub const ID: &'static str = "coin";

    /// Registry constructor
    ///
    /// # Errors
    /// Returns `ContractError::Decode` if the stored data is malformed
    pub fn from_bytes(bytes: &[u8]) -> ContractResult<Box<dyn Contract>> {
        let data =
            CoinData::from_wire(bytes).map_err(|e| ContractError::decode("coin data", e))?;
        Ok(Box::new(Self { data }))
    }

    /// Current balance
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.data.value
    }
}

fn coins_arg(inst: &Instruction) -> ContractResult<u64> {
    let raw = inst
        .arg(ARG_COINS)
        .ok_or(ContractError::MissingArgument(ARG_COINS))?;
    let bytes: [u8; 8] = raw.try_into().map_err(|_| ContractError::InvalidArgument {
        name: ARG_COINS,
        reason: format!("expected 8 bytes, got {}", raw.len()),
    })?;
    Ok(u64::from_le_bytes(bytes))
}

impl Contract for CoinContract {
    fn spawn(
        &self,
        _ctx: &ExecutionContext,
        state: &dyn ReadOnlyState,
        inst: &Instruction,
    ) -> ContractResult<Vec<StateChange>> {
        let domain = state.get_values(&inst.instance_id)?.domain_id;
        let instance_id = inst.derive_id("");
        debug!(instance = %instance_id, "Spawned coin");
        Ok(vec![StateChange::create(
            instance_id,
            Self::ID,
            CoinData::default().to_wire(),
            domain,
        )])
    }

    fn invoke(
        &self,
        _ctx: &ExecutionContext,
        state: &dyn ReadOnlyState,
        inst: &Instruction,
    ) -> ContractResult<Vec<StateChange>> {
        let domain = state.get_values(&inst.instance_id)?.domain_id;

        match inst.command() {
            Some("mint") => {
                let coins = coins_arg(inst)?;
                let value = self
                    .data
                    .value
                    .checked_add(coins)
                    .ok_or(ContractError::Overflow)?;
                debug!(instance = %inst.instance_id, coins, value, "Minted");
                Ok(vec![StateChange::update(
                    inst.instance_id,
                    Self::ID,
                    CoinData { value }.to_wire(),
                    domain,
                )])
            }
            Some("transfer") => {
                let coins = coins_arg(inst)?;
                let raw = inst
                    .arg(ARG_DESTINATION)
                    .ok_or(ContractError::MissingArgument(ARG_DESTINATION))?;
                let destination =
                    Hash::from_slice(raw).map_err(|e| ContractError::InvalidArgument {
                        name: ARG_DESTINATION,
                        reason: e.to_string(),
                    })?;
                if destination == inst.instance_id {
                    return Err(ContractError::InvalidArgument {
                        name: ARG_DESTINATION,
                        reason: "cannot transfer to self".into(),
                    });
                }

                let target = state.get_values(&destination)?;
                if target.contract_id != Self::ID {
                    return Err(ContractError::ContractMismatch {
                        instance_id: destination,
                        expected: target.contract_id,
                        got: Self::ID.to_string(),
                    });
                }
                let target_data = CoinData::from_wire(&target.data)
                    .map_err(|e| ContractError::decode("coin data", e))?;

                let remaining = self.data.value.checked_sub(coins).ok_or(
                    ContractError::InsufficientBalance {
                        need: coins,
                        have: self.data.value,
                    },
                )?;
                let credited = target_data
                    .value
                    .checked_add(coins)
                    .ok_or(ContractError::Overflow)?;

                debug!(from = %inst.instance_id, to = %destination, coins, "Transferred");
                Ok(vec![
                    StateChange::update(
                        inst.instance_id,
                        Self::ID,
                        CoinData { value: remaining }.to_wire(),
                        domain,
                    ),
                    StateChange::update(
                        destination,
                        Self::ID,
                        CoinData { value: credited }.to_wire(),
                        target.domain_id,
                    ),
                ])
            }
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
        Ok(vec![StateChange::remove(inst.instance_id, Self::ID, domain)])
    }
}
