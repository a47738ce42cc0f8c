//! Ledger state as seen by contracts.
//!
//! Contracts never write state directly. They read through [`ReadOnlyState`]
//! and return [`StateChange`]s which the caller applies atomically:
//! - [`MemoryState`] is an in-memory ledger (block index + instances)
//! - [`StagedState`] layers pending changes over any state so later steps of
//!   a batch observe earlier ones, and nothing reaches the base until commit

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{ContractError, ContractResult};
use crate::types::{DomainId, InstanceId};

/// Read access to the ledger for the duration of one call
pub trait ReadOnlyState {
    /// Stored value of an instance
    ///
    /// # Errors
    /// Returns `ContractError::NotFound` if the instance does not exist
    fn get_values(&self, instance_id: &InstanceId) -> ContractResult<StateValue>;

    /// Current block index
    fn current_index(&self) -> u64;
}

/// Stored value of one instance
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateValue {
    /// Contract-specific encoded data
    pub data: Vec<u8>,
    /// Contract owning the instance
    pub contract_id: String,
    /// Bumped on every update
    pub version: u64,
    /// Authorization domain guarding the instance
    pub domain_id: DomainId,
}

/// Kind of state change
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateAction {
    /// New instance
    Create,
    /// Replace an instance's data
    Update,
    /// Remove an instance
    Remove,
}

/// An effect emitted by a contract
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    /// What to do
    pub action: StateAction,
    /// Target instance
    pub instance_id: InstanceId,
    /// Contract owning the instance
    pub contract_id: String,
    /// New data (empty for remove)
    pub data: Vec<u8>,
    /// Authorization domain of the instance
    pub domain_id: DomainId,
}

impl StateChange {
    /// Create a new instance
    #[must_use]
    pub fn create(
        instance_id: InstanceId,
        contract_id: impl Into<String>,
        data: Vec<u8>,
        domain_id: DomainId,
    ) -> Self {
        Self {
            action: StateAction::Create,
            instance_id,
            contract_id: contract_id.into(),
            data,
            domain_id,
        }
    }

    /// Replace an instance's data
    #[must_use]
    pub fn update(
        instance_id: InstanceId,
        contract_id: impl Into<String>,
        data: Vec<u8>,
        domain_id: DomainId,
    ) -> Self {
        Self {
            action: StateAction::Update,
            instance_id,
            contract_id: contract_id.into(),
            data,
            domain_id,
        }
    }

    /// Remove an instance
    #[must_use]
    pub fn remove(
        instance_id: InstanceId,
        contract_id: impl Into<String>,
        domain_id: DomainId,
    ) -> Self {
        Self {
            action: StateAction::Remove,
            instance_id,
            contract_id: contract_id.into(),
            data: Vec::new(),
            domain_id,
        }
    }
}

/// Pending changes layered over a base state
pub struct StagedState<'a> {
    base: &'a dyn ReadOnlyState,
    /// `None` marks a removed instance
    overlay: HashMap<InstanceId, Option<StateValue>>,
    changes: Vec<StateChange>,
}

impl<'a> StagedState<'a> {
    /// Start an empty stage over `base`
    #[must_use]
    pub fn new(base: &'a dyn ReadOnlyState) -> Self {
        Self {
            base,
            overlay: HashMap::new(),
            changes: Vec::new(),
        }
    }

    fn lookup(&self, instance_id: &InstanceId) -> ContractResult<Option<StateValue>> {
        if let Some(staged) = self.overlay.get(instance_id) {
            return Ok(staged.clone());
        }
        match self.base.get_values(instance_id) {
            Ok(value) => Ok(Some(value)),
            Err(ContractError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Stage one change
    ///
    /// # Errors
    /// Returns error if the change conflicts with the staged view: create of
    /// an existing instance, update/remove of a missing one, or a contract
    /// mismatch. Nothing is staged on error.
    pub fn apply(&mut self, change: &StateChange) -> ContractResult<()> {
        let current = self.lookup(&change.instance_id)?;
        let next = match change.action {
            StateAction::Create => {
                if current.is_some() {
                    return Err(ContractError::InstanceExists(change.instance_id));
                }
                Some(StateValue {
                    data: change.data.clone(),
                    contract_id: change.contract_id.clone(),
                    version: 0,
                    domain_id: change.domain_id,
                })
            }
            StateAction::Update | StateAction::Remove => {
                let current = current.ok_or(ContractError::NotFound(change.instance_id))?;
                if current.contract_id != change.contract_id {
                    return Err(ContractError::ContractMismatch {
                        instance_id: change.instance_id,
                        expected: current.contract_id,
                        got: change.contract_id.clone(),
                    });
                }
                (change.action == StateAction::Update).then(|| StateValue {
                    data: change.data.clone(),
                    contract_id: change.contract_id.clone(),
                    version: current.version + 1,
                    domain_id: change.domain_id,
                })
            }
        };
        self.overlay.insert(change.instance_id, next);
        self.changes.push(change.clone());
        Ok(())
    }

    /// Stage several changes in order, stopping at the first conflict
    ///
    /// # Errors
    /// Returns the first conflict; earlier changes of the slice stay staged
    pub fn apply_all(&mut self, changes: &[StateChange]) -> ContractResult<()> {
        for change in changes {
            self.apply(change)?;
        }
        Ok(())
    }

    /// Changes staged so far, in order
    #[must_use]
    pub fn changes(&self) -> &[StateChange] {
        &self.changes
    }

    /// Consume the stage, returning its changes
    #[must_use]
    pub fn into_changes(self) -> Vec<StateChange> {
        self.changes
    }

    fn into_overlay(self) -> HashMap<InstanceId, Option<StateValue>> {
        self.overlay
    }
}

impl ReadOnlyState for StagedState<'_> {
    fn get_values(&self, instance_id: &InstanceId) -> ContractResult<StateValue> {
        self.lookup(instance_id)?
            .ok_or(ContractError::NotFound(*instance_id))
    }

    fn current_index(&self) -> u64 {
        self.base.current_index()
    }
}

/// In-memory ledger state
#[derive(Clone, Debug, Default)]
pub struct MemoryState {
    values: HashMap<InstanceId, StateValue>,
    index: u64,
}

impl MemoryState {
    /// Empty state at block index 0
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the current block index
    pub fn set_index(&mut self, index: u64) {
        self.index = index;
    }

    /// Insert an instance directly (genesis setup)
    pub fn insert(
        &mut self,
        instance_id: InstanceId,
        contract_id: impl Into<String>,
        data: Vec<u8>,
        domain_id: DomainId,
    ) {
        self.values.insert(
            instance_id,
            StateValue {
                data,
                contract_id: contract_id.into(),
                version: 0,
                domain_id,
            },
        );
    }

    /// Look up an instance
    #[must_use]
    pub fn get(&self, instance_id: &InstanceId) -> Option<&StateValue> {
        self.values.get(instance_id)
    }

    /// Number of instances
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if no instance exists
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Apply changes atomically: either all of them or none
    ///
    /// # Errors
    /// Returns the first conflicting change; state is unchanged
    pub fn apply(&mut self, changes: &[StateChange]) -> ContractResult<()> {
        let mut staged = StagedState::new(&*self);
        staged.apply_all(changes)?;
        let overlay = staged.into_overlay();

        for (instance_id, value) in overlay {
            match value {
                Some(value) => {
                    self.values.insert(instance_id, value);
                }
                None => {
                    self.values.remove(&instance_id);
                }
            }
        }
        Ok(())
    }
}

impl ReadOnlyState for MemoryState {
    fn get_values(&self, instance_id: &InstanceId) -> ContractResult<StateValue> {
        self.values
            .get(instance_id)
            .cloned()
            .ok_or(ContractError::NotFound(*instance_id))
    }

    fn current_index(&self) -> u64 {
        self.index
    }
}
