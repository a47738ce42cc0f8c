//! Contract registry
//!
//! Maps contract identifiers to constructors. The registry is shared by every
//! execution, including nested ones run by deferred transactions, so it is
//! safe for concurrent registration and lookup.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::coin::CoinContract;
use super::deferred::DeferredContract;
use super::ContractFn;

/// Contract id -> constructor
#[derive(Debug, Default)]
pub struct ContractRegistry {
    constructors: RwLock<HashMap<String, ContractFn>>,
}

impl ContractRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in contract
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for name in Self::builtin_names() {
            registry.register_builtin(name);
        }
        registry
    }

    /// Identifiers of the built-in contracts
    #[must_use]
    pub const fn builtin_names() -> &'static [&'static str] {
        &[DeferredContract::ID, CoinContract::ID]
    }

    /// Constructor of a built-in contract
    #[must_use]
    pub fn builtin(name: &str) -> Option<ContractFn> {
        match name {
            DeferredContract::ID => Some(DeferredContract::from_bytes as ContractFn),
            CoinContract::ID => Some(CoinContract::from_bytes as ContractFn),
            _ => None,
        }
    }

    /// Register a built-in contract by name; returns false if no such built-in
    pub fn register_builtin(&self, name: &str) -> bool {
        match Self::builtin(name) {
            Some(constructor) => {
                self.register(name, constructor);
                true
            }
            None => false,
        }
    }

    /// Register a constructor, replacing any previous one for the same id
    pub fn register(&self, contract_id: impl Into<String>, constructor: ContractFn) {
        let contract_id = contract_id.into();
        info!(contract = %contract_id, "Registered contract");
        if self.constructors.write().insert(contract_id, constructor).is_some() {
            debug!("Replaced previous constructor");
        }
    }

    /// Constructor for a contract id
    #[must_use]
    pub fn lookup(&self, contract_id: &str) -> Option<ContractFn> {
        self.constructors.read().get(contract_id).copied()
    }

    /// Check if a contract id is registered
    #[must_use]
    pub fn contains(&self, contract_id: &str) -> bool {
        self.constructors.read().contains_key(contract_id)
    }

    /// Registered contract ids, sorted
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.constructors.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered contracts
    #[must_use]
    pub fn contract_count(&self) -> usize {
        self.constructors.read().len()
    }
}
