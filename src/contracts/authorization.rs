//! Base authorization check.
//!
//! Every instruction is gated by an [`Authorizer`] before its contract runs.
//! It checks that each attached signature verifies over the signed message and
//! that the signer set satisfies the rule guarding the target instance's
//! domain for the instruction's action.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::state::ReadOnlyState;
use super::{ContractError, ContractResult};
use crate::types::{DomainId, Identity, Instruction};

/// Decides whether an instruction's signers may perform its action
pub trait Authorizer: Send + Sync {
    /// Verify `inst`'s signatures over `msg` and its right to act
    ///
    /// # Errors
    /// Returns `ContractError::Unauthorized` if a signature is bad or the
    /// signers do not satisfy the rule
    fn verify(&self, state: &dyn ReadOnlyState, inst: &Instruction, msg: &[u8])
        -> ContractResult<()>;
}

/// Check that every `(identity, signature)` pair verifies over `msg`
///
/// # Errors
/// Returns `ContractError::Unauthorized` on a count mismatch or a bad signature
pub fn verify_signatures(inst: &Instruction, msg: &[u8]) -> ContractResult<()> {
    if inst.signer_identities.len() != inst.signatures.len() {
        return Err(ContractError::Unauthorized(format!(
            "{} signers but {} signatures",
            inst.signer_identities.len(),
            inst.signatures.len()
        )));
    }
    for (identity, signature) in inst.signer_identities.iter().zip(&inst.signatures) {
        identity.verify(msg, signature).map_err(|_| {
            ContractError::Unauthorized(format!("signature from {identity} does not verify"))
        })?;
    }
    Ok(())
}

/// `threshold` of `signers` must sign
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Identities allowed to sign
    pub signers: Vec<Identity>,
    /// Distinct allowed signers needed
    pub threshold: usize,
}

impl Rule {
    /// Any one of `signers`
    #[must_use]
    pub fn any_of(signers: Vec<Identity>) -> Self {
        Self {
            signers,
            threshold: 1,
        }
    }

    /// Every one of `signers`
    #[must_use]
    pub fn all_of(signers: Vec<Identity>) -> Self {
        let threshold = signers.len();
        Self { signers, threshold }
    }

    /// `threshold` of `signers`
    #[must_use]
    pub fn threshold(threshold: usize, signers: Vec<Identity>) -> Self {
        Self { signers, threshold }
    }

    /// Number of distinct allowed signers present in `presented`
    #[must_use]
    pub fn matching(&self, presented: &[Identity]) -> usize {
        self.signers
            .iter()
            .filter(|allowed| presented.contains(allowed))
            .count()
    }

    /// True if `presented` meets the threshold
    #[must_use]
    pub fn is_satisfied_by(&self, presented: &[Identity]) -> bool {
        self.matching(presented) >= self.threshold
    }
}

/// Rules keyed by domain, then by action string
#[derive(Clone, Debug, Default)]
pub struct RulePolicy {
    rules: HashMap<DomainId, HashMap<String, Rule>>,
}

impl RulePolicy {
    /// Empty policy (denies everything)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule, builder style
    #[must_use]
    pub fn with_rule(mut self, domain: DomainId, action: impl Into<String>, rule: Rule) -> Self {
        self.set_rule(domain, action, rule);
        self
    }

    /// Set the rule for `action` in `domain`
    pub fn set_rule(&mut self, domain: DomainId, action: impl Into<String>, rule: Rule) {
        self.rules.entry(domain).or_default().insert(action.into(), rule);
    }

    /// Rule for `action` in `domain`
    #[must_use]
    pub fn rule(&self, domain: &DomainId, action: &str) -> Option<&Rule> {
        self.rules.get(domain).and_then(|actions| actions.get(action))
    }

    /// Number of rules across all domains
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.values().map(HashMap::len).sum()
    }
}

impl Authorizer for RulePolicy {
    fn verify(
        &self,
        state: &dyn ReadOnlyState,
        inst: &Instruction,
        msg: &[u8],
    ) -> ContractResult<()> {
        verify_signatures(inst, msg)?;

        let domain = state.get_values(&inst.instance_id)?.domain_id;
        let action = inst.action();
        let rule = self.rule(&domain, &action).ok_or_else(|| {
            debug!(%domain, %action, "No rule for action");
            ContractError::Unauthorized(format!("no rule for {action} in domain {domain}"))
        })?;

        let matching = rule.matching(&inst.signer_identities);
        if matching < rule.threshold {
            debug!(%domain, %action, matching, threshold = rule.threshold, "Rule not satisfied");
            return Err(ContractError::Unauthorized(format!(
                "{action} needs {} of {} signers, got {matching}",
                rule.threshold,
                rule.signers.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::state::MemoryState;
    use crate::crypto::{hash_data, Scheme, Signer};
    use crate::types::ClientTransaction;

    fn setup() -> (MemoryState, DomainId, Vec<Signer>) {
        let domain = hash_data(b"domain");
        let mut state = MemoryState::new();
        state.insert(hash_data(b"coin"), "coin", vec![], domain);
        let signers = (0..3u8)
            .map(|i| Signer::from_seed(Scheme::Ed25519, &[i; 32]))
            .collect();
        (state, domain, signers)
    }

    fn signed(signers: &[&Signer]) -> (ClientTransaction, Vec<u8>) {
        let mut tx = ClientTransaction::new(vec![Instruction::delete(hash_data(b"coin"), "coin")]);
        tx.sign_with(signers).unwrap();
        let msg = tx.hash().to_vec();
        (tx, msg)
    }

    #[test]
    fn test_threshold_rule() {
        let (state, domain, signers) = setup();
        let ids: Vec<Identity> = signers.iter().map(Identity::from_signer).collect();
        let policy = RulePolicy::new().with_rule(domain, "delete:coin", Rule::threshold(2, ids));

        let (tx, msg) = signed(&[&signers[0]]);
        assert!(matches!(
            policy.verify(&state, &tx.instructions[0], &msg),
            Err(ContractError::Unauthorized(_))
        ));

        let (tx, msg) = signed(&[&signers[0], &signers[2]]);
        policy.verify(&state, &tx.instructions[0], &msg).unwrap();
    }

    #[test]
    fn test_missing_rule_denies() {
        let (state, _, signers) = setup();
        let (tx, msg) = signed(&[&signers[0]]);
        assert!(RulePolicy::new()
            .verify(&state, &tx.instructions[0], &msg)
            .is_err());
    }

    #[test]
    fn test_bad_signature_denies() {
        let (state, domain, signers) = setup();
        let policy = RulePolicy::new().with_rule(
            domain,
            "delete:coin",
            Rule::any_of(vec![Identity::from_signer(&signers[0])]),
        );
        let (tx, _) = signed(&[&signers[0]]);
        assert!(policy
            .verify(&state, &tx.instructions[0], b"another message")
            .is_err());
    }

    #[test]
    fn test_unknown_instance() {
        let (state, domain, signers) = setup();
        let policy = RulePolicy::new().with_rule(
            domain,
            "delete:coin",
            Rule::any_of(vec![Identity::from_signer(&signers[0])]),
        );
        let mut tx = ClientTransaction::new(vec![Instruction::delete(hash_data(b"nope"), "coin")]);
        tx.sign_with(&[&signers[0]]).unwrap();
        let msg = tx.hash();
        assert!(matches!(
            policy.verify(&state, &tx.instructions[0], msg.as_bytes()),
            Err(ContractError::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_signers_count_once() {
        let signer = Signer::from_seed(Scheme::Ed25519, &[9; 32]);
        let other = Signer::from_seed(Scheme::Ed25519, &[8; 32]);
        let id = Identity::from_signer(&signer);
        let rule = Rule::all_of(vec![id.clone(), Identity::from_signer(&other)]);
        assert!(!rule.is_satisfied_by(&[id.clone(), id]));
    }
}
