//! Reconciliation outcome types.

/// The corrective action applied during one (member, rule) evaluation.
///
/// `None` covers both already-correct states and failed mutations; the
/// outcome's detail string carries the distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Grant,
    Revoke,
    None,
}

/// Transient result of evaluating one member against one rule.
///
/// Produced fresh per evaluation, consumed by the aggregator and
/// notifier, never persisted.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub member_id: String,
    pub rule_id: i64,
    /// Whether the member's status matched the rule's target substring.
    pub had_attribute: bool,
    /// Whether the member held the rule's role at evaluation time.
    pub had_role: bool,
    pub action: ReconcileAction,
    pub detail: String,
}

impl ReconcileOutcome {
    /// Whether a role mutation was successfully applied.
    pub fn role_changed(&self) -> bool {
        !matches!(self.action, ReconcileAction::None)
    }
}
