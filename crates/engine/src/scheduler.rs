//! Tick-driven scan scheduling.
//!
//! A single timer drives the scheduler at a fixed global tick. Each
//! tick selects the rules whose check interval has elapsed and
//! dispatches one scan task per due rule; the timer itself never waits
//! on scan work. Scans of distinct rules may run concurrently under a
//! bounded permit pool, while a per-rule in-flight registry guarantees
//! the same rule is never scanned twice at once.
//!
//! The tick period is clamped to the minimum rule interval, so a due
//! rule is picked up at most one tick late. That bounded staleness is
//! an accepted property of the polling model, not a defect.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use futures::StreamExt;

use rolesync_core::EngineConfig;
use rolesync_directory::{Directory, Member};
use rolesync_notify::{Dispatcher, RoleChangeEvent, RoleChangeKind};
use rolesync_store::{JsonStore, Rule};

use crate::error::EngineError;
use crate::outcome::{ReconcileAction, ReconcileOutcome};
use crate::reconciler::{with_timeout, Reconciler};
use crate::report::{self, TenantReport};
use crate::stats::StatisticsAggregator;

/// Drives periodic rule scans against the directory service.
pub struct ScanScheduler {
    store: Arc<JsonStore>,
    directory: Arc<dyn Directory>,
    reconciler: Reconciler,
    aggregator: StatisticsAggregator,
    dispatcher: Arc<Dispatcher>,
    config: EngineConfig,
    /// Caps how many rule scans run at once across tenants.
    scan_permits: Arc<Semaphore>,
    /// Rule ids currently being scanned. A rule present here is never
    /// scheduled again until its scan finishes.
    in_flight: Mutex<HashSet<i64>>,
    shutdown: AtomicBool,
    stop: Notify,
}

impl ScanScheduler {
    pub fn new(
        store: Arc<JsonStore>,
        directory: Arc<dyn Directory>,
        dispatcher: Arc<Dispatcher>,
        config: EngineConfig,
    ) -> Self {
        let config = config.normalized();
        let reconciler = Reconciler::new(Arc::clone(&directory), config.directory_timeout());
        let aggregator = StatisticsAggregator::new(Arc::clone(&store));
        let scan_permits = Arc::new(Semaphore::new(config.scan_concurrency));

        Self {
            store,
            directory,
            reconciler,
            aggregator,
            dispatcher,
            config,
            scan_permits,
            in_flight: Mutex::new(HashSet::new()),
            shutdown: AtomicBool::new(false),
            stop: Notify::new(),
        }
    }

    /// Run the tick loop until [`shutdown`](Self::shutdown) is called.
    ///
    /// Scan work is spawned, never awaited here, so a slow scan cannot
    /// delay the next tick.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        info!(
            tick_ms = self.config.tick_interval_ms,
            scan_concurrency = self.config.scan_concurrency,
            "scan scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.is_shut_down() {
                        break;
                    }
                    self.run_tick(Utc::now());
                }
                _ = self.stop.notified() => {
                    break;
                }
            }
        }

        info!("scan scheduler stopped");
    }

    /// Execute one scheduling pass at `now`: select due rules and
    /// dispatch a scan task for each.
    ///
    /// Idempotent with respect to overlap — a rule already being
    /// scanned is skipped, never queued twice. Returns the handles of
    /// the scans dispatched this tick; dropping them detaches the work.
    pub fn run_tick(self: &Arc<Self>, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        if self.is_shut_down() {
            return Vec::new();
        }

        let due = self.store.due_rules(now);
        if !due.is_empty() {
            debug!(due = due.len(), "tick selected due rules");
        }

        let mut handles = Vec::with_capacity(due.len());
        for rule in due {
            if self.is_shut_down() {
                break;
            }
            if !self.try_claim(rule.id) {
                debug!(rule_id = rule.id, "scan already in flight; skipping");
                continue;
            }

            let scheduler = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let _permit = scheduler
                    .scan_permits
                    .acquire()
                    .await
                    .expect("scan semaphore closed");
                if !scheduler.is_shut_down() {
                    scheduler.scan_rule(&rule, now).await;
                }
                scheduler.release(rule.id);
            }));
        }
        handles
    }

    /// Scan one rule: fetch the roster once, evaluate every non-service
    /// member, fold outcomes into statistics, and notify on changes.
    ///
    /// `last_checked_at` is persisted unconditionally at the end — even
    /// for scans that failed partway — so an erroring rule backs off to
    /// its regular interval instead of re-scanning every tick.
    async fn scan_rule(&self, rule: &Rule, now: DateTime<Utc>) {
        let roster = with_timeout(
            self.config.directory_timeout(),
            self.directory.fetch_roster(&rule.tenant_id),
        )
        .await;

        match roster {
            Ok(roster) => {
                let (checked, changed) = self.evaluate_roster(rule, roster).await;
                info!(
                    tenant = %rule.tenant_id,
                    rule_id = rule.id,
                    members = checked,
                    role_changes = changed,
                    "rule scan complete"
                );
            }
            Err(e) => {
                warn!(
                    tenant = %rule.tenant_id,
                    rule_id = rule.id,
                    error = %e,
                    "roster fetch failed; scan skipped"
                );
            }
        }

        if let Err(e) = self.store.record_scan(rule.id, now) {
            warn!(rule_id = rule.id, error = %e, "failed to persist scan record");
        }
    }

    /// Evaluate the roster with a small concurrency cap. Per-member
    /// failures are logged and never abort the remaining evaluations.
    async fn evaluate_roster(&self, rule: &Rule, roster: Vec<Member>) -> (usize, usize) {
        let reconciler = &self.reconciler;
        let mut evaluations = futures::stream::iter(
            roster
                .into_iter()
                .filter(|member| !member.is_service)
                .map(|member| async move {
                    let outcome = reconciler.reconcile(&member, rule).await;
                    (member, outcome)
                }),
        )
        .buffer_unordered(self.config.member_concurrency);

        let mut checked = 0usize;
        let mut changed = 0usize;

        while let Some((member, outcome)) = evaluations.next().await {
            checked += 1;
            if let Err(e) = self.aggregator.record(&outcome) {
                warn!(
                    rule_id = rule.id,
                    member = %member.id,
                    error = %e,
                    "failed to record evaluation"
                );
            }
            if outcome.role_changed() {
                changed += 1;
                self.dispatch_change(rule, &member, &outcome).await;
            }
        }

        (checked, changed)
    }

    /// Fire one notification per successfully applied change.
    /// Delivery failures are the dispatcher's problem, not ours.
    async fn dispatch_change(&self, rule: &Rule, member: &Member, outcome: &ReconcileOutcome) {
        let kind = match outcome.action {
            ReconcileAction::Grant => RoleChangeKind::Granted,
            ReconcileAction::Revoke => RoleChangeKind::Revoked,
            ReconcileAction::None => return,
        };

        let event = RoleChangeEvent {
            tenant_id: rule.tenant_id.clone(),
            member_id: member.id.clone(),
            member_name: member.display_name.clone(),
            role_id: rule.role_id.clone(),
            rule_id: rule.id,
            target_substring: rule.target_substring.clone(),
            kind,
            detail: outcome.detail.clone(),
            timestamp: Utc::now(),
        };
        self.dispatcher.dispatch(&event).await;
    }

    /// Evaluate one member against all active rules of a tenant.
    ///
    /// On-demand diagnostic path: reconciliation failures come back
    /// inside the outcomes, so the caller always receives a structured
    /// report. Only the member lookup itself can fail.
    pub async fn check_single_member(
        &self,
        tenant_id: &str,
        member_id: &str,
    ) -> Result<Vec<ReconcileOutcome>, EngineError> {
        let member = with_timeout(
            self.config.directory_timeout(),
            self.directory.fetch_member(tenant_id, member_id),
        )
        .await?;

        let rules: Vec<Rule> = self
            .store
            .tenant_rules(tenant_id)
            .into_iter()
            .filter(|r| r.active)
            .collect();

        let mut outcomes = Vec::with_capacity(rules.len());
        for rule in &rules {
            let outcome = self.reconciler.reconcile(&member, rule).await;
            if let Err(e) = self.aggregator.record(&outcome) {
                warn!(rule_id = rule.id, error = %e, "failed to record evaluation");
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Read-only aggregate snapshot for a tenant.
    pub async fn tenant_report(&self, tenant_id: &str) -> Result<TenantReport, EngineError> {
        let roster = with_timeout(
            self.config.directory_timeout(),
            self.directory.fetch_roster(tenant_id),
        )
        .await?;
        let overview = self.store.tenant_overview(tenant_id);
        let rules = self.store.tenant_rules(tenant_id);
        Ok(report::build(overview, &rules, &roster))
    }

    /// Stop scheduling new scans. In-flight member evaluations are
    /// allowed to finish.
    pub fn shutdown(&self) {
        info!("scan scheduler shutdown requested");
        self.shutdown.store(true, Ordering::Relaxed);
        self.stop.notify_waiters();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    fn try_claim(&self, rule_id: i64) -> bool {
        self.in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .insert(rule_id)
    }

    fn release(&self, rule_id: i64) {
        self.in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .remove(&rule_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use rolesync_core::IntervalBounds;
    use rolesync_directory::memory::FailureKind;
    use rolesync_directory::{InMemoryDirectory, Presence};
    use rolesync_notify::{Notifier, NotifyError};
    use rolesync_store::NewRule;

    struct Harness {
        _tmp: tempfile::TempDir,
        store: Arc<JsonStore>,
        directory: Arc<InMemoryDirectory>,
        scheduler: Arc<ScanScheduler>,
    }

    fn harness_with_dispatcher(dispatcher: Dispatcher) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(
            JsonStore::open(
                tmp.path().join("rolesync.json"),
                IntervalBounds {
                    min_ms: 60_000,
                    max_ms: 86_400_000,
                },
            )
            .unwrap(),
        );
        let directory = Arc::new(InMemoryDirectory::new());
        let scheduler = Arc::new(ScanScheduler::new(
            Arc::clone(&store),
            Arc::clone(&directory) as Arc<dyn Directory>,
            Arc::new(dispatcher),
            EngineConfig::default(),
        ));
        Harness {
            _tmp: tmp,
            store,
            directory,
            scheduler,
        }
    }

    fn harness() -> Harness {
        harness_with_dispatcher(Dispatcher::empty())
    }

    fn member(id: &str, status: Option<&str>, roles: &[&str]) -> Member {
        Member {
            id: id.to_string(),
            display_name: format!("Member {id}"),
            is_service: false,
            presence: match status {
                Some(text) => Presence::Present {
                    text: text.to_string(),
                },
                None => Presence::Absent,
            },
            role_ids: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn afk_rule(store: &JsonStore) -> Rule {
        store
            .create_rule(
                "t1",
                NewRule {
                    target_substring: "AFK".to_string(),
                    role_id: "R1".to_string(),
                    check_interval_ms: 300_000,
                },
            )
            .unwrap()
    }

    async fn run_tick_to_completion(scheduler: &Arc<ScanScheduler>, now: DateTime<Utc>) {
        for handle in scheduler.run_tick(now) {
            handle.await.unwrap();
        }
    }

    struct CountingNotifier {
        sent: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Notifier for CountingNotifier {
        async fn send(&self, _event: &RoleChangeEvent) -> Result<(), NotifyError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn channel_name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn scan_grants_role_and_counts_it() {
        let h = harness();
        let rule = afk_rule(&h.store);
        h.directory
            .upsert_member("t1", member("m1", Some("AFK - back soon"), &[]));

        let now = Utc::now();
        run_tick_to_completion(&h.scheduler, now).await;

        let m = h.directory.fetch_member("t1", "m1").await.unwrap();
        assert!(m.has_role("R1"));

        let rule = h.store.rule(rule.id).unwrap();
        assert_eq!(rule.stats.grants, 1);
        assert_eq!(rule.stats.member_checks, 1);
        assert_eq!(rule.stats.scans, 1);
        assert_eq!(rule.last_checked_at, Some(now));
        assert_eq!(h.store.global_stats().role_changes, 1);
    }

    #[tokio::test]
    async fn scan_revokes_role_when_status_changes() {
        let h = harness();
        let rule = afk_rule(&h.store);
        h.directory
            .upsert_member("t1", member("m1", Some("AFK - back soon"), &[]));

        let t0 = Utc::now();
        run_tick_to_completion(&h.scheduler, t0).await;

        // Status changes; the rule becomes due again one interval later.
        h.directory.set_presence(
            "t1",
            "m1",
            Presence::Present {
                text: "Working".to_string(),
            },
        );
        let t1 = t0 + chrono::Duration::milliseconds(300_000);
        run_tick_to_completion(&h.scheduler, t1).await;

        let m = h.directory.fetch_member("t1", "m1").await.unwrap();
        assert!(!m.has_role("R1"));

        let rule = h.store.rule(rule.id).unwrap();
        assert_eq!(rule.stats.grants, 1);
        assert_eq!(rule.stats.revocations, 1);
        assert_eq!(rule.stats.scans, 2);
    }

    #[tokio::test]
    async fn rule_not_due_is_not_scanned() {
        let h = harness();
        let rule = afk_rule(&h.store);
        h.directory.upsert_member("t1", member("m1", None, &[]));

        let t0 = Utc::now();
        run_tick_to_completion(&h.scheduler, t0).await;
        assert_eq!(h.directory.roster_fetch_count(), 1);

        // One millisecond short of the interval: nothing happens.
        let early = t0 + chrono::Duration::milliseconds(299_999);
        run_tick_to_completion(&h.scheduler, early).await;
        assert_eq!(h.directory.roster_fetch_count(), 1);

        let due = t0 + chrono::Duration::milliseconds(300_000);
        run_tick_to_completion(&h.scheduler, due).await;
        assert_eq!(h.directory.roster_fetch_count(), 2);

        let rule = h.store.rule(rule.id).unwrap();
        assert_eq!(rule.stats.scans, 2);
    }

    #[tokio::test]
    async fn inactive_rule_never_reaches_directory() {
        let h = harness();
        let rule = afk_rule(&h.store);
        h.store.set_rule_active(rule.id, false).unwrap();
        h.directory
            .upsert_member("t1", member("m1", Some("AFK"), &[]));

        run_tick_to_completion(&h.scheduler, Utc::now()).await;
        assert_eq!(h.directory.roster_fetch_count(), 0);
    }

    #[tokio::test]
    async fn inactive_tenant_never_reaches_directory() {
        let h = harness();
        afk_rule(&h.store);
        h.store.set_tenant_active("t1", false).unwrap();
        h.directory
            .upsert_member("t1", member("m1", Some("AFK"), &[]));

        run_tick_to_completion(&h.scheduler, Utc::now()).await;
        assert_eq!(h.directory.roster_fetch_count(), 0);
    }

    #[tokio::test]
    async fn service_members_are_skipped() {
        let h = harness();
        let rule = afk_rule(&h.store);
        let mut bot = member("bot", Some("AFK"), &[]);
        bot.is_service = true;
        h.directory.upsert_member("t1", bot);
        h.directory
            .upsert_member("t1", member("m1", Some("AFK"), &[]));

        run_tick_to_completion(&h.scheduler, Utc::now()).await;

        let bot = h.directory.fetch_member("t1", "bot").await.unwrap();
        assert!(!bot.has_role("R1"));
        let rule = h.store.rule(rule.id).unwrap();
        assert_eq!(rule.stats.member_checks, 1);
        assert_eq!(rule.stats.grants, 1);
    }

    #[tokio::test]
    async fn in_flight_rule_is_not_scanned_twice() {
        let h = harness();
        let rule = afk_rule(&h.store);
        h.directory
            .upsert_member("t1", member("m1", Some("AFK"), &[]));

        // Simulate a scan still running from a previous tick.
        assert!(h.scheduler.try_claim(rule.id));

        let handles = h.scheduler.run_tick(Utc::now());
        assert!(handles.is_empty());
        assert_eq!(h.directory.roster_fetch_count(), 0);

        // Once the scan finishes, the next tick proceeds normally, and
        // the totals match a single serialized run.
        h.scheduler.release(rule.id);
        run_tick_to_completion(&h.scheduler, Utc::now()).await;
        assert_eq!(h.directory.roster_fetch_count(), 1);
        assert_eq!(h.store.rule(rule.id).unwrap().stats.scans, 1);
        assert_eq!(h.store.rule(rule.id).unwrap().stats.grants, 1);
    }

    #[tokio::test]
    async fn failed_roster_fetch_still_updates_last_checked() {
        let h = harness();
        let rule = afk_rule(&h.store);
        h.directory
            .upsert_member("t1", member("m1", Some("AFK"), &[]));
        h.directory.set_roster_failure(Some(FailureKind::Timeout));

        let now = Utc::now();
        run_tick_to_completion(&h.scheduler, now).await;

        let rule = h.store.rule(rule.id).unwrap();
        assert_eq!(rule.last_checked_at, Some(now));
        assert_eq!(rule.stats.scans, 1);
        assert_eq!(rule.stats.member_checks, 0);
        assert_eq!(rule.stats.grants, 0);
    }

    #[tokio::test]
    async fn mutation_failure_is_a_diagnostic_not_a_role_change() {
        let h = harness();
        let rule = afk_rule(&h.store);
        h.directory
            .upsert_member("t1", member("m1", Some("AFK"), &[]));
        h.directory
            .set_mutation_failure(Some(FailureKind::Forbidden));

        run_tick_to_completion(&h.scheduler, Utc::now()).await;

        let rule = h.store.rule(rule.id).unwrap();
        assert_eq!(rule.stats.member_checks, 1);
        assert_eq!(rule.stats.grants, 0);
        assert_eq!(h.store.global_stats().role_changes, 0);
    }

    #[tokio::test]
    async fn shutdown_blocks_new_scans() {
        let h = harness();
        afk_rule(&h.store);
        h.directory
            .upsert_member("t1", member("m1", Some("AFK"), &[]));

        h.scheduler.shutdown();
        let handles = h.scheduler.run_tick(Utc::now());
        assert!(handles.is_empty());
        assert_eq!(h.directory.roster_fetch_count(), 0);
    }

    #[tokio::test]
    async fn run_loop_exits_on_shutdown() {
        let h = harness();
        let run_handle = tokio::spawn(Arc::clone(&h.scheduler).run());

        h.scheduler.shutdown();
        tokio::time::timeout(Duration::from_secs(5), run_handle)
            .await
            .expect("run loop did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn successful_changes_are_notified_once() {
        let sent = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::with_defaults(vec![Box::new(CountingNotifier {
            sent: Arc::clone(&sent),
        })]);
        let h = harness_with_dispatcher(dispatcher);
        afk_rule(&h.store);
        h.directory
            .upsert_member("t1", member("m1", Some("AFK"), &[]));
        h.directory.upsert_member("t1", member("m2", None, &[]));

        run_tick_to_completion(&h.scheduler, Utc::now()).await;

        // One grant happened; the unchanged member produced no event.
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn check_single_member_reports_all_active_rules() {
        let h = harness();
        let afk = afk_rule(&h.store);
        let busy = h
            .store
            .create_rule(
                "t1",
                NewRule {
                    target_substring: "BUSY".to_string(),
                    role_id: "R2".to_string(),
                    check_interval_ms: 300_000,
                },
            )
            .unwrap();
        h.directory
            .upsert_member("t1", member("m1", Some("AFK"), &["R2"]));

        let outcomes = h.scheduler.check_single_member("t1", "m1").await.unwrap();
        assert_eq!(outcomes.len(), 2);

        let afk_outcome = outcomes.iter().find(|o| o.rule_id == afk.id).unwrap();
        assert_eq!(afk_outcome.action, ReconcileAction::Grant);
        let busy_outcome = outcomes.iter().find(|o| o.rule_id == busy.id).unwrap();
        assert_eq!(busy_outcome.action, ReconcileAction::Revoke);

        let m = h.directory.fetch_member("t1", "m1").await.unwrap();
        assert!(m.has_role("R1"));
        assert!(!m.has_role("R2"));
    }

    #[tokio::test]
    async fn check_single_member_unknown_member_is_an_error() {
        let h = harness();
        afk_rule(&h.store);

        let err = h
            .scheduler
            .check_single_member("t1", "ghost")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Directory(_)));
    }

    #[tokio::test]
    async fn reset_tenant_stops_future_scans() {
        let h = harness();
        afk_rule(&h.store);
        h.directory
            .upsert_member("t1", member("m1", Some("AFK"), &[]));

        h.store.reset_tenant("t1").unwrap();
        run_tick_to_completion(&h.scheduler, Utc::now()).await;
        assert_eq!(h.directory.roster_fetch_count(), 0);
    }
}
