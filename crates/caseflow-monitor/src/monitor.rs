//! The continuous polling loop.
//!
//! One iteration = one monitoring cycle: navigate to the queue, detect
//! session expiry (re-authenticating when credentials are available),
//! enumerate pending cases, select per policy, confirm, publish a status
//! snapshot. The loop only ends on a driver failure or an external stop.

use crate::auth::{same_page, AuthOutcome, AuthenticationFlow};
use crate::error::{MonitorError, Result};
use caseflow_browser::{Driver, ElementId, ElementLocator, UiRole};
use caseflow_core::{
    BotConfig, Credentials, SelectionPolicy, SessionState, StatusSnapshot, Timestamp,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Cycle counter plus last observed case count.
///
/// Only detects change and feeds diagnostics; nothing here survives a
/// process restart.
#[derive(Debug, Default)]
pub struct CycleTracker {
    cycle: u64,
    last_count: usize,
}

/// A change in the observed case count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountChange {
    pub from: usize,
    pub to: usize,
}

impl CycleTracker {
    /// Fresh tracker starting at cycle zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the next cycle and return its number.
    pub fn begin(&mut self) -> u64 {
        self.cycle += 1;
        self.cycle
    }

    /// Record an observed case count; reports a change only when the count
    /// differs from the previous cycle's.
    pub fn observe(&mut self, count: usize) -> Option<CountChange> {
        if count == self.last_count {
            return None;
        }
        let change = CountChange {
            from: self.last_count,
            to: count,
        };
        self.last_count = count;
        Some(change)
    }

    /// Number of the current cycle.
    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }
}

/// What one cycle did.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub session: SessionState,
    pub case_count: usize,
    pub selected: usize,
    pub confirmed: bool,
}

/// The polling loop itself.
pub struct SessionMonitor {
    driver: Arc<dyn Driver>,
    locator: Arc<ElementLocator>,
    auth: AuthenticationFlow,
    credentials: Option<Credentials>,
    config: BotConfig,
    tracker: CycleTracker,
    session: SessionState,
    confirmed_total: u64,
    last_error: Option<String>,
    status_tx: Arc<watch::Sender<StatusSnapshot>>,
}

impl SessionMonitor {
    /// Monitor over a driver, locator and login flow.
    #[must_use]
    pub fn new(
        driver: Arc<dyn Driver>,
        locator: Arc<ElementLocator>,
        auth: AuthenticationFlow,
        credentials: Option<Credentials>,
        config: BotConfig,
        status_tx: Arc<watch::Sender<StatusSnapshot>>,
    ) -> Self {
        Self {
            driver,
            locator,
            auth,
            credentials,
            config,
            tracker: CycleTracker::new(),
            session: SessionState::Unauthenticated,
            confirmed_total: 0,
            last_error: None,
            status_tx,
        }
    }

    /// Run cycles until cancelled or the driver session dies.
    ///
    /// Cancellation is cooperative: it is checked between cycles and during
    /// the inter-cycle sleep, never mid-cycle, so shutdown latency is
    /// bounded by one cycle plus the poll interval.
    pub async fn run(mut self, cancel: CancellationToken) {
        self.publish(true);
        tracing::info!(
            interval_secs = self.config.monitor.poll_interval_secs,
            "monitoring started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.run_cycle().await {
                Ok(report) => {
                    tracing::debug!(
                        cycle = report.cycle,
                        session = %report.session,
                        cases = report.case_count,
                        selected = report.selected,
                        "cycle complete"
                    );
                    self.publish(true);
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "driver failure, monitoring cannot continue");
                    self.last_error = Some(e.to_string());
                    break;
                }
                Err(e) => {
                    // Absorbed: log, publish, breathe, try again next cycle
                    tracing::warn!(error = %e, "cycle failed");
                    self.last_error = Some(e.to_string());
                    self.publish(true);
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(self.config.monitor.recovery_sleep()) => {}
                    }
                    continue;
                }
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.monitor.poll_interval()) => {}
            }
        }

        self.publish(false);
        tracing::info!(cycles = self.tracker.cycle(), "monitoring stopped");
    }

    /// One full monitoring cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let cycle = self.tracker.begin();
        self.last_error = None;
        tracing::debug!(cycle, "starting cycle");

        self.driver.navigate(&self.config.portal.app_url).await?;
        tokio::time::sleep(self.config.monitor.page_settle()).await;

        let current = self.driver.current_url().await?;
        if same_page(&current, &self.config.portal.login_url) {
            return self.handle_expired_session(cycle).await;
        }
        self.session = SessionState::Authenticated;

        self.scan_and_confirm(cycle).await
    }

    /// The session bounced to the login page: re-authenticate when
    /// credentials are available, otherwise back off until the next cycle.
    async fn handle_expired_session(&mut self, cycle: u64) -> Result<CycleReport> {
        if self.session == SessionState::Authenticated {
            tracing::warn!("session expired, bounced to login page");
        }
        self.session = SessionState::Expired;

        let Some(credentials) = self.credentials.clone() else {
            tracing::warn!("no credentials available, waiting before next check");
            tokio::time::sleep(self.config.monitor.auth_backoff()).await;
            return Ok(self.report(cycle, 0, 0, false));
        };

        self.session = SessionState::Authenticating;
        self.publish(true);

        match self.auth.login(&credentials).await {
            Ok(AuthOutcome::Authenticated) => {
                self.session = SessionState::Authenticated;
                tracing::info!("re-authenticated");
                self.driver.navigate(&self.config.portal.app_url).await?;
                tokio::time::sleep(self.config.monitor.page_settle()).await;
                self.scan_and_confirm(cycle).await
            }
            Ok(AuthOutcome::Rejected) => {
                self.session = SessionState::Unauthenticated;
                self.last_error = Some(
                    MonitorError::Authentication("portal rejected the login".to_string())
                        .to_string(),
                );
                tracing::warn!("re-authentication rejected, backing off");
                tokio::time::sleep(self.config.monitor.auth_backoff()).await;
                Ok(self.report(cycle, 0, 0, false))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                self.session = SessionState::Unauthenticated;
                self.last_error = Some(e.to_string());
                tracing::warn!(error = %e, "re-authentication failed, backing off");
                tokio::time::sleep(self.config.monitor.auth_backoff()).await;
                Ok(self.report(cycle, 0, 0, false))
            }
        }
    }

    /// Enumerate pending cases, select per policy, confirm.
    async fn scan_and_confirm(&mut self, cycle: u64) -> Result<CycleReport> {
        let scope = match self.locator.locate(UiRole::CaseTable, None).await {
            Ok(id) => Some(id),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(_) => None,
        };

        let checkboxes = self.locator.locate_all(UiRole::CaseCheckbox, scope).await?;
        let case_count = checkboxes.len();
        if let Some(change) = self.tracker.observe(case_count) {
            tracing::info!(from = change.from, to = change.to, "case count changed");
        }

        if case_count == 0 {
            return Ok(self.report(cycle, 0, 0, false));
        }

        self.enable_activation_switch().await?;

        let selected = self.select_pending(&checkboxes).await?;
        let mut confirmed = false;
        if selected > 0 {
            self.confirm().await?;
            confirmed = true;
            self.confirmed_total += selected as u64;
            tracing::info!(selected, "cases confirmed");
        } else {
            tracing::debug!(case_count, "no unselected cases this cycle");
        }

        Ok(self.report(cycle, case_count, selected, confirmed))
    }

    /// Select pending cases according to the configured policy.
    ///
    /// Selecting an already-selected case is a no-op; a cycle that selects
    /// nothing is not an error, it means no new work is pending.
    async fn select_pending(&self, checkboxes: &[ElementId]) -> Result<usize> {
        let mut selected = 0;
        for &checkbox in checkboxes {
            let info = match self.driver.describe(checkbox).await {
                Ok(info) => info,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    tracing::debug!(error = %e, "skipping undescribable checkbox");
                    continue;
                }
            };
            if info.selected {
                continue;
            }

            self.activate(checkbox).await?;
            selected += 1;

            if self.config.monitor.selection_policy == SelectionPolicy::SelectFirst {
                break;
            }
        }
        Ok(selected)
    }

    /// Turn the activation switch on when the page has one and it is off.
    async fn enable_activation_switch(&self) -> Result<()> {
        let switch = match self.locator.locate(UiRole::ActivationSwitch, None).await {
            Ok(id) => id,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(_) => {
                tracing::debug!("no activation switch on this page");
                return Ok(());
            }
        };

        let info = self.driver.describe(switch).await?;
        if info.attr("aria-checked") == Some("true") {
            return Ok(());
        }

        tracing::info!("enabling activation switch");
        self.activate(switch).await
    }

    /// Locate and click the confirm control.
    async fn confirm(&self) -> Result<()> {
        let button = self.locator.locate(UiRole::ConfirmButton, None).await?;
        self.activate(button).await
    }

    /// Scroll, settle, click with scripted-click fallback.
    async fn activate(&self, element: ElementId) -> Result<()> {
        self.driver.scroll_into_view(element).await?;
        tokio::time::sleep(self.config.monitor.action_settle()).await;
        match self.driver.click(element).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(MonitorError::Browser(e)),
            Err(e) => {
                tracing::warn!(error = %e, "direct click failed, using scripted click");
                self.driver.force_click(element).await?;
                Ok(())
            }
        }
    }

    fn report(&self, cycle: u64, case_count: usize, selected: usize, confirmed: bool) -> CycleReport {
        CycleReport {
            cycle,
            session: self.session,
            case_count,
            selected,
            confirmed,
        }
    }

    fn publish(&self, running: bool) {
        self.status_tx.send_replace(StatusSnapshot {
            running,
            session: self.session,
            last_check: Some(Timestamp::now()),
            cycles: self.tracker.cycle(),
            case_count: self.tracker.last_count,
            confirmed_total: self.confirmed_total,
            error: self.last_error.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_reports_only_transitions() {
        let mut tracker = CycleTracker::new();

        // 0 -> 3 -> 3 -> 0: exactly the two transitions are reported
        assert_eq!(tracker.observe(0), None);
        assert_eq!(
            tracker.observe(3),
            Some(CountChange { from: 0, to: 3 })
        );
        assert_eq!(tracker.observe(3), None);
        assert_eq!(
            tracker.observe(0),
            Some(CountChange { from: 3, to: 0 })
        );
    }

    #[test]
    fn test_tracker_counts_cycles() {
        let mut tracker = CycleTracker::new();
        assert_eq!(tracker.begin(), 1);
        assert_eq!(tracker.begin(), 2);
        assert_eq!(tracker.cycle(), 2);
    }
}
