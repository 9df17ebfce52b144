//! Bot facade for the control surface.
//!
//! Owns the driver session and the background monitoring task. `start`
//! spawns the loop and returns immediately; `stop` cancels it and releases
//! the driver; `run_once` performs exactly one confirm cycle synchronously;
//! `status` reads the latest published snapshot.

use crate::auth::AuthenticationFlow;
use crate::error::{MonitorError, Result};
use crate::monitor::SessionMonitor;
use caseflow_browser::{ChromiumDriver, Driver, ElementLocator};
use caseflow_captcha::{CaptchaResolver, CodeSlot};
use caseflow_core::{BotConfig, Credentials, StatusSnapshot};
use caseflow_vision::{OcrEngine, TesseractOcr};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct RunningMonitor {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// The case-confirmation bot.
///
/// One instance owns one browser-driver session; it is not safe for
/// concurrent monitoring. After a driver failure, recovery requires
/// `stop` followed by a freshly constructed bot.
pub struct CaseBot {
    driver: Arc<dyn Driver>,
    engine: Arc<dyn OcrEngine>,
    config: BotConfig,
    code_slot: Arc<CodeSlot>,
    status_tx: Arc<watch::Sender<StatusSnapshot>>,
    status_rx: watch::Receiver<StatusSnapshot>,
    running: Mutex<Option<RunningMonitor>>,
}

impl CaseBot {
    /// Bot over an injected driver and OCR engine.
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>, engine: Arc<dyn OcrEngine>, config: BotConfig) -> Self {
        let (status_tx, status_rx) = watch::channel(StatusSnapshot::idle());
        Self {
            driver,
            engine,
            config,
            code_slot: CodeSlot::new(),
            status_tx: Arc::new(status_tx),
            status_rx,
            running: Mutex::new(None),
        }
    }

    /// Launch a Chromium session and a tesseract-backed engine from config.
    pub async fn launch(config: BotConfig) -> Result<Self> {
        config.validate()?;

        let driver = Arc::new(ChromiumDriver::launch(&config.browser).await?);

        let engine = TesseractOcr::new(&config.ocr);
        if let Err(e) = engine.probe().await {
            // The bot still works through manual code entry
            tracing::warn!(error = %e, "OCR engine unavailable, captcha reading will not work");
        }

        Ok(Self::new(driver, Arc::new(engine), config))
    }

    /// Start continuous monitoring in the background.
    ///
    /// Returns as soon as the task is spawned; progress is observable
    /// through [`CaseBot::status`].
    pub async fn start(&self, credentials: Credentials) -> Result<()> {
        let mut guard = self.running.lock().await;
        if guard.is_some() {
            return Err(MonitorError::AlreadyRunning);
        }

        let monitor = self.build_monitor(Some(credentials));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(monitor.run(cancel.clone()));
        *guard = Some(RunningMonitor { cancel, task });

        tracing::info!("bot started");
        Ok(())
    }

    /// Stop monitoring and release the driver session.
    pub async fn stop(&self) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Err(MonitorError::NotRunning);
        };

        running.cancel.cancel();
        let _ = running.task.await;
        self.driver.close().await?;

        tracing::info!("bot stopped");
        Ok(())
    }

    /// Perform exactly one confirm cycle and report whether a confirmation
    /// happened. Refused while the background loop holds the session.
    pub async fn run_once(&self, credentials: Option<Credentials>) -> Result<bool> {
        let guard = self.running.lock().await;
        if guard.is_some() {
            return Err(MonitorError::AlreadyRunning);
        }
        drop(guard);

        let mut monitor = self.build_monitor(credentials);
        let report = monitor.run_cycle().await?;
        Ok(report.confirmed)
    }

    /// Latest published status snapshot.
    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        self.status_rx.borrow().clone()
    }

    /// The pending-input slot for manually supplied CAPTCHA codes.
    #[must_use]
    pub fn code_slot(&self) -> Arc<CodeSlot> {
        self.code_slot.clone()
    }

    fn build_monitor(&self, credentials: Option<Credentials>) -> SessionMonitor {
        let locator = Arc::new(ElementLocator::new(self.driver.clone()));
        let resolver = Arc::new(
            CaptchaResolver::new(
                self.driver.clone(),
                locator.clone(),
                self.engine.clone(),
                self.config.captcha.clone(),
            )
            .with_manual_fallback(self.code_slot.clone()),
        );
        let auth = AuthenticationFlow::new(
            self.driver.clone(),
            locator.clone(),
            resolver,
            self.config.portal.clone(),
            self.config.monitor.clone(),
        );
        SessionMonitor::new(
            self.driver.clone(),
            locator,
            auth,
            credentials,
            self.config.clone(),
            self.status_tx.clone(),
        )
    }
}
