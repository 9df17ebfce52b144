//! Portal login flow.
//!
//! A single login attempt walks the phases FormLocated, CredentialsFilled,
//! CodeObtained, Submitted; the outcome is decided by inspecting the
//! address after a settle delay. The flow never mutates session state,
//! it only reports the outcome to the monitor.

use crate::error::{MonitorError, Result};
use caseflow_browser::{Driver, ElementId, ElementLocator, UiRole};
use caseflow_captcha::CaptchaResolver;
use caseflow_core::{Credentials, MonitorConfig, PortalConfig};
use std::sync::Arc;
use url::Url;

/// Result of one login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The portal accepted the submission
    Authenticated,
    /// The portal bounced back to the login page
    Rejected,
}

/// Named phases of a login attempt, for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthPhase {
    FormLocated,
    CredentialsFilled,
    CodeObtained,
    Submitted,
}

fn advance(phase: AuthPhase) {
    tracing::debug!(?phase, "login phase");
}

/// Whether `current` points at the same host and page as `target`.
pub(crate) fn same_page(current: &str, target: &str) -> bool {
    match (Url::parse(current), Url::parse(target)) {
        (Ok(current), Ok(target)) => {
            current.host_str() == target.host_str()
                && current
                    .path()
                    .trim_end_matches('/')
                    .starts_with(target.path().trim_end_matches('/'))
        }
        _ => current.starts_with(target),
    }
}

/// Drives the login form.
pub struct AuthenticationFlow {
    driver: Arc<dyn Driver>,
    locator: Arc<ElementLocator>,
    resolver: Arc<CaptchaResolver>,
    portal: PortalConfig,
    timing: MonitorConfig,
}

impl AuthenticationFlow {
    /// Flow over a driver, locator and CAPTCHA resolver.
    #[must_use]
    pub fn new(
        driver: Arc<dyn Driver>,
        locator: Arc<ElementLocator>,
        resolver: Arc<CaptchaResolver>,
        portal: PortalConfig,
        timing: MonitorConfig,
    ) -> Self {
        Self {
            driver,
            locator,
            resolver,
            portal,
            timing,
        }
    }

    /// Run one complete login attempt.
    ///
    /// Idempotent on an already-authenticated session: when the current
    /// address already indicates the application, the attempt reports
    /// success without touching the form. A missing required field is a
    /// hard failure for this attempt; the caller decides whether to retry.
    pub async fn login(&self, credentials: &Credentials) -> Result<AuthOutcome> {
        let current = self.driver.current_url().await?;
        if same_page(&current, &self.portal.app_url) {
            tracing::info!("already authenticated, skipping login form");
            return Ok(AuthOutcome::Authenticated);
        }

        tracing::info!(url = %self.portal.login_url, "navigating to login page");
        self.driver.navigate(&self.portal.login_url).await?;
        tokio::time::sleep(self.timing.page_settle()).await;

        let username_field = self.locator.locate(UiRole::UsernameField, None).await?;
        let password_field = self.locator.locate(UiRole::PasswordField, None).await?;
        let code_field = self.locator.locate(UiRole::CodeField, None).await?;
        advance(AuthPhase::FormLocated);

        // Clear before typing so a retried attempt never doubles up input
        self.fill(username_field, &credentials.username).await?;
        self.fill(password_field, &credentials.password).await?;
        advance(AuthPhase::CredentialsFilled);

        let code = self.resolver.obtain_code().await?;
        self.fill(code_field, &code).await?;
        advance(AuthPhase::CodeObtained);

        let submit = self.locator.locate(UiRole::SubmitLogin, None).await?;
        self.activate(submit).await?;
        advance(AuthPhase::Submitted);

        tokio::time::sleep(self.timing.page_settle()).await;
        let landed = self.driver.current_url().await?;
        if same_page(&landed, &self.portal.login_url) && !same_page(&landed, &self.portal.app_url) {
            tracing::warn!(url = %landed, "still on login page after submission");
            return Ok(AuthOutcome::Rejected);
        }

        tracing::info!(url = %landed, "login accepted");
        Ok(AuthOutcome::Authenticated)
    }

    async fn fill(&self, field: ElementId, text: &str) -> Result<()> {
        self.driver.clear(field).await?;
        self.driver.type_text(field, text).await?;
        Ok(())
    }

    /// Scroll, settle, click; fall back to a script-driven click when the
    /// direct interaction throws.
    async fn activate(&self, element: ElementId) -> Result<()> {
        self.driver.scroll_into_view(element).await?;
        tokio::time::sleep(self.timing.action_settle()).await;
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseflow_browser::fake::{
        CodeCheck, FakeDriver, FakePageBuilder, FormField, LoginRule,
    };
    use caseflow_core::CaptchaConfig;
    use caseflow_vision::ScriptedOcr;

    const LOGIN_URL: &str = "https://portal.example.com/login";
    const APP_URL: &str = "https://portal.example.com/cases";

    #[test]
    fn test_same_page_matching() {
        assert!(same_page("https://portal.example.com/login", LOGIN_URL));
        assert!(same_page("https://portal.example.com/login?next=/cases", LOGIN_URL));
        assert!(!same_page("https://portal.example.com/cases", LOGIN_URL));
        assert!(!same_page("https://other.example.com/login", LOGIN_URL));
    }

    fn portal() -> PortalConfig {
        PortalConfig {
            app_url: APP_URL.to_string(),
            login_url: LOGIN_URL.to_string(),
        }
    }

    fn fast_timing() -> MonitorConfig {
        MonitorConfig {
            page_settle_ms: 0,
            action_settle_ms: 0,
            ..MonitorConfig::default()
        }
    }

    fn blank_captcha_png() -> Vec<u8> {
        let image = image::RgbaImage::from_pixel(90, 32, image::Rgba([255, 255, 255, 255]));
        let mut buffer = std::io::Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, image::ImageFormat::Png)
            .expect("encode captcha png");
        buffer.into_inner()
    }

    fn login_page() -> caseflow_browser::fake::FakePage {
        FakePageBuilder::new(LOGIN_URL, "Sign In")
            .element(|e| {
                e.selector("input[placeholder*='account']")
                    .field(FormField::Username)
            })
            .element(|e| {
                e.selector("input[type='password']")
                    .field(FormField::Password)
            })
            .element(|e| {
                e.selector("input[name='captcha']")
                    .field(FormField::Code)
            })
            .element(|e| e.selector("canvas").size(90, 32).png(blank_captcha_png()))
            .element(|e| e.selector("button[type='submit']").submit_login())
            .build()
    }

    fn flow(driver: Arc<FakeDriver>, engine: ScriptedOcr) -> AuthenticationFlow {
        let locator = Arc::new(ElementLocator::new(driver.clone()));
        let captcha_config = CaptchaConfig {
            capture_settle_ms: 0,
            refresh_settle_ms: 0,
            manual_wait_secs: 1,
            ..CaptchaConfig::default()
        };
        let resolver = Arc::new(CaptchaResolver::new(
            driver.clone(),
            locator.clone(),
            Arc::new(engine),
            captcha_config,
        ));
        AuthenticationFlow::new(driver, locator, resolver, portal(), fast_timing())
    }

    fn credentials() -> Credentials {
        Credentials::new("operator", "secret").expect("valid credentials")
    }

    #[tokio::test]
    async fn test_rejected_when_code_is_wrong() {
        let driver = Arc::new(FakeDriver::with_page(login_page()));
        driver.set_login_rule(LoginRule {
            username: "operator".to_string(),
            password: "secret".to_string(),
            code: CodeCheck::Exact("9999".to_string()),
            app_url: APP_URL.to_string(),
        });
        let flow = flow(driver.clone(), ScriptedOcr::always("1234"));

        let result = flow.login(&credentials()).await;
        // Recognition produced 1234, rule expects 9999 -> still on login page
        assert_eq!(result.ok(), Some(AuthOutcome::Rejected));
        assert_eq!(driver.login_attempts(), 1);
    }

    #[tokio::test]
    async fn test_already_authenticated_is_idempotent() {
        let driver = Arc::new(FakeDriver::with_page(
            FakePageBuilder::new(APP_URL, "Cases").build(),
        ));
        let flow = flow(driver.clone(), ScriptedOcr::failing());

        let outcome = flow.login(&credentials()).await.expect("login");
        assert_eq!(outcome, AuthOutcome::Authenticated);
        // No form was located, nothing was submitted
        assert_eq!(driver.login_attempts(), 0);
        assert_eq!(driver.click_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_form_field_is_a_hard_failure() {
        // Login page without a verification-code input
        let page = FakePageBuilder::new(LOGIN_URL, "Sign In")
            .element(|e| {
                e.selector("input[placeholder*='account']")
                    .field(FormField::Username)
            })
            .element(|e| {
                e.selector("input[type='password']")
                    .field(FormField::Password)
            })
            .build();
        let driver = Arc::new(FakeDriver::with_page(page));
        let flow = flow(driver, ScriptedOcr::always("1234"));

        let result = flow.login(&credentials()).await;
        assert!(matches!(
            result,
            Err(MonitorError::Browser(
                caseflow_browser::BrowserError::ElementNotFound(_)
            ))
        ));
    }
}
