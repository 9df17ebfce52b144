//! Logical element location.
//!
//! Every UI target the bot interacts with is named by a [`UiRole`] and
//! resolved through a data-driven [`LocatorSpec`]: an ordered cascade of
//! queries tried in priority order until one yields a visible (and, where
//! required, enabled) match. Markup drift on the portal is absorbed here
//! instead of at every call site.

use crate::driver::{Driver, ElementId, ElementQuery};
use crate::error::{BrowserError, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Logical UI targets on the portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UiRole {
    /// Account name input on the login form
    UsernameField,
    /// Password input on the login form
    PasswordField,
    /// Verification code input on the login form
    CodeField,
    /// Login submit control
    SubmitLogin,
    /// The CAPTCHA graphic
    CaptchaImage,
    /// Control that redraws the CAPTCHA graphic
    CaptchaRefresh,
    /// Body of the pending-case table
    CaseTable,
    /// Selection checkbox of a pending case row
    CaseCheckbox,
    /// Toggle that must be on before confirming
    ActivationSwitch,
    /// Case confirmation control
    ConfirmButton,
}

impl fmt::Display for UiRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UsernameField => "username field",
            Self::PasswordField => "password field",
            Self::CodeField => "verification code field",
            Self::SubmitLogin => "login submit button",
            Self::CaptchaImage => "captcha graphic",
            Self::CaptchaRefresh => "captcha refresh control",
            Self::CaseTable => "case table body",
            Self::CaseCheckbox => "case checkbox",
            Self::ActivationSwitch => "activation switch",
            Self::ConfirmButton => "confirm button",
        };
        write!(f, "{name}")
    }
}

/// Plausible rendered-size envelope for a role.
///
/// Bounds are exclusive; used to reject oversized matches such as
/// background containers when hunting for the CAPTCHA graphic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeWindow {
    pub min_width: u32,
    pub max_width: u32,
    pub min_height: u32,
    pub max_height: u32,
}

impl SizeWindow {
    /// Whether a rendered size falls inside the window.
    #[must_use]
    pub fn contains(&self, width: u32, height: u32) -> bool {
        width > self.min_width
            && width < self.max_width
            && height > self.min_height
            && height < self.max_height
    }
}

/// Ordered query cascade for one logical role.
///
/// Order encodes priority: the first query yielding an acceptable match wins.
#[derive(Debug, Clone)]
pub struct LocatorSpec {
    /// Candidate queries, highest priority first
    pub queries: Vec<ElementQuery>,
    /// Rendered-size acceptance window, when relevant
    pub size_window: Option<SizeWindow>,
    /// Whether a match must also be enabled
    pub require_enabled: bool,
}

impl LocatorSpec {
    /// Spec with only a query cascade.
    #[must_use]
    pub fn new(queries: Vec<ElementQuery>) -> Self {
        Self {
            queries,
            size_window: None,
            require_enabled: false,
        }
    }

    /// Require matches to be enabled.
    #[must_use]
    pub fn enabled_only(mut self) -> Self {
        self.require_enabled = true;
        self
    }

    /// Constrain matches to a rendered-size window.
    #[must_use]
    pub fn sized(mut self, window: SizeWindow) -> Self {
        self.size_window = Some(window);
        self
    }
}

/// Default role table for the portal's markup.
static DEFAULT_SPECS: Lazy<HashMap<UiRole, LocatorSpec>> = Lazy::new(|| {
    use ElementQuery as Q;
    let mut specs = HashMap::new();

    specs.insert(
        UiRole::UsernameField,
        LocatorSpec::new(vec![
            Q::css("input[placeholder*='account']"),
            Q::css("input[placeholder*='Account']"),
            Q::css("input[name='username']"),
            Q::css("input[name='account']"),
            Q::css("input[type='text']"),
        ]),
    );

    specs.insert(
        UiRole::PasswordField,
        LocatorSpec::new(vec![
            Q::css("input[placeholder*='password']"),
            Q::css("input[placeholder*='Password']"),
            Q::css("input[name='password']"),
            Q::css("input[type='password']"),
        ]),
    );

    specs.insert(
        UiRole::CodeField,
        LocatorSpec::new(vec![
            Q::css("input[placeholder*='verification']"),
            Q::css("input[placeholder*='Verification']"),
            Q::css("input[name='verification']"),
            Q::css("input[name='captcha']"),
        ]),
    );

    specs.insert(
        UiRole::SubmitLogin,
        LocatorSpec::new(vec![
            Q::xpath("//button[contains(text(), 'Sign In')]"),
            Q::xpath("//input[@value='Sign In']"),
            Q::xpath("//button[contains(text(), 'Login')]"),
            Q::css("button[type='submit']"),
            Q::css("input[type='submit']"),
        ])
        .enabled_only(),
    );

    specs.insert(
        UiRole::CaptchaImage,
        LocatorSpec::new(vec![
            Q::css("canvas"),
            Q::css("img[src*='captcha']"),
            Q::css("img[src*='verification']"),
            Q::css("img[alt*='captcha']"),
            Q::css("img[alt*='verification']"),
        ])
        .sized(SizeWindow {
            min_width: 20,
            max_width: 200,
            min_height: 10,
            max_height: 100,
        }),
    );

    specs.insert(
        UiRole::CaptchaRefresh,
        LocatorSpec::new(vec![
            Q::css("button[title*='refresh']"),
            Q::css("button[title*='Refresh']"),
            Q::css("button[class*='refresh']"),
            Q::css("button[class*='reload']"),
            Q::css("img[alt*='refresh']"),
            Q::css("a[href*='captcha']"),
        ]),
    );

    specs.insert(
        UiRole::CaseTable,
        LocatorSpec::new(vec![
            Q::css("div.ant-table-container tbody"),
            Q::css("div[class*='ant-table'] tbody"),
            Q::css("table tbody"),
        ]),
    );

    specs.insert(
        UiRole::CaseCheckbox,
        LocatorSpec::new(vec![
            Q::css("input.ant-checkbox-input"),
            Q::css("input[type='checkbox']"),
            Q::xpath("//div[contains(@class, 'ant-table')]//input[@type='checkbox']"),
            Q::xpath("//input[@type='checkbox']"),
        ]),
    );

    specs.insert(
        UiRole::ActivationSwitch,
        LocatorSpec::new(vec![
            Q::css("button[role='switch']"),
            Q::css("button.ant-switch"),
            Q::xpath("//button[@role='switch']"),
        ]),
    );

    specs.insert(
        UiRole::ConfirmButton,
        LocatorSpec::new(vec![
            Q::xpath("//button[contains(@class, 'Confirm_bottom')]"),
            Q::xpath("//button[.//span[text()='Confirm']]"),
            Q::xpath("//button[contains(text(), 'Confirm')]"),
            Q::css("button.ant-btn-primary"),
            Q::xpath("//input[@value='Confirm']"),
        ])
        .enabled_only(),
    );

    specs
});

/// Resolves logical roles to concrete elements.
///
/// The locator only queries; scrolling and clicking stay with the caller.
pub struct ElementLocator {
    driver: Arc<dyn Driver>,
    specs: HashMap<UiRole, LocatorSpec>,
}

impl ElementLocator {
    /// Locator over the default role table.
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            specs: DEFAULT_SPECS.clone(),
        }
    }

    /// Locator with a custom role table.
    #[must_use]
    pub fn with_specs(driver: Arc<dyn Driver>, specs: HashMap<UiRole, LocatorSpec>) -> Self {
        Self { driver, specs }
    }

    /// Resolve a role to the first acceptable match.
    ///
    /// Walks the role's query cascade in priority order; within a query,
    /// matches are checked in document order. Exhaustion yields
    /// [`BrowserError::ElementNotFound`] after logging diagnostic context;
    /// callers must treat that as recoverable.
    pub async fn locate(&self, role: UiRole, scope: Option<ElementId>) -> Result<ElementId> {
        let matches = self.collect(role, scope, true).await?;
        match matches.into_iter().next() {
            Some(id) => Ok(id),
            None => {
                self.log_page_diagnostics(role).await;
                Err(BrowserError::ElementNotFound(role.to_string()))
            }
        }
    }

    /// Resolve a role to every acceptable match of the winning query.
    ///
    /// An empty result is not an error here; enumeration roles (case
    /// checkboxes) legitimately match nothing when no work is pending.
    pub async fn locate_all(&self, role: UiRole, scope: Option<ElementId>) -> Result<Vec<ElementId>> {
        let matches = self.collect(role, scope, false).await?;
        if matches.is_empty() {
            tracing::debug!(%role, "no matches for enumeration role");
        }
        Ok(matches)
    }

    async fn collect(
        &self,
        role: UiRole,
        scope: Option<ElementId>,
        first_only: bool,
    ) -> Result<Vec<ElementId>> {
        let Some(spec) = self.specs.get(&role) else {
            return Ok(Vec::new());
        };

        for query in &spec.queries {
            let candidates = self.driver.find_all(query, scope).await?;
            if candidates.is_empty() {
                continue;
            }
            tracing::trace!(%role, %query, count = candidates.len(), "query matched");

            let mut accepted = Vec::new();
            for id in candidates {
                let info = match self.driver.describe(id).await {
                    Ok(info) => info,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        tracing::debug!(%role, %id, error = %e, "skipping undescribable match");
                        continue;
                    }
                };

                if !info.visible {
                    continue;
                }
                if spec.require_enabled && !info.enabled {
                    continue;
                }
                if let Some(window) = &spec.size_window {
                    if !window.contains(info.width, info.height) {
                        tracing::trace!(
                            %role,
                            width = info.width,
                            height = info.height,
                            "match outside size window"
                        );
                        continue;
                    }
                }

                accepted.push(id);
                if first_only {
                    break;
                }
            }

            if !accepted.is_empty() {
                tracing::debug!(%role, %query, count = accepted.len(), "role located");
                return Ok(accepted);
            }
        }

        Ok(Vec::new())
    }

    /// Log where the lookup happened and what inputs the page does have,
    /// so a layout change is diagnosable from the logs alone.
    async fn log_page_diagnostics(&self, role: UiRole) {
        let url = self.driver.current_url().await.unwrap_or_default();
        let title = self.driver.title().await.unwrap_or_default();
        let inputs = self
            .driver
            .find_all(&ElementQuery::css("input"), None)
            .await
            .unwrap_or_default();

        tracing::warn!(
            %role,
            input_count = inputs.len(),
            url = %url,
            title = %title,
            "role not found on page"
        );

        for id in inputs {
            if let Ok(info) = self.driver.describe(id).await {
                if info.visible {
                    tracing::debug!(
                        input_type = info.attr("type").unwrap_or(""),
                        name = info.attr("name").unwrap_or(""),
                        placeholder = info.attr("placeholder").unwrap_or(""),
                        "visible input on page"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeDriver, FakePageBuilder};

    fn login_driver() -> Arc<FakeDriver> {
        let page = FakePageBuilder::new("https://portal.example.com/login", "Sign In")
            .element(|e| {
                e.selector("input[placeholder*='account']")
                    .selector("input")
                    .attr("placeholder", "Please input account")
                    .size(200, 30)
            })
            .element(|e| {
                e.selector("input[type='password']")
                    .selector("input")
                    .size(200, 30)
            })
            .build();
        Arc::new(FakeDriver::with_page(page))
    }

    #[tokio::test]
    async fn test_locate_returns_first_matching_query() {
        let driver = login_driver();
        let locator = ElementLocator::new(driver.clone());

        let id = locator
            .locate(UiRole::UsernameField, None)
            .await
            .expect("locate username field");
        let info = driver.describe(id).await.expect("describe located element");
        assert_eq!(info.attr("placeholder"), Some("Please input account"));
    }

    #[tokio::test]
    async fn test_locate_falls_through_to_lower_priority_query() {
        let driver = login_driver();
        let locator = ElementLocator::new(driver.clone());

        // No input[placeholder*='password'] on the page, so the cascade
        // lands on input[type='password']
        let id = locator.locate(UiRole::PasswordField, None).await;
        assert!(id.is_ok());
    }

    #[tokio::test]
    async fn test_locate_skips_invisible_matches() {
        let page = FakePageBuilder::new("https://portal.example.com/login", "Sign In")
            .element(|e| e.selector("input[type='password']").invisible())
            .element(|e| e.selector("input[name='password']").attr("name", "password").size(200, 30))
            .build();
        let driver = Arc::new(FakeDriver::with_page(page));
        let locator = ElementLocator::new(driver.clone());

        let id = locator
            .locate(UiRole::PasswordField, None)
            .await
            .expect("locate visible password field");
        let info = driver.describe(id).await.expect("describe element");
        assert_eq!(info.attr("name"), Some("password"));
    }

    #[tokio::test]
    async fn test_exhausted_cascade_is_not_found_not_a_panic() {
        let page = FakePageBuilder::new("https://portal.example.com/cases", "Cases").build();
        let driver = Arc::new(FakeDriver::with_page(page));
        let locator = ElementLocator::new(driver);

        let result = locator.locate(UiRole::UsernameField, None).await;
        assert!(matches!(result, Err(BrowserError::ElementNotFound(_))));
    }

    #[tokio::test]
    async fn test_size_window_rejects_oversized_matches() {
        let page = FakePageBuilder::new("https://portal.example.com/login", "Sign In")
            // A full-width canvas background, far too large to be a code
            .element(|e| e.selector("canvas").size(1920, 600))
            // The actual CAPTCHA graphic
            .element(|e| e.selector("canvas").size(90, 32).attr("id", "code"))
            .build();
        let driver = Arc::new(FakeDriver::with_page(page));
        let locator = ElementLocator::new(driver.clone());

        let id = locator
            .locate(UiRole::CaptchaImage, None)
            .await
            .expect("locate captcha graphic");
        let info = driver.describe(id).await.expect("describe element");
        assert_eq!(info.attr("id"), Some("code"));
    }

    #[tokio::test]
    async fn test_locate_all_returns_every_acceptable_match() {
        let page = FakePageBuilder::new("https://portal.example.com/cases", "Cases")
            .element(|e| e.selector("input[type='checkbox']").checkbox())
            .element(|e| e.selector("input[type='checkbox']").checkbox())
            .element(|e| e.selector("input[type='checkbox']").checkbox().invisible())
            .build();
        let driver = Arc::new(FakeDriver::with_page(page));
        let locator = ElementLocator::new(driver);

        let ids = locator
            .locate_all(UiRole::CaseCheckbox, None)
            .await
            .expect("enumerate checkboxes");
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn test_locate_all_empty_is_ok() {
        let page = FakePageBuilder::new("https://portal.example.com/cases", "Cases").build();
        let driver = Arc::new(FakeDriver::with_page(page));
        let locator = ElementLocator::new(driver);

        let ids = locator
            .locate_all(UiRole::CaseCheckbox, None)
            .await
            .expect("enumerate checkboxes");
        assert!(ids.is_empty());
    }
}
