//! Scripted in-memory driver for tests.
//!
//! Models just enough of the portal to exercise the locator, the CAPTCHA
//! resolver and the monitoring loop without a live browser: pages keyed by
//! URL, a login-redirect rule, toggleable checkboxes and recorded
//! interaction logs.

use crate::driver::{Driver, ElementId, ElementInfo, ElementQuery};
use crate::error::{BrowserError, Result};
use std::collections::HashMap;
use std::sync::Mutex;

/// What clicking an element does to the scripted portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickBehavior {
    /// Nothing beyond being recorded
    Inert,
    /// Flip the element's checked state
    ToggleCheck,
    /// Evaluate the login rule against the typed form values
    SubmitLogin,
    /// Count as a CAPTCHA refresh
    RefreshCaptcha,
    /// Count as a confirmation; checked cases disappear from the page
    Confirm,
}

/// Which login-form value an element carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    Username,
    Password,
    Code,
}

/// One scripted element.
#[derive(Debug, Clone)]
pub struct FakeElement {
    selectors: Vec<String>,
    visible: bool,
    enabled: bool,
    checked: bool,
    width: u32,
    height: u32,
    attrs: HashMap<String, String>,
    png: Vec<u8>,
    behavior: ClickBehavior,
    field: Option<FormField>,
    value: String,
    click_rejected: bool,
}

impl Default for FakeElement {
    fn default() -> Self {
        Self {
            selectors: Vec::new(),
            visible: true,
            enabled: true,
            checked: false,
            width: 100,
            height: 30,
            attrs: HashMap::new(),
            png: Vec::new(),
            behavior: ClickBehavior::Inert,
            field: None,
            value: String::new(),
            click_rejected: false,
        }
    }
}

/// Builder for a scripted element.
#[derive(Debug, Default)]
pub struct FakeElementBuilder {
    element: FakeElement,
}

impl FakeElementBuilder {
    /// Register a raw query string this element matches.
    #[must_use]
    pub fn selector(mut self, selector: &str) -> Self {
        self.element.selectors.push(selector.to_string());
        self
    }

    /// Set an attribute reported by `describe`.
    #[must_use]
    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.element.attrs.insert(name.to_string(), value.to_string());
        self
    }

    /// Set the rendered size.
    #[must_use]
    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.element.width = width;
        self.element.height = height;
        self
    }

    /// Mark the element as not rendered.
    #[must_use]
    pub fn invisible(mut self) -> Self {
        self.element.visible = false;
        self
    }

    /// Mark the element as disabled.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.element.enabled = false;
        self
    }

    /// Mark the element as already checked.
    #[must_use]
    pub fn checked(mut self) -> Self {
        self.element.checked = true;
        self
    }

    /// Make the element a toggleable case checkbox.
    #[must_use]
    pub fn checkbox(mut self) -> Self {
        self.element.behavior = ClickBehavior::ToggleCheck;
        self.element
            .attrs
            .insert("type".to_string(), "checkbox".to_string());
        self
    }

    /// Make the element a toggleable switch (not a case checkbox).
    #[must_use]
    pub fn toggle_switch(mut self) -> Self {
        self.element.behavior = ClickBehavior::ToggleCheck;
        self.element
            .attrs
            .insert("role".to_string(), "switch".to_string());
        self.element
            .attrs
            .insert("aria-checked".to_string(), "false".to_string());
        self
    }

    /// Make the element the login submit control.
    #[must_use]
    pub fn submit_login(mut self) -> Self {
        self.element.behavior = ClickBehavior::SubmitLogin;
        self
    }

    /// Make the element a CAPTCHA refresh control.
    #[must_use]
    pub fn refresh_control(mut self) -> Self {
        self.element.behavior = ClickBehavior::RefreshCaptcha;
        self
    }

    /// Make the element the case confirm control.
    #[must_use]
    pub fn confirm_control(mut self) -> Self {
        self.element.behavior = ClickBehavior::Confirm;
        self
    }

    /// Bind the element to a login-form field.
    #[must_use]
    pub fn field(mut self, field: FormField) -> Self {
        self.element.field = Some(field);
        self
    }

    /// Set the PNG bytes returned by `screenshot`.
    #[must_use]
    pub fn png(mut self, bytes: Vec<u8>) -> Self {
        self.element.png = bytes;
        self
    }

    /// Reject regular clicks (an overlay intercepts them); scripted clicks
    /// still land.
    #[must_use]
    pub fn click_intercepted(mut self) -> Self {
        self.element.click_rejected = true;
        self
    }
}

/// One scripted page.
#[derive(Debug, Clone)]
pub struct FakePage {
    url: String,
    title: String,
    elements: Vec<FakeElement>,
}

/// Builder for a scripted page.
pub struct FakePageBuilder {
    page: FakePage,
}

impl FakePageBuilder {
    /// Page at `url` with the given title.
    #[must_use]
    pub fn new(url: &str, title: &str) -> Self {
        Self {
            page: FakePage {
                url: url.to_string(),
                title: title.to_string(),
                elements: Vec::new(),
            },
        }
    }

    /// Add an element through its builder.
    #[must_use]
    pub fn element(mut self, build: impl FnOnce(FakeElementBuilder) -> FakeElementBuilder) -> Self {
        let built = build(FakeElementBuilder::default());
        self.page.elements.push(built.element);
        self
    }

    /// Finish the page.
    #[must_use]
    pub fn build(self) -> FakePage {
        self.page
    }
}

/// How the login rule validates the typed verification code.
#[derive(Debug, Clone)]
pub enum CodeCheck {
    /// The code must match exactly
    Exact(String),
    /// Any code of this length passes
    Length(usize),
}

/// Credentials and destination for a successful scripted login.
#[derive(Debug, Clone)]
pub struct LoginRule {
    pub username: String,
    pub password: String,
    pub code: CodeCheck,
    pub app_url: String,
}

#[derive(Debug, Default)]
struct InteractionLog {
    clicks: Vec<u64>,
    forced_clicks: Vec<u64>,
    refreshes: u32,
    reloads: u32,
    confirms: u32,
    login_attempts: u32,
}

struct FakeState {
    pages: HashMap<String, FakePage>,
    current: String,
    redirects: HashMap<String, String>,
    login: Option<LoginRule>,
    authenticated: bool,
    handles: HashMap<u64, (String, usize)>,
    next_id: u64,
    log: InteractionLog,
    closed: bool,
}

/// Scripted driver implementing the [`Driver`] port.
pub struct FakeDriver {
    state: Mutex<FakeState>,
}

impl FakeDriver {
    /// Empty driver with no pages.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                pages: HashMap::new(),
                current: String::new(),
                redirects: HashMap::new(),
                login: None,
                authenticated: false,
                handles: HashMap::new(),
                next_id: 1,
                log: InteractionLog::default(),
                closed: false,
            }),
        }
    }

    /// Driver with a single page, already current.
    #[must_use]
    pub fn with_page(page: FakePage) -> Self {
        let driver = Self::new();
        {
            let mut state = driver.state.lock().expect("fake driver state");
            state.current = page.url.clone();
            state.pages.insert(page.url.clone(), page);
        }
        driver
    }

    /// Add or replace a page.
    pub fn add_page(&self, page: FakePage) {
        let mut state = self.state.lock().expect("fake driver state");
        state.pages.insert(page.url.clone(), page);
    }

    /// Redirect navigations to `from` onto `to` while unauthenticated.
    pub fn redirect_while_logged_out(&self, from: &str, to: &str) {
        let mut state = self.state.lock().expect("fake driver state");
        state.redirects.insert(from.to_string(), to.to_string());
    }

    /// Install the login rule evaluated by submit clicks.
    pub fn set_login_rule(&self, rule: LoginRule) {
        let mut state = self.state.lock().expect("fake driver state");
        state.login = Some(rule);
    }

    /// Drop the session back to unauthenticated.
    pub fn expire_session(&self) {
        let mut state = self.state.lock().expect("fake driver state");
        state.authenticated = false;
    }

    /// Whether the scripted login has succeeded.
    #[must_use]
    pub fn authenticated(&self) -> bool {
        self.state.lock().expect("fake driver state").authenticated
    }

    /// Number of CAPTCHA refresh clicks observed.
    #[must_use]
    pub fn refresh_count(&self) -> u32 {
        self.state.lock().expect("fake driver state").log.refreshes
    }

    /// Number of page reloads observed.
    #[must_use]
    pub fn reload_count(&self) -> u32 {
        self.state.lock().expect("fake driver state").log.reloads
    }

    /// Number of confirm clicks observed.
    #[must_use]
    pub fn confirm_count(&self) -> u32 {
        self.state.lock().expect("fake driver state").log.confirms
    }

    /// Number of login submissions observed.
    #[must_use]
    pub fn login_attempts(&self) -> u32 {
        self.state.lock().expect("fake driver state").log.login_attempts
    }

    /// Number of clicks through the regular input path.
    #[must_use]
    pub fn click_count(&self) -> usize {
        self.state.lock().expect("fake driver state").log.clicks.len()
    }

    /// Number of script-dispatched clicks.
    #[must_use]
    pub fn forced_click_count(&self) -> usize {
        self.state
            .lock()
            .expect("fake driver state")
            .log
            .forced_clicks
            .len()
    }

    /// Checked case checkboxes on the current page (switches excluded).
    #[must_use]
    pub fn checked_count(&self) -> usize {
        let state = self.state.lock().expect("fake driver state");
        state
            .pages
            .get(&state.current)
            .map(|page| {
                page.elements
                    .iter()
                    .filter(|e| {
                        e.checked
                            && e.attrs.get("type").map(String::as_str) == Some("checkbox")
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    /// Current value of the first element matching `selector`.
    #[must_use]
    pub fn typed_value(&self, selector: &str) -> Option<String> {
        let state = self.state.lock().expect("fake driver state");
        let page = state.pages.get(&state.current)?;
        page.elements
            .iter()
            .find(|e| e.selectors.iter().any(|s| s == selector))
            .map(|e| e.value.clone())
    }

    fn apply_click(state: &mut FakeState, id: u64, forced: bool) -> Result<()> {
        if forced {
            state.log.forced_clicks.push(id);
        } else {
            state.log.clicks.push(id);
        }

        let (url, index) = state
            .handles
            .get(&id)
            .cloned()
            .ok_or(BrowserError::StaleElement(id))?;

        let behavior = {
            let page = state
                .pages
                .get_mut(&url)
                .ok_or(BrowserError::StaleElement(id))?;
            let element = page
                .elements
                .get_mut(index)
                .ok_or(BrowserError::StaleElement(id))?;
            if element.click_rejected && !forced {
                return Err(BrowserError::Interaction(
                    "click intercepted by overlay".to_string(),
                ));
            }
            match element.behavior {
                ClickBehavior::ToggleCheck => {
                    element.checked = !element.checked;
                    element
                        .attrs
                        .insert("aria-checked".to_string(), element.checked.to_string());
                    return Ok(());
                }
                ref other => other.clone(),
            }
        };

        match behavior {
            ClickBehavior::Inert => {}
            ClickBehavior::RefreshCaptcha => {
                state.log.refreshes += 1;
            }
            ClickBehavior::Confirm => {
                state.log.confirms += 1;
                // Confirmed cases leave the queue; toggles that are not
                // case checkboxes (e.g. a switch) stay put
                if let Some(page) = state.pages.get_mut(&url) {
                    page.elements.retain(|e| {
                        !(e.behavior == ClickBehavior::ToggleCheck
                            && e.checked
                            && e.attrs.get("type").map(String::as_str) == Some("checkbox"))
                    });
                }
            }
            ClickBehavior::SubmitLogin => {
                state.log.login_attempts += 1;
                Self::evaluate_login(state, &url);
            }
            ClickBehavior::ToggleCheck => unreachable!("handled above"),
        }

        Ok(())
    }

    fn evaluate_login(state: &mut FakeState, page_url: &str) {
        let Some(rule) = state.login.clone() else {
            return;
        };
        let Some(page) = state.pages.get(page_url) else {
            return;
        };

        let value_of = |field: FormField| {
            page.elements
                .iter()
                .find(|e| e.field == Some(field))
                .map(|e| e.value.clone())
                .unwrap_or_default()
        };

        let code = value_of(FormField::Code);
        let code_ok = match &rule.code {
            CodeCheck::Exact(expected) => code == *expected,
            CodeCheck::Length(len) => code.len() == *len && code.chars().all(|c| c.is_ascii_digit()),
        };

        if value_of(FormField::Username) == rule.username
            && value_of(FormField::Password) == rule.password
            && code_ok
        {
            state.authenticated = true;
            state.handles.clear();
            state.current = rule.app_url;
        }
    }

    fn ensure_open(state: &FakeState) -> Result<()> {
        if state.closed {
            return Err(BrowserError::Driver("session closed".to_string()));
        }
        Ok(())
    }
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Driver for FakeDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        let mut state = self.state.lock().expect("fake driver state");
        Self::ensure_open(&state)?;
        state.handles.clear();
        let target = if !state.authenticated {
            state.redirects.get(url).cloned().unwrap_or_else(|| url.to_string())
        } else {
            url.to_string()
        };
        state.current = target;
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        let mut state = self.state.lock().expect("fake driver state");
        Self::ensure_open(&state)?;
        state.handles.clear();
        state.log.reloads += 1;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let state = self.state.lock().expect("fake driver state");
        Self::ensure_open(&state)?;
        Ok(state.current.clone())
    }

    async fn title(&self) -> Result<String> {
        let state = self.state.lock().expect("fake driver state");
        Self::ensure_open(&state)?;
        Ok(state
            .pages
            .get(&state.current)
            .map(|p| p.title.clone())
            .unwrap_or_default())
    }

    async fn find_all(
        &self,
        query: &ElementQuery,
        _scope: Option<ElementId>,
    ) -> Result<Vec<ElementId>> {
        let mut state = self.state.lock().expect("fake driver state");
        Self::ensure_open(&state)?;

        let raw = match query {
            ElementQuery::Css(s) | ElementQuery::XPath(s) => s.clone(),
        };

        let current = state.current.clone();
        let indexes: Vec<usize> = state
            .pages
            .get(&current)
            .map(|page| {
                page.elements
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.selectors.iter().any(|s| *s == raw))
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default();

        let mut ids = Vec::with_capacity(indexes.len());
        for index in indexes {
            let id = state.next_id;
            state.next_id += 1;
            state.handles.insert(id, (current.clone(), index));
            ids.push(ElementId(id));
        }
        Ok(ids)
    }

    async fn describe(&self, id: ElementId) -> Result<ElementInfo> {
        let state = self.state.lock().expect("fake driver state");
        Self::ensure_open(&state)?;
        let (url, index) = state
            .handles
            .get(&id.0)
            .cloned()
            .ok_or(BrowserError::StaleElement(id.0))?;
        let element = state
            .pages
            .get(&url)
            .and_then(|p| p.elements.get(index))
            .ok_or(BrowserError::StaleElement(id.0))?;

        Ok(ElementInfo {
            visible: element.visible,
            enabled: element.enabled,
            selected: element.checked,
            width: element.width,
            height: element.height,
            attrs: element.attrs.clone(),
        })
    }

    async fn click(&self, id: ElementId) -> Result<()> {
        let mut state = self.state.lock().expect("fake driver state");
        Self::ensure_open(&state)?;
        Self::apply_click(&mut state, id.0, false)
    }

    async fn force_click(&self, id: ElementId) -> Result<()> {
        let mut state = self.state.lock().expect("fake driver state");
        Self::ensure_open(&state)?;
        Self::apply_click(&mut state, id.0, true)
    }

    async fn clear(&self, id: ElementId) -> Result<()> {
        let mut state = self.state.lock().expect("fake driver state");
        Self::ensure_open(&state)?;
        let (url, index) = state
            .handles
            .get(&id.0)
            .cloned()
            .ok_or(BrowserError::StaleElement(id.0))?;
        if let Some(element) = state
            .pages
            .get_mut(&url)
            .and_then(|p| p.elements.get_mut(index))
        {
            element.value.clear();
        }
        Ok(())
    }

    async fn type_text(&self, id: ElementId, text: &str) -> Result<()> {
        let mut state = self.state.lock().expect("fake driver state");
        Self::ensure_open(&state)?;
        let (url, index) = state
            .handles
            .get(&id.0)
            .cloned()
            .ok_or(BrowserError::StaleElement(id.0))?;
        if let Some(element) = state
            .pages
            .get_mut(&url)
            .and_then(|p| p.elements.get_mut(index))
        {
            // Keystrokes append; callers clear first if they mean to replace
            element.value.push_str(text);
        }
        Ok(())
    }

    async fn screenshot(&self, id: ElementId) -> Result<Vec<u8>> {
        let state = self.state.lock().expect("fake driver state");
        Self::ensure_open(&state)?;
        let (url, index) = state
            .handles
            .get(&id.0)
            .cloned()
            .ok_or(BrowserError::StaleElement(id.0))?;
        state
            .pages
            .get(&url)
            .and_then(|p| p.elements.get(index))
            .map(|e| e.png.clone())
            .ok_or(BrowserError::StaleElement(id.0))
    }

    async fn scroll_into_view(&self, _id: ElementId) -> Result<()> {
        let state = self.state.lock().expect("fake driver state");
        Self::ensure_open(&state)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().expect("fake driver state");
        state.closed = true;
        state.handles.clear();
        Ok(())
    }
}
