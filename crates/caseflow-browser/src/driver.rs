//! Browser driver port.
//!
//! The monitor, authentication flow and CAPTCHA resolver all talk to the
//! page through this trait, so the production chromiumoxide backend and the
//! scripted test backend are interchangeable.

use crate::error::Result;
use std::collections::HashMap;
use std::fmt;

/// Opaque handle to an on-page element.
///
/// Handles stay valid until the next navigation or reload, after which any
/// use reports a stale-element error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A single element query descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementQuery {
    /// CSS selector
    Css(String),
    /// XPath expression
    XPath(String),
}

impl ElementQuery {
    /// Shorthand constructor for a CSS query.
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// Shorthand constructor for an XPath query.
    pub fn xpath(expression: impl Into<String>) -> Self {
        Self::XPath(expression.into())
    }
}

impl fmt::Display for ElementQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(s) => write!(f, "css={s}"),
            Self::XPath(s) => write!(f, "xpath={s}"),
        }
    }
}

/// Observable state of an element at the moment of the query.
#[derive(Debug, Clone, Default)]
pub struct ElementInfo {
    /// Rendered and not hidden by CSS
    pub visible: bool,
    /// Not disabled
    pub enabled: bool,
    /// Checked state for checkbox-like inputs
    pub selected: bool,
    /// Rendered width in CSS pixels
    pub width: u32,
    /// Rendered height in CSS pixels
    pub height: u32,
    /// A small set of descriptive attributes (tag, type, name, placeholder,
    /// class, id, aria-checked) for diagnostics and role checks
    pub attrs: HashMap<String, String>,
}

impl ElementInfo {
    /// Attribute lookup helper.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }
}

/// Operations the automation needs from a browser session.
///
/// All calls are blocking from the caller's perspective; there is no
/// parallelism inside a monitoring cycle, each step depends on the DOM
/// state left by the previous one.
#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    /// Navigate the session to `url` and wait for the load to finish.
    /// Invalidates all element handles.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Reload the current page. Invalidates all element handles.
    async fn reload(&self) -> Result<()>;

    /// Address currently shown in the session.
    async fn current_url(&self) -> Result<String>;

    /// Title of the current page.
    async fn title(&self) -> Result<String>;

    /// Enumerate all elements matching `query`.
    ///
    /// `scope` restricts CSS queries to the subtree of the given element;
    /// XPath queries always evaluate from the document root.
    async fn find_all(&self, query: &ElementQuery, scope: Option<ElementId>)
        -> Result<Vec<ElementId>>;

    /// Inspect an element's current visibility, state and geometry.
    async fn describe(&self, id: ElementId) -> Result<ElementInfo>;

    /// Click an element through the driver's input pipeline.
    async fn click(&self, id: ElementId) -> Result<()>;

    /// Click an element by dispatching the event from script. Fallback for
    /// clicks the input pipeline rejects (e.g. intercepted by an overlay).
    async fn force_click(&self, id: ElementId) -> Result<()>;

    /// Clear a form field's value, firing input/change events.
    async fn clear(&self, id: ElementId) -> Result<()>;

    /// Focus a field and type text into it.
    async fn type_text(&self, id: ElementId, text: &str) -> Result<()>;

    /// Capture the element's current rendering as a PNG.
    async fn screenshot(&self, id: ElementId) -> Result<Vec<u8>>;

    /// Scroll the element into the viewport.
    async fn scroll_into_view(&self, id: ElementId) -> Result<()>;

    /// Release the underlying browser session.
    async fn close(&self) -> Result<()>;
}
