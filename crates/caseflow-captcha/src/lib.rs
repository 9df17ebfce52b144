//! CAPTCHA resolution for the portal login.
//!
//! Orchestrates element location, image capture, the preprocessing/
//! extraction pipeline, a refresh-and-retry budget, and the asynchronous
//! manual-entry fallback.

pub mod error;
pub mod manual;
pub mod resolver;

pub use error::{CaptchaError, Result};
pub use manual::{CodeSlot, ManualCodeProvider};
pub use resolver::CaptchaResolver;
