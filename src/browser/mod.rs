//! Browser capability used by the enumerator, and the headless Chrome implementation.
//!
//! The enumerator only needs a handful of operations (navigate, read back the URL, check for
//! an element, wait for an element and read one of its attributes, close). Keeping them behind
//! [Browser] lets the enumeration loop run against a fake page set in tests.

pub mod chrome;

pub use chrome::{ChromeConfig, ChromeSession};

use std::time::Duration;
use thiserror::Error;

/// Errors from a browser session. Navigation and launch failures are fatal for a run.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Could not launch browser: {0}")]
    Launch(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Timed out waiting for element '{selector}': {reason}")]
    Timeout { selector: String, reason: String },

    #[error("Element '{selector}' has no '{attribute}' attribute.")]
    MissingAttribute { selector: String, attribute: String },

    #[error("Browser session error: {0}")]
    Session(String),
}

/// Minimal browser automation surface.
pub trait Browser {
    /// Load `url` and wait for the navigation to settle.
    fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    /// URL the browser settled on after the last navigation (after redirects).
    fn current_url(&self) -> String;

    /// Whether at least one element matches the CSS selector right now. No waiting.
    fn has_element(&self, selector: &str) -> bool;

    /// Wait up to `timeout` for an element matching `selector`, then read `attribute` from it.
    fn wait_for_attribute(
        &self,
        selector: &str,
        attribute: &str,
        timeout: Duration,
    ) -> Result<String, BrowserError>;

    /// Release the session. Called once, whether or not the run succeeded.
    fn close(&mut self) -> Result<(), BrowserError>;
}
