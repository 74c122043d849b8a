//! Headless Chrome session backing the [Browser] trait.

use super::{Browser, BrowserError};
use headless_chrome::protocol::cdp::Page;
use headless_chrome::util::Wait;
use headless_chrome::{LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

/// Chrome idle timeout. Must exceed the longest element wait plus page load time.
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 120;

/// Arguments that keep Chrome's own diagnostics off the terminal.
const QUIET_ARGS: [&str; 2] = ["--disable-logging", "--log-level=3"];

/// Bound for a same-document navigation to report a complete document.
const DOCUMENT_READY_TIMEOUT: Duration = Duration::from_secs(20);

/// Pause after a fragment change so the page's hashchange handlers can swap content.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Launch settings for [ChromeSession].
#[derive(Debug, Clone)]
pub struct ChromeConfig {
    /// Run without a visible window (default true).
    pub headless: bool,
    /// Custom User-Agent passed with `--user-agent`.
    pub user_agent: Option<String>,
    /// How long Chrome may stay idle before the connection is dropped.
    pub idle_timeout: Duration,
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            headless: true,
            user_agent: None,
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }
}

impl ChromeConfig {
    /// Extra command-line arguments for Chrome, in launch order.
    fn chrome_args(&self) -> Vec<String> {
        let mut args: Vec<String> = QUIET_ARGS.iter().map(|s| s.to_string()).collect();
        if let Some(ref ua) = self.user_agent {
            args.push(format!("--user-agent={}", ua));
        }
        args
    }
}

/// One Chrome process with a single tab. Chrome is shut down on [Browser::close] or on drop.
pub struct ChromeSession {
    browser: Option<headless_chrome::Browser>,
    tab: Arc<Tab>,
}

impl ChromeSession {
    /// Start Chrome and open the tab used for every navigation.
    pub fn launch(config: &ChromeConfig) -> Result<Self, BrowserError> {
        // LaunchOptions borrows its args, so the owned strings must outlive the builder.
        let owned_args = config.chrome_args();
        let args: Vec<&OsStr> = owned_args.iter().map(OsStr::new).collect();

        let options = LaunchOptions::default_builder()
            .headless(config.headless)
            .idle_browser_timeout(config.idle_timeout)
            .args(args)
            .build()
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let browser =
            headless_chrome::Browser::new(options).map_err(|e| BrowserError::Launch(e.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|e| BrowserError::Launch(format!("could not open tab: {}", e)))?;
        log::debug!("Chrome launched (headless: {})", config.headless);

        Ok(Self {
            browser: Some(browser),
            tab,
        })
    }

    /// Page.navigate without headless_chrome's lifecycle bookkeeping. A fragment-only change
    /// stays in the same document and fires no lifecycle events, so `wait_until_navigated`
    /// would block until its timeout.
    fn navigate_in_document(&self, url: &str) -> Result<(), BrowserError> {
        let response = self
            .tab
            .call_method(Page::Navigate {
                url: url.to_string(),
                referrer: None,
                transition_Type: None,
                frame_id: None,
                referrer_policy: None,
            })
            .map_err(|e| navigation_error(url, e))?;
        if let Some(error_text) = response.error_text {
            return Err(navigation_error(url, error_text));
        }
        if response.loader_id.is_some() {
            // Chrome chose a full load after all; give the new document time to commit.
            log::debug!("{} started a new document", url);
            std::thread::sleep(SETTLE_DELAY);
        }
        self.wait_for_document_ready(url)
    }

    /// Poll `document.readyState` until "complete", then let hashchange handlers run.
    fn wait_for_document_ready(&self, url: &str) -> Result<(), BrowserError> {
        Wait::new(DOCUMENT_READY_TIMEOUT, Duration::from_millis(100))
            .until(|| {
                let state = self.tab.evaluate("document.readyState", false).ok()?;
                (state.value.as_ref().and_then(|v| v.as_str()) == Some("complete")).then_some(())
            })
            .map_err(|e| navigation_error(url, e))?;
        std::thread::sleep(SETTLE_DELAY);
        Ok(())
    }
}

fn navigation_error(url: &str, reason: impl std::fmt::Display) -> BrowserError {
    BrowserError::Navigation {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

/// URL without its `#fragment`.
fn without_fragment(url: &str) -> &str {
    url.split_once('#').map_or(url, |(head, _)| head)
}

/// Moving from `current` to `target` only changes the fragment of a loaded page.
fn is_same_document(current: &str, target: &str) -> bool {
    !current.is_empty()
        && !current.starts_with("about:")
        && without_fragment(current) == without_fragment(target)
}

impl Browser for ChromeSession {
    fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        let current = self.current_url();
        if is_same_document(&current, url) {
            log::debug!("Fragment navigation from {} to {}", current, url);
            return self.navigate_in_document(url);
        }
        self.tab
            .navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated())
            .map_err(|e| navigation_error(url, e))?;
        Ok(())
    }

    fn current_url(&self) -> String {
        // The tab's cached target URL can lag behind fragment changes; ask the page first.
        match self.tab.evaluate("window.location.href", false) {
            Ok(result) => match result.value.as_ref().and_then(|v| v.as_str()) {
                Some(href) => href.to_string(),
                None => self.tab.get_url(),
            },
            Err(e) => {
                log::debug!("location.href unavailable ({}), using tab URL", e);
                self.tab.get_url()
            }
        }
    }

    fn has_element(&self, selector: &str) -> bool {
        self.tab.find_element(selector).is_ok()
    }

    fn wait_for_attribute(
        &self,
        selector: &str,
        attribute: &str,
        timeout: Duration,
    ) -> Result<String, BrowserError> {
        let element = self
            .tab
            .wait_for_element_with_custom_timeout(selector, timeout)
            .map_err(|e| BrowserError::Timeout {
                selector: selector.to_string(),
                reason: e.to_string(),
            })?;
        element
            .get_attribute_value(attribute)
            .map_err(|e| BrowserError::Session(e.to_string()))?
            .ok_or_else(|| BrowserError::MissingAttribute {
                selector: selector.to_string(),
                attribute: attribute.to_string(),
            })
    }

    fn close(&mut self) -> Result<(), BrowserError> {
        let Some(browser) = self.browser.take() else {
            return Ok(());
        };
        let closed = self.tab.close(false);
        // Dropping the Browser kills the Chrome process even if closing the tab failed.
        drop(browser);
        log::debug!("Chrome session closed");
        closed
            .map(|_| ())
            .map_err(|e| BrowserError::Session(format!("could not close tab: {}", e)))
    }
}
