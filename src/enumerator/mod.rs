//! Episode enumeration: visit `#item=N` pages in order until the site stops honoring the index.
//!
//! Each index is loaded in the browser. The index is a valid episode when the page carries the
//! `og:video` marker and the browser did not redirect away from the requested URL. For a valid
//! episode the video `<source>` element is awaited and the last path segment of its `src` is
//! collected. The first invalid index ends the run.

use crate::browser::{Browser, BrowserError};
use std::time::Duration;
use thiserror::Error;

/// Marker meta tag of pages hosting a playable video.
pub const DEFAULT_MARKER_SELECTOR: &str = "meta[property=\"og:video\"]";

/// The player's `<source>` element on the episode page.
pub const DEFAULT_SOURCE_SELECTOR: &str =
    "#body > div > div:nth-of-type(3) > div:nth-of-type(2) > div > div > video > source";

/// Attribute of the source element holding the media location.
pub const SOURCE_ATTRIBUTE: &str = "src";

/// Default bound for the source element wait.
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 10;

/// What to do when a page has the marker but the source element never shows up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingSourceBehavior {
    /// Abort the run (default).
    Fail,
    /// Treat it as the end of the series and keep what was collected.
    Stop,
}

/// Errors that end an enumeration without a result.
#[derive(Debug, Error)]
pub enum EnumerateError {
    #[error(transparent)]
    Browser(#[from] BrowserError),

    /// The marker was present but no source could be read. `index` was already advanced,
    /// so `collected.len() == index - 1`.
    #[error("Episode {index} has a video marker but no readable source: {source}")]
    MissingSource {
        index: u32,
        collected: Vec<String>,
        #[source]
        source: BrowserError,
    },
}

/// Selectors, wait bound and callbacks for a run.
pub struct EnumerateOptions<'a> {
    pub marker_selector: &'a str,
    pub source_selector: &'a str,
    pub wait_timeout: Duration,
    pub missing_source: MissingSourceBehavior,
    /// Called after each collected episode with the new index and the filename.
    pub on_episode: Option<&'a dyn Fn(u32, &str)>,
    /// Called after each collected episode with everything collected so far.
    pub on_checkpoint: Option<&'a dyn Fn(&[String])>,
}

impl Default for EnumerateOptions<'_> {
    fn default() -> Self {
        Self {
            marker_selector: DEFAULT_MARKER_SELECTOR,
            source_selector: DEFAULT_SOURCE_SELECTOR,
            wait_timeout: Duration::from_secs(DEFAULT_WAIT_TIMEOUT_SECS),
            missing_source: MissingSourceBehavior::Fail,
            on_episode: None,
            on_checkpoint: None,
        }
    }
}

/// Result of a finished run: filenames in episode order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enumeration {
    pub filenames: Vec<String>,
}

impl Enumeration {
    /// Number of episodes found; equals the final index.
    pub fn count(&self) -> usize {
        self.filenames.len()
    }
}

/// URL visited for `index`: the base URL with the `#item=<index>` fragment appended.
pub fn candidate_url(base_url: &str, index: u32) -> String {
    format!("{}#item={}", base_url, index)
}

/// An index is a real episode when the marker is present and the browser stayed on the
/// requested URL. A redirect means the site does not know the index.
pub fn is_valid_episode_index(settled_url: &str, candidate_url: &str, marker_found: bool) -> bool {
    marker_found && settled_url == candidate_url
}

/// Last `/`-separated segment of a media source.
pub fn filename_from_source(source: &str) -> &str {
    source.rsplit('/').next().unwrap_or(source)
}

/// Visit indexes from 0 until the first invalid one. Navigation errors are fatal.
pub fn enumerate_episodes<B: Browser + ?Sized>(
    browser: &mut B,
    base_url: &str,
    options: &EnumerateOptions<'_>,
) -> Result<Enumeration, EnumerateError> {
    let mut index: u32 = 0;
    let mut filenames: Vec<String> = Vec::new();

    loop {
        let candidate = candidate_url(base_url, index);
        log::debug!("Visiting {}", candidate);
        browser.navigate(&candidate)?;

        let settled = browser.current_url();
        let marker_found = browser.has_element(options.marker_selector);
        if !is_valid_episode_index(&settled, &candidate, marker_found) {
            if !marker_found {
                log::debug!("No video marker at index {}; stopping", index);
            } else {
                log::debug!("Index {} redirected to {}; stopping", index, settled);
            }
            break;
        }

        index += 1;
        let source = match browser.wait_for_attribute(
            options.source_selector,
            SOURCE_ATTRIBUTE,
            options.wait_timeout,
        ) {
            Ok(source) => source,
            Err(e) => match options.missing_source {
                MissingSourceBehavior::Fail => {
                    return Err(EnumerateError::MissingSource {
                        index,
                        collected: filenames,
                        source: e,
                    })
                }
                MissingSourceBehavior::Stop => {
                    log::warn!(
                        "Episode {} has no readable source ({}); treating it as the end",
                        index,
                        e
                    );
                    break;
                }
            },
        };

        let filename = filename_from_source(&source).to_string();
        log::debug!("Episode {}: {}", index, filename);
        filenames.push(filename);
        if let Some(cb) = options.on_episode {
            if let Some(last) = filenames.last() {
                cb(index, last);
            }
        }
        if let Some(cb) = options.on_checkpoint {
            cb(&filenames);
        }
    }

    Ok(Enumeration { filenames })
}

/// Run [enumerate_episodes] on an owned session and close it afterwards, on success or failure.
/// A close error is logged and never hides the enumeration result.
pub fn run_enumeration<B: Browser>(
    mut browser: B,
    base_url: &str,
    options: &EnumerateOptions<'_>,
) -> Result<Enumeration, EnumerateError> {
    let result = enumerate_episodes(&mut browser, base_url, options);
    if let Err(e) = browser.close() {
        log::warn!("Could not close browser session: {}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::rc::Rc;

    const BASE: &str = "https://example.com/saga";

    /// A page served by [FakeSite]: its HTML and an optional redirect target.
    struct FakePage {
        html: String,
        redirect_to: Option<String>,
    }

    /// Static-HTML stand-in for a browser. Selectors are evaluated with the scraper crate.
    struct FakeSite {
        pages: HashMap<String, FakePage>,
        unreachable: bool,
        current: String,
        closed: Rc<Cell<bool>>,
        visited: Rc<RefCell<Vec<String>>>,
    }

    impl FakeSite {
        fn new() -> Self {
            Self {
                pages: HashMap::new(),
                unreachable: false,
                current: String::new(),
                closed: Rc::new(Cell::new(false)),
                visited: Rc::new(RefCell::new(Vec::new())),
            }
        }

        /// Site with `ids.len()` episodes; the next index redirects to the base URL.
        fn with_episodes(ids: &[&str]) -> Self {
            let mut site = Self::new();
            for (i, id) in ids.iter().enumerate() {
                site.pages.insert(
                    candidate_url(BASE, i as u32),
                    FakePage {
                        html: episode_html(&format!("https://pixeldrain.com/api/file/{}", id)),
                        redirect_to: None,
                    },
                );
            }
            site.pages.insert(
                candidate_url(BASE, ids.len() as u32),
                FakePage {
                    html: String::new(),
                    redirect_to: Some(BASE.to_string()),
                },
            );
            site.pages.insert(
                BASE.to_string(),
                FakePage {
                    html: episode_html("https://pixeldrain.com/api/file/landing"),
                    redirect_to: None,
                },
            );
            site
        }

        fn page_html(&self) -> Option<Html> {
            self.pages
                .get(&self.current)
                .map(|p| Html::parse_document(&p.html))
        }
    }

    impl Browser for FakeSite {
        fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
            self.visited.borrow_mut().push(url.to_string());
            if self.unreachable {
                return Err(BrowserError::Navigation {
                    url: url.to_string(),
                    reason: "net::ERR_NAME_NOT_RESOLVED".to_string(),
                });
            }
            self.current = match self.pages.get(url).and_then(|p| p.redirect_to.clone()) {
                Some(target) => target,
                None => url.to_string(),
            };
            Ok(())
        }

        fn current_url(&self) -> String {
            self.current.clone()
        }

        fn has_element(&self, selector: &str) -> bool {
            let Ok(sel) = Selector::parse(selector) else {
                return false;
            };
            self.page_html()
                .map(|doc| doc.select(&sel).next().is_some())
                .unwrap_or(false)
        }

        fn wait_for_attribute(
            &self,
            selector: &str,
            attribute: &str,
            _timeout: Duration,
        ) -> Result<String, BrowserError> {
            let sel = Selector::parse(selector).map_err(|e| BrowserError::Session(e.to_string()))?;
            let doc = self.page_html().ok_or_else(|| BrowserError::Timeout {
                selector: selector.to_string(),
                reason: "no page loaded".to_string(),
            })?;
            let element = doc.select(&sel).next().ok_or_else(|| BrowserError::Timeout {
                selector: selector.to_string(),
                reason: "element never appeared".to_string(),
            })?;
            element
                .value()
                .attr(attribute)
                .map(String::from)
                .ok_or_else(|| BrowserError::MissingAttribute {
                    selector: selector.to_string(),
                    attribute: attribute.to_string(),
                })
        }

        fn close(&mut self) -> Result<(), BrowserError> {
            self.closed.set(true);
            Ok(())
        }
    }

    /// Episode page laid out like the real player page.
    fn episode_html(src: &str) -> String {
        format!(
            r#"<html><head><meta property="og:video" content="{src}"></head><body>
<div id="body"><div>
  <div>nav</div>
  <div>header</div>
  <div>
    <div>sidebar</div>
    <div><div><div><video controls><source src="{src}" type="video/mp4"></video></div></div></div>
  </div>
</div></div>
</body></html>"#
        )
    }

    /// Page with the marker but without the player.
    fn marker_only_html() -> String {
        r#"<html><head><meta property="og:video" content="x"></head><body><div id="body"></div></body></html>"#
            .to_string()
    }

    #[test]
    fn candidate_url_appends_item_fragment() {
        assert_eq!(candidate_url(BASE, 0), "https://example.com/saga#item=0");
        assert_eq!(candidate_url(BASE, 12), "https://example.com/saga#item=12");
    }

    #[test]
    fn valid_index_requires_marker_and_same_url() {
        let c = candidate_url(BASE, 1);
        assert!(is_valid_episode_index(&c, &c, true));
        assert!(!is_valid_episode_index(&c, &c, false));
        assert!(!is_valid_episode_index(BASE, &c, true));
        assert!(!is_valid_episode_index(BASE, &c, false));
    }

    #[test]
    fn filename_is_last_path_segment() {
        assert_eq!(
            filename_from_source("https://pixeldrain.com/api/file/7m6KDEuw"),
            "7m6KDEuw"
        );
        assert_eq!(filename_from_source("/media/ep01.mp4"), "ep01.mp4");
        assert_eq!(filename_from_source("plain.mp4"), "plain.mp4");
        assert_eq!(filename_from_source("https://host/dir/"), "");
    }

    #[test]
    fn three_episodes_then_redirect() -> Result<(), EnumerateError> {
        let mut site = FakeSite::with_episodes(&["aaa", "bbb", "ccc"]);
        let result = enumerate_episodes(&mut site, BASE, &EnumerateOptions::default())?;
        assert_eq!(result.count(), 3);
        assert_eq!(result.filenames, vec!["aaa", "bbb", "ccc"]);
        assert_eq!(site.visited.borrow().len(), 4);
        Ok(())
    }

    #[test]
    fn zero_episodes_when_first_index_redirects() -> Result<(), EnumerateError> {
        let mut site = FakeSite::with_episodes(&[]);
        let result = enumerate_episodes(&mut site, BASE, &EnumerateOptions::default())?;
        assert_eq!(result.count(), 0);
        assert!(result.filenames.is_empty());
        Ok(())
    }

    #[test]
    fn count_matches_episode_count_for_several_sizes() -> Result<(), EnumerateError> {
        let ids = ["a", "b", "c", "d", "e", "f", "g"];
        for n in 0..=ids.len() {
            let mut site = FakeSite::with_episodes(&ids[..n]);
            let result = enumerate_episodes(&mut site, BASE, &EnumerateOptions::default())?;
            assert_eq!(result.count(), n);
            assert_eq!(result.filenames, ids[..n].to_vec());
        }
        Ok(())
    }

    #[test]
    fn missing_marker_stops_without_redirect() -> Result<(), EnumerateError> {
        let mut site = FakeSite::with_episodes(&["aaa"]);
        site.pages.insert(
            candidate_url(BASE, 1),
            FakePage {
                html: "<html><body><p>Nothing here</p></body></html>".to_string(),
                redirect_to: None,
            },
        );
        let result = enumerate_episodes(&mut site, BASE, &EnumerateOptions::default())?;
        assert_eq!(result.filenames, vec!["aaa"]);
        Ok(())
    }

    #[test]
    fn unreachable_site_is_fatal_and_session_is_closed() {
        let mut site = FakeSite::new();
        site.unreachable = true;
        let closed = Rc::clone(&site.closed);
        let result = run_enumeration(site, BASE, &EnumerateOptions::default());
        assert!(matches!(
            result,
            Err(EnumerateError::Browser(BrowserError::Navigation { .. }))
        ));
        assert!(closed.get());
    }

    #[test]
    fn run_enumeration_closes_session_on_success() -> Result<(), EnumerateError> {
        let site = FakeSite::with_episodes(&["aaa"]);
        let closed = Rc::clone(&site.closed);
        let result = run_enumeration(site, BASE, &EnumerateOptions::default())?;
        assert_eq!(result.count(), 1);
        assert!(closed.get());
        Ok(())
    }

    #[test]
    fn missing_source_fails_after_index_advanced() -> Result<(), String> {
        let mut site = FakeSite::with_episodes(&["aaa", "bbb"]);
        site.pages.insert(
            candidate_url(BASE, 2),
            FakePage {
                html: marker_only_html(),
                redirect_to: None,
            },
        );
        let closed = Rc::clone(&site.closed);
        let result = run_enumeration(site, BASE, &EnumerateOptions::default());
        assert!(closed.get());
        match result {
            Err(EnumerateError::MissingSource {
                index, collected, ..
            }) => {
                assert_eq!(index, 3);
                assert_eq!(collected, vec!["aaa", "bbb"]);
                assert_eq!(collected.len() as u32, index - 1);
                Ok(())
            }
            other => Err(format!("expected MissingSource, got {:?}", other)),
        }
    }

    #[test]
    fn missing_source_with_stop_keeps_collected() -> Result<(), EnumerateError> {
        let mut site = FakeSite::with_episodes(&["aaa", "bbb"]);
        site.pages.insert(
            candidate_url(BASE, 1),
            FakePage {
                html: marker_only_html(),
                redirect_to: None,
            },
        );
        let options = EnumerateOptions {
            missing_source: MissingSourceBehavior::Stop,
            ..EnumerateOptions::default()
        };
        let result = enumerate_episodes(&mut site, BASE, &options)?;
        assert_eq!(result.filenames, vec!["aaa"]);
        assert_eq!(result.count(), 1);
        Ok(())
    }

    #[test]
    fn source_without_src_attribute_is_missing_source() {
        let mut site = FakeSite::with_episodes(&["aaa"]);
        site.pages.insert(
            candidate_url(BASE, 0),
            FakePage {
                html: episode_html("x").replace(r#"src="x""#, ""),
                redirect_to: None,
            },
        );
        let result = enumerate_episodes(&mut site, BASE, &EnumerateOptions::default());
        assert!(matches!(
            result,
            Err(EnumerateError::MissingSource {
                index: 1,
                source: BrowserError::MissingAttribute { .. },
                ..
            })
        ));
    }

    #[test]
    fn callbacks_see_each_episode_in_order() -> Result<(), EnumerateError> {
        let mut site = FakeSite::with_episodes(&["aaa", "bbb"]);
        let seen: RefCell<Vec<(u32, String)>> = RefCell::new(Vec::new());
        let checkpoints: RefCell<Vec<usize>> = RefCell::new(Vec::new());
        let on_episode = |i: u32, f: &str| seen.borrow_mut().push((i, f.to_string()));
        let on_checkpoint = |all: &[String]| checkpoints.borrow_mut().push(all.len());
        let options = EnumerateOptions {
            on_episode: Some(&on_episode),
            on_checkpoint: Some(&on_checkpoint),
            ..EnumerateOptions::default()
        };
        enumerate_episodes(&mut site, BASE, &options)?;
        assert_eq!(
            *seen.borrow(),
            vec![(1, "aaa".to_string()), (2, "bbb".to_string())]
        );
        assert_eq!(*checkpoints.borrow(), vec![1, 2]);
        Ok(())
    }
}
