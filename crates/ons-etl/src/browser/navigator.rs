//! Deterministic acquisition of files from portal pages
//!
//! Every wait is bounded: navigation and downloads by their timeouts, element
//! lookups by the element wait. Lookups that expect one element refuse to
//! guess when several match.

use super::driver::{BrowserDriver, ClickMode, ElementHandle, LocateOutcome, Locator, PageHandle};
use crate::error::PortalError;
use ons_common::checksum::{checksum_bytes, verify_file_checksum};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, instrument, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct NavigatorOptions {
    pub navigation_timeout: Duration,
    pub download_timeout: Duration,
    /// How long to keep polling for a locator that matches nothing yet
    pub element_wait: Duration,
    pub poll_interval: Duration,
}

impl Default for NavigatorOptions {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(60),
            download_timeout: Duration::from_secs(120),
            element_wait: Duration::from_secs(10),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// A download persisted under the working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
}

pub struct BrowserNavigator<D> {
    driver: D,
    work_dir: PathBuf,
    options: NavigatorOptions,
}

impl<D: BrowserDriver> BrowserNavigator<D> {
    pub fn new(driver: D, work_dir: impl Into<PathBuf>, options: NavigatorOptions) -> Self {
        Self {
            driver,
            work_dir: work_dir.into(),
            options,
        }
    }

    /// Open `url`; a failed load, a missing response or an error status makes
    /// the page unreachable
    #[instrument(skip(self))]
    pub async fn open(&self, url: &str) -> Result<PageHandle, PortalError> {
        let load = timeout(self.options.navigation_timeout, self.driver.open(url))
            .await
            .map_err(|_| PortalError::PageUnreachable {
                url: url.to_string(),
                reason: format!(
                    "navigation timed out after {}s",
                    self.options.navigation_timeout.as_secs()
                ),
            })??;

        match load.status {
            Some(status) if status < 400 => {
                debug!(url, status, "Page opened");
                Ok(load.page)
            }
            Some(status) => Err(PortalError::PageUnreachable {
                url: url.to_string(),
                reason: format!("HTTP status {}", status),
            }),
            None => Err(PortalError::PageUnreachable {
                url: url.to_string(),
                reason: "no response".to_string(),
            }),
        }
    }

    /// Locate an element expected to be unique, reporting every outcome
    pub async fn locate(
        &self,
        page: &PageHandle,
        scope: Option<&ElementHandle>,
        locator: &Locator,
    ) -> Result<LocateOutcome, PortalError> {
        let mut matches = self.wait_for_matches(page, scope, locator).await?;
        Ok(match matches.len() {
            0 => LocateOutcome::NotFound,
            1 => match matches.pop() {
                Some(element) => LocateOutcome::Found(element),
                None => LocateOutcome::NotFound,
            },
            n => LocateOutcome::Ambiguous(n),
        })
    }

    pub async fn find_unique(
        &self,
        page: &PageHandle,
        scope: Option<&ElementHandle>,
        locator: &Locator,
    ) -> Result<ElementHandle, PortalError> {
        match self.locate(page, scope, locator).await? {
            LocateOutcome::Found(element) => Ok(element),
            LocateOutcome::NotFound => Err(PortalError::ElementNotFound {
                url: page.url.clone(),
                locator: locator.to_string(),
            }),
            LocateOutcome::Ambiguous(count) => {
                warn!(url = %page.url, %locator, count, "Ambiguous locator");
                Err(PortalError::AmbiguousElement {
                    url: page.url.clone(),
                    locator: locator.to_string(),
                    count,
                })
            }
        }
    }

    /// Every element matching `locator`; the one lookup where several matches
    /// are expected
    pub async fn list_resource_links(
        &self,
        page: &PageHandle,
        scope: Option<&ElementHandle>,
        locator: &Locator,
    ) -> Result<Vec<ElementHandle>, PortalError> {
        let links = self.wait_for_matches(page, scope, locator).await?;
        debug!(url = %page.url, %locator, count = links.len(), "Listed resources");
        Ok(links)
    }

    /// Whether anything below `scope` matches, without waiting
    pub async fn contains(
        &self,
        page: &PageHandle,
        scope: &ElementHandle,
        locator: &Locator,
    ) -> Result<bool, PortalError> {
        Ok(!self
            .driver
            .locate(page, Some(scope), locator)
            .await?
            .is_empty())
    }

    pub async fn click(&self, element: &ElementHandle, mode: ClickMode) -> Result<(), PortalError> {
        self.driver.click(element, mode).await
    }

    /// Click `element`, wait for the download it starts and persist it under
    /// the working directory (or `subdir` of it) with the suggested filename
    #[instrument(skip(self, page, element), fields(url = %page.url))]
    pub async fn trigger_download(
        &self,
        page: &PageHandle,
        element: &ElementHandle,
        mode: ClickMode,
        subdir: Option<&str>,
    ) -> Result<DownloadedFile, PortalError> {
        let payload = timeout(
            self.options.download_timeout,
            self.driver.click_for_download(element, mode),
        )
        .await
        .map_err(|_| PortalError::DownloadTimeout {
            url: page.url.clone(),
            timeout_secs: self.options.download_timeout.as_secs(),
        })??;

        let file_name = sanitize_filename(&payload.suggested_filename).ok_or_else(|| {
            PortalError::DownloadFailed {
                url: payload.source_url.clone(),
                reason: format!(
                    "unusable suggested filename '{}'",
                    payload.suggested_filename
                ),
            }
        })?;

        let dir = match subdir {
            Some(sub) => self.work_dir.join(sub),
            None => self.work_dir.clone(),
        };
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| PortalError::Persist {
                path: dir.clone(),
                source,
            })?;

        // Two downloads sharing a name must not collapse into one file
        let path = dir.join(file_name);
        let persist_err = |source| PortalError::Persist {
            path: path.clone(),
            source,
        };
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(PortalError::DownloadFailed {
                    url: payload.source_url.clone(),
                    reason: format!("{} was already downloaded in this run", path.display()),
                })
            }
            Err(e) => return Err(persist_err(e)),
        };
        file.write_all(&payload.bytes).await.map_err(persist_err)?;
        file.flush().await.map_err(persist_err)?;
        drop(file);

        let sha256 = checksum_bytes(&payload.bytes);
        verify_file_checksum(&path, &sha256).map_err(|e| PortalError::DownloadFailed {
            url: payload.source_url.clone(),
            reason: e.to_string(),
        })?;

        let size = payload.bytes.len() as u64;
        info!(
            path = %path.display(),
            source = %payload.source_url,
            bytes = size,
            sha256 = %sha256,
            "Saved download"
        );

        Ok(DownloadedFile { path, size, sha256 })
    }

    pub async fn close(&self) -> Result<(), PortalError> {
        self.driver.close().await
    }

    async fn wait_for_matches(
        &self,
        page: &PageHandle,
        scope: Option<&ElementHandle>,
        locator: &Locator,
    ) -> Result<Vec<ElementHandle>, PortalError> {
        let deadline = Instant::now() + self.options.element_wait;
        loop {
            let matches = self.driver.locate(page, scope, locator).await?;
            if !matches.is_empty() || Instant::now() >= deadline {
                return Ok(matches);
            }
            sleep(self.options.poll_interval).await;
        }
    }
}

/// Keep only the final path component of a browser-suggested name
fn sanitize_filename(suggested: &str) -> Option<String> {
    let name = suggested.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::browser::scripted::ScriptedBrowser;
    use tempfile::TempDir;

    const URL: &str = "https://portal.test/dataset";

    fn navigator(browser: ScriptedBrowser, dir: &TempDir) -> BrowserNavigator<ScriptedBrowser> {
        BrowserNavigator::new(
            browser,
            dir.path(),
            NavigatorOptions {
                element_wait: Duration::from_secs(1),
                ..NavigatorOptions::default()
            },
        )
    }

    #[tokio::test]
    async fn test_open_rejects_not_found_status() {
        let dir = TempDir::new().unwrap();
        let nav = navigator(ScriptedBrowser::new().page(URL, 404), &dir);

        let err = nav.open(URL).await.unwrap_err();
        assert!(matches!(err, PortalError::PageUnreachable { ref url, .. } if url == URL));
    }

    #[tokio::test]
    async fn test_open_rejects_missing_response() {
        let dir = TempDir::new().unwrap();
        let nav = navigator(ScriptedBrowser::new().page_without_response(URL), &dir);

        assert!(nav.open(URL).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_locate_reports_all_three_outcomes() {
        let dir = TempDir::new().unwrap();
        let one = Locator::css("p").with_text("Tabelas tratadas");
        let two = Locator::role("tab", "download");
        let none = Locator::css("button").with_text("Download da tabela");
        let browser = ScriptedBrowser::new()
            .page(URL, 200)
            .elements(URL, None, one.clone(), &["e1"])
            .elements(URL, None, two.clone(), &["e2", "e3"]);
        let nav = navigator(browser, &dir);
        let page = nav.open(URL).await.unwrap();

        assert!(matches!(
            nav.locate(&page, None, &one).await.unwrap(),
            LocateOutcome::Found(ref e) if e.token == "e1"
        ));
        assert_eq!(
            nav.locate(&page, None, &two).await.unwrap(),
            LocateOutcome::Ambiguous(2)
        );
        assert_eq!(
            nav.locate(&page, None, &none).await.unwrap(),
            LocateOutcome::NotFound
        );

        let err = nav.find_unique(&page, None, &two).await.unwrap_err();
        assert!(matches!(err, PortalError::AmbiguousElement { count: 2, .. }));
        let err = nav.find_unique(&page, None, &none).await.unwrap_err();
        assert!(err.to_string().contains("Download da tabela"));
    }

    #[tokio::test]
    async fn test_trigger_download_persists_suggested_filename() {
        let dir = TempDir::new().unwrap();
        let button = Locator::css("button").with_text("Download da tabela");
        let browser = ScriptedBrowser::new()
            .page(URL, 200)
            .elements(URL, None, button.clone(), &["btn"])
            .download("btn", "../../etc/tabela.csv", "a,b\n1,2\n");
        let nav = navigator(browser.clone(), &dir);

        let page = nav.open(URL).await.unwrap();
        let element = nav.find_unique(&page, None, &button).await.unwrap();
        let file = nav
            .trigger_download(&page, &element, ClickMode::Click, Some("balanco-energia"))
            .await
            .unwrap();

        assert_eq!(file.path, dir.path().join("balanco-energia/tabela.csv"));
        assert_eq!(file.size, 8);
        assert_eq!(std::fs::read_to_string(&file.path).unwrap(), "a,b\n1,2\n");
        assert_eq!(file.sha256, checksum_bytes(b"a,b\n1,2\n"));
        assert_eq!(browser.downloads_started(), vec!["btn".to_string()]);
    }

    #[tokio::test]
    async fn test_repeated_filename_is_rejected() {
        let dir = TempDir::new().unwrap();
        let button = Locator::css("button");
        let browser = ScriptedBrowser::new()
            .page(URL, 200)
            .elements(URL, None, button.clone(), &["btn"])
            .download("btn", "tabela.csv", "a\n1\n")
            .download("btn", "tabela.csv", "a\n2\n");
        let nav = navigator(browser, &dir);

        let page = nav.open(URL).await.unwrap();
        let element = nav.find_unique(&page, None, &button).await.unwrap();
        let first = nav
            .trigger_download(&page, &element, ClickMode::Click, None)
            .await
            .unwrap();
        let err = nav
            .trigger_download(&page, &element, ClickMode::Click, None)
            .await
            .unwrap_err();

        assert!(matches!(err, PortalError::DownloadFailed { ref reason, .. } if reason.contains("tabela.csv")));
        assert_eq!(std::fs::read_to_string(&first.path).unwrap(), "a\n1\n");
    }

    #[tokio::test]
    async fn test_cancelled_download_persists_nothing() {
        let dir = TempDir::new().unwrap();
        let button = Locator::css("button");
        let browser = ScriptedBrowser::new()
            .page(URL, 200)
            .elements(URL, None, button.clone(), &["btn"])
            .cancelled_download("btn");
        let nav = navigator(browser, &dir);

        let page = nav.open(URL).await.unwrap();
        let element = nav.find_unique(&page, None, &button).await.unwrap();
        let err = nav
            .trigger_download(&page, &element, ClickMode::Click, Some("custo"))
            .await
            .unwrap_err();

        assert!(matches!(err, PortalError::DownloadFailed { ref url, .. } if url == URL));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_download_times_out() {
        let dir = TempDir::new().unwrap();
        let button = Locator::css("button");
        let browser = ScriptedBrowser::new()
            .page(URL, 200)
            .elements(URL, None, button.clone(), &["btn"])
            .stalled_download("btn");
        let nav = BrowserNavigator::new(
            browser,
            dir.path(),
            NavigatorOptions {
                download_timeout: Duration::from_secs(5),
                ..NavigatorOptions::default()
            },
        );

        let page = nav.open(URL).await.unwrap();
        let element = nav.find_unique(&page, None, &button).await.unwrap();
        let err = nav
            .trigger_download(&page, &element, ClickMode::Click, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::DownloadTimeout { timeout_secs: 5, .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("tabela.csv").as_deref(), Some("tabela.csv"));
        assert_eq!(sanitize_filename("a/b\\c.csv").as_deref(), Some("c.csv"));
        assert_eq!(sanitize_filename(".."), None);
        assert_eq!(sanitize_filename("dir/"), None);
    }
}
