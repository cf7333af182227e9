//! `BrowserDriver` backed by a real Chrome/Chromium over CDP (chromiumoxide).
//!
//! Elements are addressed by tagging every match with a `data-ons-handle`
//! attribute from a locator script, so later clicks can find the exact node
//! again with a plain CSS selector. Downloads are routed into a staging
//! directory with `Browser.setDownloadBehavior` and picked up once Chrome
//! reports them complete.

use super::driver::{
    BrowserDriver, ClickMode, DownloadPayload, ElementHandle, Locator, PageHandle, PageLoad,
};
use crate::config::BrowserConfig;
use crate::error::PortalError;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::{
    DownloadProgressState, EventDownloadProgress, EventDownloadWillBegin,
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};

const HANDLE_ATTRIBUTE: &str = "data-ons-handle";

/// Status of the main document load, or null when unknown
const NAVIGATION_STATUS_JS: &str = r#"(() => {
    const entry = performance.getEntriesByType('navigation')[0];
    return entry && entry.responseStatus ? entry.responseStatus : null;
})()"#;

const LOCATE_JS: &str = r#"(() => {
    const steps = __STEPS__;
    const scopeToken = __SCOPE__;
    const norm = (s) => (s || '').replace(/\s+/g, ' ').trim().toLowerCase();
    const textOf = (el) => norm(el.innerText || el.textContent);
    const implicitRole = (el) => {
        switch (el.tagName) {
            case 'BUTTON': return 'button';
            case 'A': return el.hasAttribute('href') ? 'link' : null;
            case 'LI': return 'listitem';
            default: return null;
        }
    };
    const roleOf = (el) => el.getAttribute('role') || implicitRole(el);
    const nameOf = (el) => norm(el.getAttribute('aria-label')) || textOf(el);

    let current;
    if (scopeToken === null) {
        current = [document];
    } else {
        const scope = document.querySelector(`[data-ons-handle="${scopeToken}"]`);
        current = scope ? [scope] : [];
    }

    for (const step of steps) {
        const next = [];
        for (const root of current) {
            if (step.kind === 'css') {
                for (const el of root.querySelectorAll(step.selector)) {
                    if (step.has_text === null || textOf(el).includes(norm(step.has_text))) {
                        next.push(el);
                    }
                }
            } else if (step.kind === 'role') {
                for (const el of root.querySelectorAll('*')) {
                    if (roleOf(el) === step.role && nameOf(el).includes(norm(step.name))) {
                        next.push(el);
                    }
                }
            } else if (step.kind === 'following_sibling') {
                let sibling = root.nextElementSibling;
                while (sibling) {
                    if (sibling.tagName.toLowerCase() === step.tag) {
                        next.push(sibling);
                    }
                    sibling = sibling.nextElementSibling;
                }
            }
        }
        current = [...new Set(next)];
    }

    window.__onsSeq = window.__onsSeq || 0;
    return current.map((el) => {
        if (!el.dataset.onsHandle) {
            window.__onsSeq += 1;
            el.dataset.onsHandle = String(window.__onsSeq);
        }
        return el.dataset.onsHandle;
    });
})()"#;

/// Real browser session
pub struct ChromiumDriver {
    browser: Mutex<Browser>,
    pages: Mutex<HashMap<String, Page>>,
    next_page: AtomicU64,
    download_dir: PathBuf,
    handler: tokio::task::JoinHandle<()>,
}

impl ChromiumDriver {
    /// Launch Chrome with a private profile, routing downloads to
    /// `download_dir`
    pub async fn launch(
        config: &BrowserConfig,
        profile_dir: &Path,
        download_dir: &Path,
    ) -> Result<Self, PortalError> {
        let chrome_path = find_chrome_binary(config)?;
        for dir in [profile_dir, download_dir] {
            std::fs::create_dir_all(dir).map_err(|source| PortalError::Persist {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let mut builder = chromiumoxide::BrowserConfig::builder()
            .chrome_executable(&chrome_path)
            .user_data_dir(profile_dir)
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-gpu")
            .arg("--disable-extensions")
            .arg("--disable-dev-shm-usage");

        if !config.headless {
            builder = builder.with_head();
        }
        if config.no_sandbox {
            builder = builder.no_sandbox();
        }

        let browser_config = builder.build().map_err(|e| {
            PortalError::session(format!("Failed to build browser config: {}", e))
        })?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| PortalError::session(format!("Failed to launch Chrome: {}", e)))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "CDP handler error");
                }
            }
        });

        let behavior = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::AllowAndName)
            .download_path(download_dir.to_string_lossy().into_owned())
            .events_enabled(true)
            .build()
            .map_err(PortalError::session)?;
        browser.execute(behavior).await.map_err(|e| {
            PortalError::session(format!("Failed to enable downloads: {}", e))
        })?;

        info!(
            chrome = %chrome_path.display(),
            headless = config.headless,
            "Browser session started"
        );

        Ok(Self {
            browser: Mutex::new(browser),
            pages: Mutex::new(HashMap::new()),
            next_page: AtomicU64::new(1),
            download_dir: download_dir.to_path_buf(),
            handler: handler_task,
        })
    }

    async fn page(&self, id: &str) -> Result<Page, PortalError> {
        self.pages
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| PortalError::session(format!("Unknown page {}", id)))
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn open(&self, url: &str) -> Result<PageLoad, PortalError> {
        let page = {
            let browser = self.browser.lock().await;
            browser
                .new_page(url)
                .await
                .map_err(|e| PortalError::PageUnreachable {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?
        };

        let status = page
            .evaluate(NAVIGATION_STATUS_JS)
            .await
            .ok()
            .and_then(|result| result.into_value::<Option<u16>>().ok())
            .flatten();

        let id = format!("page-{}", self.next_page.fetch_add(1, Ordering::SeqCst));
        self.pages.lock().await.insert(id.clone(), page);

        Ok(PageLoad {
            page: PageHandle {
                id,
                url: url.to_string(),
            },
            status,
        })
    }

    async fn locate(
        &self,
        page: &PageHandle,
        scope: Option<&ElementHandle>,
        locator: &Locator,
    ) -> Result<Vec<ElementHandle>, PortalError> {
        let tab = self.page(&page.id).await?;
        let script = locate_script(locator, scope.map(|s| s.token.as_str()))?;

        let tokens: Vec<String> = tab
            .evaluate(script)
            .await
            .map_err(|e| PortalError::session(format!("Locating {} failed: {}", locator, e)))?
            .into_value()
            .map_err(|e| PortalError::session(format!("Locating {} failed: {}", locator, e)))?;

        Ok(tokens
            .into_iter()
            .map(|token| ElementHandle {
                page_id: page.id.clone(),
                token,
            })
            .collect())
    }

    async fn click(&self, element: &ElementHandle, mode: ClickMode) -> Result<(), PortalError> {
        let tab = self.page(&element.page_id).await?;
        let selector = handle_selector(&element.token);

        match mode {
            ClickMode::Click => {
                let node = tab.find_element(selector.as_str()).await.map_err(|e| {
                    PortalError::session(format!("Element {} detached: {}", element, e))
                })?;
                node.click().await.map_err(|e| {
                    PortalError::session(format!("Click on {} failed: {}", element, e))
                })?;
            }
            ClickMode::DispatchEvent => {
                let selector_literal = serde_json::to_string(&selector)
                    .map_err(|e| PortalError::session(e.to_string()))?;
                let script = format!(
                    "(() => {{ const el = document.querySelector({}); if (!el) return false; \
                     el.dispatchEvent(new MouseEvent('click', {{ bubbles: true, cancelable: true, composed: true }})); \
                     return true; }})()",
                    selector_literal
                );
                let dispatched: bool = tab
                    .evaluate(script)
                    .await
                    .map_err(|e| {
                        PortalError::session(format!("Dispatch on {} failed: {}", element, e))
                    })?
                    .into_value()
                    .unwrap_or(false);
                if !dispatched {
                    return Err(PortalError::session(format!("Element {} detached", element)));
                }
            }
        }
        Ok(())
    }

    async fn click_for_download(
        &self,
        element: &ElementHandle,
        mode: ClickMode,
    ) -> Result<DownloadPayload, PortalError> {
        // Subscribe before clicking so the begin event cannot be missed
        let (mut begins, mut progress) = {
            let browser = self.browser.lock().await;
            let begins = browser
                .event_listener::<EventDownloadWillBegin>()
                .await
                .map_err(|e| PortalError::session(e.to_string()))?;
            let progress = browser
                .event_listener::<EventDownloadProgress>()
                .await
                .map_err(|e| PortalError::session(e.to_string()))?;
            (begins, progress)
        };

        self.click(element, mode).await?;

        let begin = begins
            .next()
            .await
            .ok_or_else(|| PortalError::session("Download event stream closed"))?;
        debug!(
            url = %begin.url,
            file = %begin.suggested_filename,
            "Download started"
        );

        loop {
            let event = progress
                .next()
                .await
                .ok_or_else(|| PortalError::session("Download event stream closed"))?;
            if event.guid != begin.guid {
                continue;
            }
            match event.state {
                DownloadProgressState::Completed => break,
                DownloadProgressState::Canceled => {
                    return Err(PortalError::DownloadFailed {
                        url: begin.url.clone(),
                        reason: "download was canceled by the browser".to_string(),
                    })
                }
                DownloadProgressState::InProgress => {}
            }
        }

        // AllowAndName stores the file under its guid
        let staged = self.download_dir.join(&begin.guid);
        let bytes = tokio::fs::read(&staged)
            .await
            .map_err(|source| PortalError::Persist {
                path: staged.clone(),
                source,
            })?;
        if let Err(e) = tokio::fs::remove_file(&staged).await {
            debug!(path = %staged.display(), error = %e, "Could not remove staged download");
        }

        Ok(DownloadPayload {
            suggested_filename: begin.suggested_filename.clone(),
            source_url: begin.url.clone(),
            bytes,
        })
    }

    async fn close(&self) -> Result<(), PortalError> {
        self.pages.lock().await.clear();
        let mut browser = self.browser.lock().await;
        let closed = browser
            .close()
            .await
            .map_err(|e| PortalError::session(format!("Failed to close browser: {}", e)));
        if let Err(e) = browser.wait().await {
            debug!(error = %e, "Browser process did not exit cleanly");
        }
        self.handler.abort();
        closed.map(|_| ())
    }
}

fn handle_selector(token: &str) -> String {
    format!("[{}=\"{}\"]", HANDLE_ATTRIBUTE, token)
}

fn locate_script(locator: &Locator, scope: Option<&str>) -> Result<String, PortalError> {
    let steps = serde_json::to_string(locator.steps())
        .map_err(|e| PortalError::session(format!("Invalid locator {}: {}", locator, e)))?;
    let scope = serde_json::to_string(&scope)
        .map_err(|e| PortalError::session(format!("Invalid scope: {}", e)))?;
    Ok(LOCATE_JS
        .replace("__STEPS__", &steps)
        .replace("__SCOPE__", &scope))
}

/// Find a Chrome or Chromium binary on the system.
fn find_chrome_binary(config: &BrowserConfig) -> Result<PathBuf, PortalError> {
    if let Some(ref path) = config.chrome_path {
        if path.exists() {
            return Ok(path.clone());
        }
        return Err(PortalError::session(format!(
            "Configured Chrome binary {} does not exist",
            path.display()
        )));
    }

    #[cfg(target_os = "macos")]
    let candidates: &[&str] = &[
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    #[cfg(target_os = "windows")]
    let candidates: &[&str] = &[
        r"C:\Program Files\Google\Chrome\Application\chrome.exe",
        r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    ];

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let candidates: &[&str] = &[
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
    ];

    candidates
        .iter()
        .map(|candidate| PathBuf::from(*candidate))
        .find(|p| p.exists())
        .ok_or_else(|| {
            PortalError::session("No Chrome or Chromium binary found; set ETL_CHROME_PATH")
        })
}
