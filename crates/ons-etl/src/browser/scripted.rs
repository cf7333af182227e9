//! In-memory `BrowserDriver` that replays scripted pages.
//!
//! Pages, locator matches and downloads are registered up front; every call is
//! recorded so tests can assert on what the navigator did.

use super::driver::{
    BrowserDriver, ClickMode, DownloadPayload, ElementHandle, Locator, PageHandle, PageLoad,
};
use crate::error::PortalError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// What clicking a download control produces
#[derive(Debug, Clone)]
pub enum ScriptedDownload {
    File {
        suggested_filename: String,
        bytes: Vec<u8>,
    },
    /// Never completes
    Stall,
    /// Browser reports the download as canceled
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserCall {
    Open { url: String },
    Locate { url: String, locator: String },
    Click { token: String, mode: ClickMode },
    Download { token: String },
    Close,
}

#[derive(Debug, Clone, Copy)]
enum PageScript {
    Status(u16),
    NoResponse,
    Unreachable,
}

type ElementKey = (String, Option<String>, Locator);

#[derive(Debug, Default)]
struct ScriptState {
    pages: HashMap<String, PageScript>,
    elements: HashMap<ElementKey, Vec<String>>,
    downloads: HashMap<String, VecDeque<ScriptedDownload>>,
    open_pages: HashMap<String, String>,
    calls: Vec<BrowserCall>,
    closed: bool,
    next_page: u64,
}

/// Scripted browser; clones share the same script and call log
#[derive(Debug, Clone, Default)]
pub struct ScriptedBrowser {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Serve `url` with an HTTP status
    pub fn page(self, url: &str, status: u16) -> Self {
        self.state()
            .pages
            .insert(url.to_string(), PageScript::Status(status));
        self
    }

    /// Serve `url` without any response
    pub fn page_without_response(self, url: &str) -> Self {
        self.state()
            .pages
            .insert(url.to_string(), PageScript::NoResponse);
        self
    }

    /// Fail navigation to `url`
    pub fn unreachable(self, url: &str) -> Self {
        self.state()
            .pages
            .insert(url.to_string(), PageScript::Unreachable);
        self
    }

    /// Elements `locator` matches on `url`, searched below `scope` (an element
    /// token) or from the document root
    pub fn elements(self, url: &str, scope: Option<&str>, locator: Locator, tokens: &[&str]) -> Self {
        self.state().elements.insert(
            (url.to_string(), scope.map(str::to_string), locator),
            tokens.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    /// Queue a file for the next click on `token`. Repeated calls on the same
    /// token are served in order, one per click.
    pub fn download(self, token: &str, suggested_filename: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.queue_download(
            token,
            ScriptedDownload::File {
                suggested_filename: suggested_filename.to_string(),
                bytes: bytes.into(),
            },
        )
    }

    pub fn stalled_download(self, token: &str) -> Self {
        self.queue_download(token, ScriptedDownload::Stall)
    }

    pub fn cancelled_download(self, token: &str) -> Self {
        self.queue_download(token, ScriptedDownload::Cancel)
    }

    fn queue_download(self, token: &str, download: ScriptedDownload) -> Self {
        self.state()
            .downloads
            .entry(token.to_string())
            .or_default()
            .push_back(download);
        self
    }

    pub fn calls(&self) -> Vec<BrowserCall> {
        self.state().calls.clone()
    }

    /// Tokens of every download control clicked, in order
    pub fn downloads_started(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                BrowserCall::Download { token } => Some(token.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn url_of(&self, page_id: &str) -> Result<String, PortalError> {
        self.state()
            .open_pages
            .get(page_id)
            .cloned()
            .ok_or_else(|| PortalError::session(format!("Unknown page {}", page_id)))
    }
}

#[async_trait]
impl BrowserDriver for ScriptedBrowser {
    async fn open(&self, url: &str) -> Result<PageLoad, PortalError> {
        let mut state = self.state();
        state.calls.push(BrowserCall::Open {
            url: url.to_string(),
        });
        if state.closed {
            return Err(PortalError::session("Browser already closed"));
        }

        let status = match state.pages.get(url).copied() {
            Some(PageScript::Status(status)) => Some(status),
            Some(PageScript::NoResponse) => None,
            Some(PageScript::Unreachable) | None => {
                return Err(PortalError::PageUnreachable {
                    url: url.to_string(),
                    reason: "net::ERR_NAME_NOT_RESOLVED".to_string(),
                })
            }
        };

        state.next_page += 1;
        let id = format!("page-{}", state.next_page);
        state.open_pages.insert(id.clone(), url.to_string());

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
        let url = self.url_of(&page.id)?;
        let mut state = self.state();
        state.calls.push(BrowserCall::Locate {
            url: url.clone(),
            locator: locator.to_string(),
        });

        let key = (url, scope.map(|s| s.token.clone()), locator.clone());
        Ok(state
            .elements
            .get(&key)
            .map(|tokens| {
                tokens
                    .iter()
                    .map(|token| ElementHandle {
                        page_id: page.id.clone(),
                        token: token.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn click(&self, element: &ElementHandle, mode: ClickMode) -> Result<(), PortalError> {
        self.state().calls.push(BrowserCall::Click {
            token: element.token.clone(),
            mode,
        });
        Ok(())
    }

    async fn click_for_download(
        &self,
        element: &ElementHandle,
        mode: ClickMode,
    ) -> Result<DownloadPayload, PortalError> {
        self.click(element, mode).await?;
        let url = self.url_of(&element.page_id)?;

        let scripted = {
            let mut state = self.state();
            state.calls.push(BrowserCall::Download {
                token: element.token.clone(),
            });
            state
                .downloads
                .get_mut(&element.token)
                .and_then(VecDeque::pop_front)
        };

        match scripted {
            Some(ScriptedDownload::File {
                suggested_filename,
                bytes,
            }) => Ok(DownloadPayload {
                suggested_filename,
                source_url: url,
                bytes,
            }),
            Some(ScriptedDownload::Stall) | None => {
                std::future::pending::<()>().await;
                Err(PortalError::session("Download never started"))
            }
            Some(ScriptedDownload::Cancel) => Err(PortalError::DownloadFailed {
                url,
                reason: "download was canceled by the browser".to_string(),
            }),
        }
    }

    async fn close(&self) -> Result<(), PortalError> {
        let mut state = self.state();
        state.calls.push(BrowserCall::Close);
        state.closed = true;
        state.open_pages.clear();
        Ok(())
    }
}
