//! Browser automation seam
//!
//! `BrowserDriver` is the minimal capability the navigator needs from a
//! browser: open a page and report its status, locate elements, click, and
//! await a download. `ChromiumDriver` drives a real Chrome; `ScriptedBrowser`
//! replays canned pages for tests.

use crate::error::PortalError;
use async_trait::async_trait;
use serde::Serialize;

/// An open tab
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageHandle {
    pub id: String,
    pub url: String,
}

/// An element on an open tab, identified by a driver-assigned token
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    pub page_id: String,
    pub token: String,
}

impl std::fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.page_id, self.token)
    }
}

/// One step of a locator chain. Each step is applied to every element matched
/// by the previous one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocatorStep {
    /// CSS selector, optionally filtered by case-insensitive text content
    Css {
        selector: String,
        has_text: Option<String>,
    },
    /// ARIA role with an accessible name containing `name`
    Role { role: String, name: String },
    /// Later siblings with the given tag name
    FollowingSibling { tag: String },
}

/// Describes how to find elements by text, role or structural position
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Locator {
    steps: Vec<LocatorStep>,
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self {
            steps: vec![LocatorStep::Css {
                selector: selector.into(),
                has_text: None,
            }],
        }
    }

    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            steps: vec![LocatorStep::Role {
                role: role.into(),
                name: name.into(),
            }],
        }
    }

    pub fn following_sibling(tag: impl Into<String>) -> Self {
        Self {
            steps: vec![LocatorStep::FollowingSibling {
                tag: tag.into().to_lowercase(),
            }],
        }
    }

    /// Restrict the last CSS step to elements whose text contains `text`
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        if let Some(LocatorStep::Css { has_text, .. }) = self.steps.last_mut() {
            *has_text = Some(text.into());
        }
        self
    }

    /// Continue matching from the elements this locator finds
    pub fn then(mut self, next: Locator) -> Self {
        self.steps.extend(next.steps);
        self
    }

    pub fn steps(&self) -> &[LocatorStep] {
        &self.steps
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                write!(f, " >> ")?;
            }
            match step {
                LocatorStep::Css {
                    selector,
                    has_text: None,
                } => write!(f, "{}", selector)?,
                LocatorStep::Css {
                    selector,
                    has_text: Some(text),
                } => write!(f, "{}:has-text(\"{}\")", selector, text)?,
                LocatorStep::Role { role, name } => {
                    write!(f, "role={}[name=\"{}\"]", role, name)?
                }
                LocatorStep::FollowingSibling { tag } => {
                    write!(f, "following-sibling::{}", tag)?
                }
            }
        }
        Ok(())
    }
}

/// Result of locating elements where exactly one is expected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocateOutcome {
    Found(ElementHandle),
    NotFound,
    Ambiguous(usize),
}

/// How a click is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickMode {
    /// Real pointer click: scroll into view, press and release
    Click,
    /// Synthetic `click` event dispatched on the element, no hit testing
    DispatchEvent,
}

#[derive(Debug, Clone)]
pub struct PageLoad {
    pub page: PageHandle,
    /// HTTP status of the main document; `None` when there was no response
    pub status: Option<u16>,
}

/// A completed download as delivered by the browser
#[derive(Debug, Clone)]
pub struct DownloadPayload {
    pub suggested_filename: String,
    pub source_url: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Open `url` in a new tab of the session
    async fn open(&self, url: &str) -> Result<PageLoad, PortalError>;

    /// All elements currently matching `locator`, searched below `scope` or
    /// from the document root
    async fn locate(
        &self,
        page: &PageHandle,
        scope: Option<&ElementHandle>,
        locator: &Locator,
    ) -> Result<Vec<ElementHandle>, PortalError>;

    async fn click(&self, element: &ElementHandle, mode: ClickMode) -> Result<(), PortalError>;

    /// Click `element` and wait for the download it starts to complete
    async fn click_for_download(
        &self,
        element: &ElementHandle,
        mode: ClickMode,
    ) -> Result<DownloadPayload, PortalError>;

    /// End the session
    async fn close(&self) -> Result<(), PortalError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_display() {
        let locator = Locator::css("p")
            .with_text("Tabelas tratadas")
            .then(Locator::following_sibling("DIV"))
            .then(Locator::css("p"));
        assert_eq!(
            locator.to_string(),
            "p:has-text(\"Tabelas tratadas\") >> following-sibling::div >> p"
        );
        assert_eq!(
            Locator::role("tab", "download").to_string(),
            "role=tab[name=\"download\"]"
        );
    }

    #[test]
    fn test_locator_serializes_tagged_steps() {
        let json = serde_json::to_value(Locator::css("button").with_text("Download da tabela"))
            .unwrap_or_default();
        assert_eq!(json["steps"][0]["kind"], "css");
        assert_eq!(json["steps"][0]["has_text"], "Download da tabela");
    }
}
