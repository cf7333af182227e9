//! Browser-driven discovery and download of source files

pub mod chromium;
pub mod driver;
pub mod navigator;
pub mod scripted;

pub use chromium::ChromiumDriver;
pub use driver::{
    BrowserDriver, ClickMode, DownloadPayload, ElementHandle, LocateOutcome, Locator, LocatorStep,
    PageHandle, PageLoad,
};
pub use navigator::{BrowserNavigator, DownloadedFile, NavigatorOptions};
pub use scripted::{BrowserCall, ScriptedBrowser, ScriptedDownload};
