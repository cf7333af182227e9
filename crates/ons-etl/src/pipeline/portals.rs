//! Walks over the two source portals
//!
//! The pre-processed catalog lists its tables as links under a "Tabelas
//! tratadas" heading; each table is downloaded from its download tab. The
//! legacy catalog lists one resource per yearly file; only CSV resources are
//! taken.

use crate::browser::{
    BrowserDriver, BrowserNavigator, ClickMode, DownloadedFile, ElementHandle, PageHandle,
};
use crate::error::PortalError;
use std::path::PathBuf;
use tracing::{debug, info, instrument};

/// Pre-processed dataset catalog
pub const PREPROCESSED_CATALOG_URL: &str =
    "https://basedosdados.org/dataset/51ee8a6c-e410-4fc2-b2a4-e778c5b1ef3d";

/// Legacy raw-data catalog (hourly energy balance per subsystem)
pub const LEGACY_CATALOG_URL: &str = "https://dados.ons.org.br/dataset/balanco-energia-subsistema";

/// Working-directory subfolder for legacy downloads
pub const LEGACY_SUBDIR: &str = "balanco-energia";

pub mod locators {
    use crate::browser::Locator;

    pub const TREATED_TABLES_TEXT: &str = "Tabelas tratadas";
    pub const DOWNLOAD_TAB_NAME: &str = "download";
    pub const DOWNLOAD_BUTTON_TEXT: &str = "Download da tabela";

    pub fn treated_tables_heading() -> Locator {
        Locator::css("p").with_text(TREATED_TABLES_TEXT)
    }

    /// Relative to the heading
    pub fn dataset_links() -> Locator {
        Locator::following_sibling("div").then(Locator::css("p"))
    }

    pub fn download_tab() -> Locator {
        Locator::role("tab", DOWNLOAD_TAB_NAME)
    }

    pub fn download_button() -> Locator {
        Locator::css("button").with_text(DOWNLOAD_BUTTON_TEXT)
    }

    pub fn resource_items() -> Locator {
        Locator::css("li.resource-item")
    }

    /// Relative to a resource item
    pub fn csv_format_badge() -> Locator {
        Locator::css(r#"span[data-format="csv"]"#)
    }

    /// Relative to a resource item
    pub fn resource_link() -> Locator {
        Locator::css("a.resource-url-analytics")
    }
}

/// Everything located on the portals before any download starts
#[derive(Debug, Clone)]
pub struct SourceIndex {
    pub preprocessed_page: PageHandle,
    /// Dataset links to download, the preselected first link excluded
    pub dataset_links: Vec<ElementHandle>,
    pub legacy_page: PageHandle,
    /// Download anchors of the legacy CSV resources
    pub legacy_links: Vec<ElementHandle>,
}

#[derive(Debug, Clone, Default)]
pub struct ScrapedFiles {
    pub legacy: Vec<DownloadedFile>,
    pub preprocessed: Vec<DownloadedFile>,
}

impl ScrapedFiles {
    pub fn len(&self) -> usize {
        self.legacy.len() + self.preprocessed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Legacy files first, then pre-processed ones, each in download order
    pub fn paths(&self) -> Vec<PathBuf> {
        self.legacy
            .iter()
            .chain(&self.preprocessed)
            .map(|f| f.path.clone())
            .collect()
    }
}

/// Open both portals and locate every download source
#[instrument(skip_all)]
pub async fn discover<D: BrowserDriver>(
    nav: &BrowserNavigator<D>,
) -> Result<SourceIndex, PortalError> {
    info!(url = PREPROCESSED_CATALOG_URL, "Starting scraping of csv files");
    let preprocessed_page = nav.open(PREPROCESSED_CATALOG_URL).await?;

    let heading = nav
        .find_unique(&preprocessed_page, None, &locators::treated_tables_heading())
        .await?;
    let links_locator = locators::dataset_links();
    let links = nav
        .list_resource_links(&preprocessed_page, Some(&heading), &links_locator)
        .await?;
    // The first table is preselected and has no download on this page
    if links.len() < 2 {
        return Err(PortalError::ElementNotFound {
            url: preprocessed_page.url.clone(),
            locator: links_locator.to_string(),
        });
    }
    let dataset_links: Vec<ElementHandle> = links.into_iter().skip(1).collect();

    info!(url = LEGACY_CATALOG_URL, "Opening page for raw energy balance files");
    let legacy_page = nav.open(LEGACY_CATALOG_URL).await?;
    let resources = nav
        .list_resource_links(&legacy_page, None, &locators::resource_items())
        .await?;

    let badge = locators::csv_format_badge();
    let mut legacy_links = Vec::new();
    for resource in &resources {
        if !nav.contains(&legacy_page, resource, &badge).await? {
            debug!(resource = %resource, "Skipping non-CSV resource");
            continue;
        }
        let link = nav
            .find_unique(&legacy_page, Some(resource), &locators::resource_link())
            .await?;
        legacy_links.push(link);
    }
    if legacy_links.is_empty() {
        return Err(PortalError::ElementNotFound {
            url: legacy_page.url.clone(),
            locator: locators::resource_items().then(badge).to_string(),
        });
    }

    info!(
        datasets = dataset_links.len(),
        legacy_files = legacy_links.len(),
        "Located download sources"
    );
    Ok(SourceIndex {
        preprocessed_page,
        dataset_links,
        legacy_page,
        legacy_links,
    })
}

/// Download every located source, legacy files first
#[instrument(skip_all)]
pub async fn download_all<D: BrowserDriver>(
    nav: &BrowserNavigator<D>,
    index: &SourceIndex,
) -> Result<ScrapedFiles, PortalError> {
    let mut files = ScrapedFiles::default();

    for link in &index.legacy_links {
        let file = nav
            .trigger_download(
                &index.legacy_page,
                link,
                ClickMode::DispatchEvent,
                Some(LEGACY_SUBDIR),
            )
            .await?;
        files.legacy.push(file);
    }

    let page = &index.preprocessed_page;
    for link in &index.dataset_links {
        nav.click(link, ClickMode::Click).await?;
        let tab = nav.find_unique(page, None, &locators::download_tab()).await?;
        nav.click(&tab, ClickMode::Click).await?;
        let button = nav
            .find_unique(page, None, &locators::download_button())
            .await?;
        let file = nav
            .trigger_download(page, &button, ClickMode::Click, None)
            .await?;
        files.preprocessed.push(file);
    }

    info!(files = files.len(), "Finished scraping for csv files");
    Ok(files)
}
