use crate::types::{AreaOfInterest, ProductDescriptor, SpratError, SpratResult, TimeWindow};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a time window is widened to the bounds sent to the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum TimePadding {
    /// `start 00:00:00.000Z` .. `end 23:59:59.999Z`
    FullDay,
    /// Fixed time of day on the start and end dates
    Window { start: NaiveTime, end: NaiveTime },
    /// Timestamps sent as given
    Exact,
}

impl TimePadding {
    /// Morning acquisition window, `08:00:00.000Z` .. `12:00:00.000Z`
    pub fn acquisition_window() -> Self {
        TimePadding::Window {
            start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default(),
            end: NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default(),
        }
    }

    /// Catalog-formatted lower and upper bounds
    pub fn bounds(&self, window: &TimeWindow) -> (String, String) {
        match self {
            TimePadding::FullDay => (
                format_day(window.start_date(), "00:00:00.000"),
                format_day(window.end_date(), "23:59:59.999"),
            ),
            TimePadding::Window { start, end } => (
                format_day(window.start_date(), &start.format("%H:%M:%S%.3f").to_string()),
                format_day(window.end_date(), &end.format("%H:%M:%S%.3f").to_string()),
            ),
            TimePadding::Exact => (format_instant(&window.start), format_instant(&window.end)),
        }
    }
}

fn format_day(date: NaiveDate, time_of_day: &str) -> String {
    format!("{}T{}Z", date.format("%Y-%m-%d"), time_of_day)
}

fn format_instant(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// OData string literal, single quotes doubled
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Catalog endpoint and query policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// OData root, e.g. `https://catalogue.dataspace.copernicus.eu/odata/v1`
    pub base_url: String,
    pub padding: TimePadding,
    /// Upper bound on pages followed through `@odata.nextLink`
    #[serde(default = "default_page_cap")]
    pub page_cap: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Largest `$top` the OData endpoint accepts; more results come through page links
pub const MAX_PAGE_SIZE: usize = 1000;

fn page_size(max_results: usize) -> usize {
    max_results.min(MAX_PAGE_SIZE)
}

fn default_page_cap() -> usize {
    10
}

fn default_timeout_secs() -> u64 {
    60
}

impl CatalogConfig {
    pub fn new(base_url: impl Into<String>, padding: TimePadding) -> Self {
        Self {
            base_url: base_url.into(),
            padding,
            page_cap: default_page_cap(),
            timeout_secs: default_timeout_secs(),
        }
    }

    /// URL of the raw content of a product
    pub fn content_url(&self, product_id: &str) -> String {
        format!("{}/Products({})/$value", self.base_url.trim_end_matches('/'), product_id)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogPage {
    value: Vec<CatalogEntry>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
}

/// Resolves a catalog query into product descriptors
pub struct CatalogResolver {
    client: reqwest::blocking::Client,
    config: CatalogConfig,
}

impl CatalogResolver {
    pub fn new(config: CatalogConfig) -> SpratResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("sprat/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SpratError::Catalog(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// OData filter for collection, AOI, product type and time range
    pub fn build_filter(
        &self,
        aoi: &AreaOfInterest,
        window: &TimeWindow,
        collection: &str,
        product_type: &str,
    ) -> String {
        let (start, end) = self.config.padding.bounds(window);
        format!(
            "Collection/Name eq {} \
             and OData.CSC.Intersects(area=geography'SRID=4326;{}') \
             and Attributes/OData.CSC.StringAttribute/any(att:att/Name eq 'productType' \
             and att/OData.CSC.StringAttribute/Value eq {}) \
             and ContentDate/Start ge {} and ContentDate/Start lt {}",
            quote(collection),
            aoi.to_wkt(),
            quote(product_type),
            start,
            end
        )
    }

    /// Query the catalog, keeping at most `max_results` products in catalog order
    pub fn resolve(
        &self,
        aoi: &AreaOfInterest,
        window: &TimeWindow,
        collection: &str,
        product_type: &str,
        max_results: usize,
    ) -> SpratResult<Vec<ProductDescriptor>> {
        if max_results == 0 {
            return Ok(Vec::new());
        }

        let filter = self.build_filter(aoi, window, collection, product_type);
        let url = format!("{}/Products", self.config.base_url.trim_end_matches('/'));
        log::info!("Querying catalog for {} {} products", collection, product_type);
        log::debug!("Catalog filter: {}", filter);

        let top = page_size(max_results).to_string();
        let request = self
            .client
            .get(&url)
            .query(&[("$filter", filter.as_str()), ("$top", top.as_str())]);
        let mut page = self.fetch_page(request)?;

        let mut products = Vec::new();
        let mut pages = 1;
        loop {
            products.extend(page.value.into_iter().map(|entry| ProductDescriptor {
                id: entry.id,
                name: entry.name,
                collection: collection.to_string(),
                product_type: product_type.to_string(),
            }));

            if products.len() >= max_results {
                break;
            }
            match page.next_link {
                Some(next) if pages < self.config.page_cap => {
                    log::debug!("Following catalog page link {}", next);
                    page = self.fetch_page(self.client.get(&next))?;
                    pages += 1;
                }
                Some(_) => {
                    log::warn!("Catalog page cap of {} reached", self.config.page_cap);
                    break;
                }
                None => break,
            }
        }

        products.truncate(max_results);
        log::info!("Catalog returned {} product(s)", products.len());
        Ok(products)
    }

    fn fetch_page(&self, request: reqwest::blocking::RequestBuilder) -> SpratResult<CatalogPage> {
        let response = request
            .send()
            .map_err(|e| SpratError::Catalog(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SpratError::Catalog(format!("HTTP {} from catalog", status.as_u16())));
        }

        let body = response
            .text()
            .map_err(|e| SpratError::Catalog(format!("failed to read body: {}", e)))?;
        serde_json::from_str(&body)
            .map_err(|e| SpratError::Catalog(format!("malformed catalog response: {}", e)))
    }
}
