//! Granule discovery against the CMR search API.

use serde::{Deserialize, Deserializer};
use tracing::{debug, info};

use crate::config::Endpoints;
use crate::error::{Error, Result, Stage};
use crate::query::SearchQuery;
use crate::transport::{Retry, Transport, expect_success};

const JSON_HEADERS: &[(&str, &str)] = &[("Accept", "application/json")];

/// One data file matched by a search.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Granule {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub producer_granule_id: Option<String>,
    /// Size in MB.
    #[serde(rename = "granule_size", deserialize_with = "de_size")]
    pub size_mb: f64,
}

// CMR reports sizes as numeric strings.
fn de_size<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Number(f64),
        Text(String),
    }

    match Size::deserialize(deserializer)? {
        Size::Number(n) => Ok(n),
        Size::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
struct GranuleResponse {
    feed: GranuleFeed,
}

#[derive(Debug, Deserialize)]
struct GranuleFeed {
    #[serde(default)]
    entry: Vec<Granule>,
}

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    feed: CollectionFeed,
}

#[derive(Debug, Deserialize)]
struct CollectionFeed {
    #[serde(default)]
    entry: Vec<CollectionEntry>,
}

#[derive(Debug, Deserialize)]
struct CollectionEntry {
    version_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchStats {
    pub count: usize,
    /// `None` when nothing matched.
    pub mean_size_mb: Option<f64>,
    pub total_size_mb: Option<f64>,
}

impl SearchStats {
    pub fn from_granules(granules: &[Granule]) -> Self {
        if granules.is_empty() {
            return Self {
                count: 0,
                mean_size_mb: None,
                total_size_mb: None,
            };
        }
        let total: f64 = granules.iter().map(|g| g.size_mb).sum();
        Self {
            count: granules.len(),
            mean_size_mb: Some(total / granules.len() as f64),
            total_size_mb: Some(total),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Granules in the order CMR returned them.
    pub granules: Vec<Granule>,
    pub stats: SearchStats,
    /// Search requests issued, including the final empty page.
    pub requests: usize,
}

/// Walks CMR result pages until one comes back empty.
pub struct SearchPaginator<'a> {
    transport: &'a dyn Transport,
    endpoints: &'a Endpoints,
    max_pages: usize,
}

impl<'a> SearchPaginator<'a> {
    pub fn new(transport: &'a dyn Transport, endpoints: &'a Endpoints, max_pages: usize) -> Self {
        Self {
            transport,
            endpoints,
            max_pages,
        }
    }

    pub fn search(&self, query: &SearchQuery) -> Result<SearchResult> {
        // reject an unusable query before touching the network
        query.params(1)?;

        let url = self.endpoints.granule_search.as_str();
        let mut granules = Vec::new();
        let mut page_num = 1usize;

        loop {
            if page_num > self.max_pages {
                return Err(Error::PageLimitExceeded {
                    limit: self.max_pages,
                });
            }

            let params = query.params(page_num)?;
            let resp = expect_success(
                Stage::Search,
                url,
                self.transport.get(url, &params, JSON_HEADERS, Retry::Transient),
            )?;
            let page: GranuleResponse = serde_json::from_slice(&resp.body).map_err(|e| {
                Error::malformed(Stage::Search, format!("page {}: {}", page_num, e))
            })?;

            if page.feed.entry.is_empty() {
                break;
            }

            debug!(page_num, entries = page.feed.entry.len(), "search page received");
            granules.extend(page.feed.entry);
            page_num += 1;
        }

        let stats = SearchStats::from_granules(&granules);
        match (stats.mean_size_mb, stats.total_size_mb) {
            (Some(mean), Some(total)) => info!(
                count = stats.count,
                mean_size_mb = mean,
                total_size_mb = total,
                "granule search complete"
            ),
            _ => info!(count = 0, "granule search matched nothing"),
        }

        Ok(SearchResult {
            granules,
            stats,
            requests: page_num,
        })
    }
}

/// Newest `version_id` CMR lists for `short_name`.
pub fn latest_version(
    transport: &dyn Transport,
    endpoints: &Endpoints,
    short_name: &str,
) -> Result<String> {
    let url = endpoints.collections.as_str();
    let params = [("short_name", short_name.to_string())];
    let resp = expect_success(
        Stage::Collections,
        url,
        transport.get(url, &params, JSON_HEADERS, Retry::Transient),
    )?;
    let collections: CollectionResponse = serde_json::from_slice(&resp.body)
        .map_err(|e| Error::malformed(Stage::Collections, e.to_string()))?;

    // zero-padded ids ("005", "006") so lexical order is version order
    let version = collections
        .feed
        .entry
        .into_iter()
        .map(|c| c.version_id)
        .max()
        .ok_or_else(|| {
            Error::malformed(
                Stage::Collections,
                format!("no collections found for {}", short_name),
            )
        })?;
    debug!(short_name, %version, "resolved product version");
    Ok(version)
}
