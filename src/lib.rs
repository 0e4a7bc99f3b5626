//! A Rust client for ordering ICESat-2 subsets from NSIDC.
//!
//! The flow mirrors the NSIDC order API:
//! search CMR for matching granules, submit one asynchronous subset order per
//! page of granules, poll each order until it finishes, then download and unpack
//! the resulting archive.
//!
//! ## Quick start
//! - Configure Earthdata Login via environment variables (`EARTHDATA_TOKEN`, or
//!   `EARTHDATA_USERNAME` and `EARTHDATA_PASSWORD`) or a `.nsidcrc` file
//!   (supported in the current directory and in your home directory).
//! - Call [`Client::order`] with a temporal range, a spatial filter and a destination.
//!
//! ```no_run
//! use nsidc_order::{BoundingBox, Client, SpatialFilter, TemporalRange};
//!
//! fn main() -> nsidc_order::Result<()> {
//!     let client = Client::from_env()?;
//!     let report = client.order(
//!         TemporalRange::parse("2020-01-01", "2020-01-02")?,
//!         SpatialFilter::BoundingBox(BoundingBox::new(-100.0, 30.0, -90.0, 40.0)?),
//!         std::path::Path::new("data"),
//!     )?;
//!     for page in &report.pages {
//!         println!("page {}: {} ({})", page.page, page.outcome, page.order_id);
//!     }
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

mod capabilities;
mod client;
mod config;
mod error;
mod order;
mod poll;
mod query;
mod report;
mod retrieve;
mod search;
mod transport;
mod util;
mod xml;

pub use capabilities::{Capabilities, fetch_capabilities};
pub use client::Client;
pub use config::{
    CMR_URL, ClientConfig, Credentials, Endpoints, HttpSettings, NSIDC_URL, ORDER_PAGE_SIZE,
    ProductConfig,
};
pub use error::{Error, Result, Stage};
pub use order::{OrderId, OrderRequest, OrderSubmitter, coverage_expression, page_count};
pub use poll::{
    CancellationToken, Clock, OrderStatus, POLL_INTERVAL, PollOutcome, PollResult, RetryPolicy,
    StatusPoller, StatusSnapshot, SystemClock,
};
pub use query::{BoundingBox, SearchQuery, SpatialFilter, TemporalRange};
pub use report::{JobReport, PageOutcome, PageReport};
pub use retrieve::{ResultRetriever, extract_archive};
pub use search::{Granule, SearchPaginator, SearchResult, SearchStats, latest_version};
pub use transport::{
    FilePart, HttpResponse, HttpTransport, NetworkError, Params, Retry, Transport,
};
