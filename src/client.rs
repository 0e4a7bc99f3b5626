use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::capabilities::{Capabilities, fetch_capabilities};
use crate::config::{ClientConfig, Credentials, Endpoints, HttpSettings, ProductConfig, load_config};
use crate::error::{Error, Result};
use crate::order::{OrderRequest, OrderSubmitter, page_count};
use crate::poll::{CancellationToken, Clock, PollOutcome, RetryPolicy, StatusPoller, SystemClock};
use crate::query::{SearchQuery, SpatialFilter, TemporalRange};
use crate::report::{JobReport, PageOutcome, PageReport};
use crate::retrieve::ResultRetriever;
use crate::search::{SearchPaginator, SearchResult, latest_version};
use crate::transport::{HttpTransport, Transport};

/// Search, order and retrieval against NSIDC, one page at a time.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport + Send + Sync>,
    endpoints: Endpoints,
    product: ProductConfig,
    email: Option<String>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock + Send + Sync>,
    cancel: CancellationToken,
    progress: bool,
}

impl Client {
    /// Creates a client using environment variables and/or `.nsidcrc`.
    ///
    /// This is equivalent to `Client::new(None, None, None)`.
    pub fn from_env() -> Result<Self> {
        Self::new(None, None, None)
    }

    /// Creates a client using (in order of precedence):
    /// - explicit arguments
    /// - `EARTHDATA_TOKEN` / `EARTHDATA_USERNAME` + `EARTHDATA_PASSWORD` / `NSIDC_EMAIL`
    /// - config file from `NSIDC_RC` or `.nsidcrc`
    pub fn new(
        credentials: Option<Credentials>,
        email: Option<String>,
        verify: Option<bool>,
    ) -> Result<Self> {
        let cfg = load_config(credentials, email, verify)?;
        Self::from_config(cfg, HttpSettings::default())
    }

    pub fn from_config(cfg: ClientConfig, http: HttpSettings) -> Result<Self> {
        let transport = HttpTransport::new(cfg.credentials, cfg.verify, http)?;
        Ok(Self::with_transport(Arc::new(transport)).with_email(cfg.email))
    }

    /// A client over any [`Transport`], with default endpoints and product.
    pub fn with_transport(transport: Arc<dyn Transport + Send + Sync>) -> Self {
        Self {
            transport,
            endpoints: Endpoints::default(),
            product: ProductConfig::default(),
            email: None,
            policy: RetryPolicy::default(),
            clock: Arc::new(SystemClock),
            cancel: CancellationToken::new(),
            progress: false,
        }
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_product(mut self, product: ProductConfig) -> Self {
        self.product = product;
        self
    }

    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn product(&self) -> &ProductConfig {
        &self.product
    }

    /// The configured product version, or the newest one CMR lists.
    pub fn product_version(&self) -> Result<String> {
        match &self.product.version {
            Some(v) => Ok(v.clone()),
            None => latest_version(
                self.transport.as_ref(),
                &self.endpoints,
                &self.product.short_name,
            ),
        }
    }

    pub fn capabilities(&self) -> Result<Capabilities> {
        let version = self.product_version()?;
        fetch_capabilities(
            self.transport.as_ref(),
            &self.endpoints,
            &self.product.short_name,
            &version,
        )
    }

    /// Collects every granule matching `temporal` and `spatial`.
    pub fn search(
        &self,
        temporal: TemporalRange,
        spatial: Option<SpatialFilter>,
    ) -> Result<SearchResult> {
        self.product.validate()?;
        if spatial.is_none() {
            return Err(Error::InvalidQuery(
                "missing bounding box or polygon to search for".into(),
            ));
        }
        let version = self.product_version()?;
        self.search_version(&version, temporal, spatial)
    }

    fn search_version(
        &self,
        version: &str,
        temporal: TemporalRange,
        spatial: Option<SpatialFilter>,
    ) -> Result<SearchResult> {
        let query = SearchQuery {
            short_name: self.product.short_name.clone(),
            version: version.to_string(),
            temporal,
            spatial,
            page_size: self.product.search_page_size,
        };
        SearchPaginator::new(
            self.transport.as_ref(),
            &self.endpoints,
            self.product.max_search_pages,
        )
        .search(&query)
    }

    /// Orders every matching granule, [`ProductConfig::order_page_size`] per
    /// order, and extracts the results into `destination`.
    ///
    /// Pages run one after another. Transport and response errors abort the job;
    /// a page that ends `failed` or times out is recorded and the job moves on.
    pub fn order(
        &self,
        temporal: TemporalRange,
        spatial: SpatialFilter,
        destination: &Path,
    ) -> Result<JobReport> {
        self.order_with(temporal, spatial, destination, |req| req)
    }

    /// Like [`Client::order`], uploading `boundary_file` with every order.
    pub fn order_with_boundary(
        &self,
        temporal: TemporalRange,
        spatial: SpatialFilter,
        boundary_file: &Path,
        destination: &Path,
    ) -> Result<JobReport> {
        self.order_with(temporal, spatial, destination, |req| {
            req.with_boundary_file(boundary_file)
        })
    }

    fn order_with<F>(
        &self,
        temporal: TemporalRange,
        spatial: SpatialFilter,
        destination: &Path,
        customize: F,
    ) -> Result<JobReport>
    where
        F: Fn(OrderRequest) -> OrderRequest,
    {
        self.product.validate()?;
        self.cancel.check()?;

        let version = self.product_version()?;
        let found = self.search_version(&version, temporal, Some(spatial.clone()))?;
        let granule_count = found.stats.count;
        let pages = page_count(granule_count, self.product.order_page_size);
        info!(granule_count, pages, "starting order job");

        let transport = self.transport.as_ref();
        let submitter = OrderSubmitter::new(transport, &self.endpoints);
        let poller = StatusPoller::new(
            transport,
            &self.endpoints,
            &self.policy,
            self.clock.as_ref(),
            &self.cancel,
        )
        .with_progress(self.progress);
        let retriever = ResultRetriever::new(transport, &self.endpoints);

        let mut reports = Vec::with_capacity(pages);
        for page in 1..=pages {
            self.cancel.check()?;
            info!(page, pages, "submitting order");

            let request = customize(OrderRequest::new(
                &self.product,
                &version,
                temporal,
                spatial.clone(),
                self.email.clone(),
                page,
            ));
            let order_id = submitter.submit(&request)?;
            let polled = poller.wait(&order_id)?;

            let extracted = match polled.outcome {
                PollOutcome::Finished(status) if status.has_archive() => {
                    Some(retriever.retrieve(&order_id, destination)?)
                }
                _ => None,
            };

            let report = PageReport {
                page,
                order_id,
                outcome: PageOutcome::from(polled.outcome),
                diagnostics: polled.diagnostics,
                extracted,
                polls: polled.polls,
            };
            log_page(&report);
            reports.push(report);
        }

        Ok(JobReport {
            granule_count,
            page_count: pages,
            pages: reports,
        })
    }
}

fn log_page(report: &PageReport) {
    let order_id = &report.order_id;
    match report.outcome {
        PageOutcome::Complete => {
            info!(page = report.page, %order_id, outcome = %report.outcome, "data request complete")
        }
        PageOutcome::CompleteWithErrors => warn!(
            page = report.page,
            %order_id,
            outcome = %report.outcome,
            "data request complete with errors"
        ),
        PageOutcome::Failed | PageOutcome::TimedOut => warn!(
            page = report.page,
            %order_id,
            outcome = %report.outcome,
            "data request failed"
        ),
    }
    for message in &report.diagnostics {
        warn!(page = report.page, %order_id, "{}", message);
    }
}
