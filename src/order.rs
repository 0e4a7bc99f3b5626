//! Building and submitting subset orders to the EGI request endpoint.

use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::{Endpoints, ProductConfig};
use crate::error::{Error, Result, Stage};
use crate::query::{SpatialFilter, TemporalRange};
use crate::transport::{FilePart, Retry, Transport, expect_success};
use crate::xml;

/// Server-assigned handle of a submitted order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Number of orders needed for `granules` at `page_size` granules per order.
pub fn page_count(granules: usize, page_size: usize) -> usize {
    granules.div_ceil(page_size.max(1))
}

/// Comma-separated coverage: every beam variable under every beam, then the
/// ancillary paths once.
pub fn coverage_expression(
    beams: &[String],
    beam_variables: &[String],
    ancillary_variables: &[String],
) -> String {
    let mut paths =
        Vec::with_capacity(beams.len() * beam_variables.len() + ancillary_variables.len());
    for variable in beam_variables {
        for beam in beams {
            paths.push(format!(
                "/{}/{}",
                beam.trim_matches('/'),
                variable.trim_start_matches('/')
            ));
        }
    }
    paths.extend(ancillary_variables.iter().cloned());
    paths.join(",")
}

/// The subset request for one page of the job.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub short_name: String,
    pub version: String,
    pub temporal: TemporalRange,
    pub spatial: SpatialFilter,
    pub coverage: String,
    pub request_mode: String,
    pub page_size: usize,
    pub email: Option<String>,
    pub page_num: usize,
    /// Boundary file (shapefile / KML) uploaded with the order instead of a plain GET.
    pub boundary_file: Option<PathBuf>,
}

impl OrderRequest {
    pub fn new(
        product: &ProductConfig,
        version: &str,
        temporal: TemporalRange,
        spatial: SpatialFilter,
        email: Option<String>,
        page_num: usize,
    ) -> Self {
        Self {
            short_name: product.short_name.clone(),
            version: version.to_string(),
            temporal,
            spatial,
            coverage: coverage_expression(
                &product.beams,
                &product.beam_variables,
                &product.ancillary_variables,
            ),
            request_mode: product.request_mode.clone(),
            page_size: product.order_page_size,
            email,
            page_num,
            boundary_file: None,
        }
    }

    pub fn with_boundary_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.boundary_file = Some(path.into());
        self
    }

    pub fn params(&self) -> Vec<(&'static str, String)> {
        let temporal = self.temporal.to_param();
        let mut params = vec![
            ("short_name", self.short_name.clone()),
            ("version", self.version.clone()),
            ("time", temporal.replace('Z', "")),
            ("temporal", temporal),
        ];
        params.extend(self.spatial.params(true));
        params.push(("Coverage", self.coverage.clone()));
        params.push(("request_mode", self.request_mode.clone()));
        params.push(("page_size", self.page_size.to_string()));
        if let Some(email) = &self.email {
            params.push(("email", email.clone()));
        }
        params.push(("page_num", self.page_num.to_string()));
        params
    }
}

/// Reads the order id out of an EGI submission response: the first child of
/// the first `<order>` element, or that element's own text.
pub(crate) fn parse_order_id(body: &str) -> Result<OrderId> {
    let orders = xml::elements(body, "order")
        .map_err(|e| Error::malformed(Stage::Submission, format!("invalid XML: {}", e)))?;
    orders
        .first()
        .and_then(|o| o.first_value())
        .map(|id| OrderId::new(id.trim()))
        .ok_or_else(|| Error::malformed(Stage::Submission, "no <order> element in response"))
}

pub struct OrderSubmitter<'a> {
    transport: &'a dyn Transport,
    endpoints: &'a Endpoints,
}

impl<'a> OrderSubmitter<'a> {
    pub fn new(transport: &'a dyn Transport, endpoints: &'a Endpoints) -> Self {
        Self {
            transport,
            endpoints,
        }
    }

    pub fn submit(&self, request: &OrderRequest) -> Result<OrderId> {
        let url = self.endpoints.order_request.as_str();
        let params = request.params();

        let result = match &request.boundary_file {
            Some(path) => {
                let files = [FilePart {
                    field: "shapefile".to_string(),
                    path: path.clone(),
                }];
                self.transport.post(url, &params, &files, Retry::Never)
            }
            None => self.transport.get(url, &params, &[], Retry::Never),
        };
        let resp = expect_success(Stage::Submission, url, result)?;
        debug!(page = request.page_num, status = resp.status, "order request accepted");

        let order_id = parse_order_id(&resp.text())?;
        info!(page = request.page_num, %order_id, "order submitted");
        Ok(order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::BoundingBox;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn page_count_rounds_up() {
        assert_eq!(page_count(25, 10), 3);
        assert_eq!(page_count(15, 10), 2);
        assert_eq!(page_count(10, 10), 1);
        assert_eq!(page_count(0, 10), 0);
    }

    #[test]
    fn coverage_is_beam_variable_cross_product() {
        let beams = s(&["gt1l", "gt1r", "gt2l"]);
        let vars = s(&["/land_ice_segments/h_li", "/land_ice_segments/latitude"]);
        let anc = s(&["/orbit_info/rgt", "/orbit_info/cycle_number"]);
        let expr = coverage_expression(&beams, &vars, &anc);
        let parts: Vec<&str> = expr.split(',').collect();

        assert_eq!(parts.len(), beams.len() * vars.len() + anc.len());
        let beam_parts = &parts[..beams.len() * vars.len()];
        for beam in &beams {
            for var in &vars {
                let want = format!("/{}{}", beam, var);
                assert_eq!(beam_parts.iter().filter(|p| **p == want).count(), 1, "{want}");
            }
        }
        assert!(expr.ends_with(",/orbit_info/rgt,/orbit_info/cycle_number"));
        assert_eq!(parts[0], "/gt1l/land_ice_segments/h_li");
        assert_eq!(parts[1], "/gt1r/land_ice_segments/h_li");
    }

    #[test]
    fn default_product_coverage_size() {
        let p = ProductConfig::default();
        let expr = coverage_expression(&p.beams, &p.beam_variables, &p.ancillary_variables);
        assert_eq!(expr.split(',').count(), 6 * 8 + 4);
    }

    #[test]
    fn request_params_carry_every_field() {
        let req = OrderRequest::new(
            &ProductConfig::default(),
            "006",
            TemporalRange::parse("2020-01-01", "2020-01-02").unwrap(),
            SpatialFilter::BoundingBox(BoundingBox::new(-100.0, 30.0, -90.0, 40.0).unwrap()),
            Some("me@example.org".into()),
            2,
        );
        let params = req.params();
        let get = |k: &str| {
            params
                .iter()
                .find(|(name, _)| *name == k)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("short_name"), Some("ATL06"));
        assert_eq!(get("version"), Some("006"));
        assert_eq!(get("temporal"), Some("2020-01-01T00:00:00Z,2020-01-02T23:59:59Z"));
        assert_eq!(get("time"), Some("2020-01-01T00:00:00,2020-01-02T23:59:59"));
        assert_eq!(get("bounding_box"), Some("-100,30,-90,40"));
        assert_eq!(get("bbox"), Some("-100,30,-90,40"));
        assert_eq!(get("request_mode"), Some("async"));
        assert_eq!(get("page_size"), Some("10"));
        assert_eq!(get("email"), Some("me@example.org"));
        assert_eq!(get("page_num"), Some("2"));
        assert!(get("Coverage").is_some_and(|c| c.starts_with("/gt1r/")));
    }

    #[test]
    fn order_id_from_first_order_element() {
        let body = "<eesi:agentResponse><order><orderId>5000001</orderId><Info/></order>\
                    <order><orderId>5000002</orderId></order></eesi:agentResponse>";
        assert_eq!(parse_order_id(body).unwrap(), OrderId::new("5000001"));
        assert_eq!(parse_order_id("<r><order> 42 </order></r>").unwrap().as_str(), "42");
    }

    #[test]
    fn missing_order_is_malformed() {
        let body = "<eesi:agentResponse><message>queued</message></eesi:agentResponse>";
        let err = parse_order_id(body).unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedResponse {
                stage: Stage::Submission,
                ..
            }
        ));
    }
}
