use std::collections::BTreeMap;

use crate::config::Endpoints;
use crate::error::{Error, Result, Stage};
use crate::transport::{Retry, Transport, expect_success};
use crate::util::urljoin;
use crate::xml;

/// Subsetting options the EGI service offers for one product version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capabilities {
    /// Attributes of each `<SubsetAgent>`.
    pub subset_agents: Vec<BTreeMap<String, String>>,
    /// Subsettable variable paths, `/`-separated with a leading `/`.
    pub variables: Vec<String>,
}

impl Capabilities {
    pub fn supports_subsetting(&self) -> bool {
        !self.subset_agents.is_empty()
    }
}

pub fn fetch_capabilities(
    transport: &dyn Transport,
    endpoints: &Endpoints,
    short_name: &str,
    version: &str,
) -> Result<Capabilities> {
    let url = urljoin(
        &endpoints.capabilities_base,
        &format!("{}.{}.xml", short_name, version),
    );
    let resp = expect_success(
        Stage::Capabilities,
        &url,
        transport.get(&url, &[], &[], Retry::Transient),
    )?;
    parse_capabilities(&resp.text())
}

pub(crate) fn parse_capabilities(body: &str) -> Result<Capabilities> {
    let invalid =
        |e: quick_xml::Error| Error::malformed(Stage::Capabilities, format!("invalid XML: {}", e));

    let subset_agents = xml::elements(body, "SubsetAgent")
        .map_err(invalid)?
        .into_iter()
        .map(|e| e.attributes.into_iter().collect())
        .collect();

    let variables = xml::elements(body, "SubsetVariable")
        .map_err(invalid)?
        .iter()
        .filter_map(|e| e.attribute("value"))
        .map(normalize_variable)
        .collect();

    Ok(Capabilities {
        subset_agents,
        variables,
    })
}

/// `gt1l:land_ice_segments:h_li` -> `/gt1l/land_ice_segments/h_li`
fn normalize_variable(raw: &str) -> String {
    let path = raw.replace(':', "/");
    if path.starts_with('/') {
        path
    } else {
        format!("/{}", path)
    }
}
