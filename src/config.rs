use anyhow::Context;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Earthdata Login credentials handed to the HTTP transport.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Earthdata user token, sent as a bearer token.
    Token(String),
    /// Earthdata username and password, sent as basic auth.
    Login { username: String, password: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Token(_) => f.write_str("Token(***)"),
            Credentials::Login { username, .. } => f
                .debug_struct("Login")
                .field("username", username)
                .field("password", &"***")
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub credentials: Credentials,
    /// Address NSIDC sends order notifications to.
    pub email: Option<String>,
    /// Whether to verify TLS certificates.
    pub verify: bool,
}

/// Remote endpoints of the search, order and download services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub granule_search: String,
    pub collections: String,
    pub order_request: String,
    pub download_base: String,
    pub capabilities_base: String,
}

pub const CMR_URL: &str = "https://cmr.earthdata.nasa.gov";
pub const NSIDC_URL: &str = "https://n5eil02u.ecs.nsidc.org";

impl Endpoints {
    /// Endpoints relative to a CMR host and an NSIDC EGI host.
    pub fn from_hosts(cmr: &str, nsidc: &str) -> Self {
        let cmr = cmr.trim_end_matches('/');
        let nsidc = nsidc.trim_end_matches('/');
        Self {
            granule_search: format!("{}/search/granules", cmr),
            collections: format!("{}/search/collections.json", cmr),
            order_request: format!("{}/egi/request", nsidc),
            download_base: format!("{}/esir/", nsidc),
            capabilities_base: format!("{}/egi/capabilities", nsidc),
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::from_hosts(CMR_URL, NSIDC_URL)
    }
}

/// What to order and how the job is paged.
#[derive(Debug, Clone)]
pub struct ProductConfig {
    pub short_name: String,
    /// `None` resolves to the newest version listed in CMR.
    pub version: Option<String>,
    pub beams: Vec<String>,
    /// Per-beam variable paths, each starting with `/`.
    pub beam_variables: Vec<String>,
    /// Variable paths requested once per granule rather than per beam.
    pub ancillary_variables: Vec<String>,
    /// Granules per order.
    pub order_page_size: usize,
    /// Granules per search page.
    pub search_page_size: usize,
    /// Upper bound on search pages before giving up.
    pub max_search_pages: usize,
    pub request_mode: String,
}

pub const ORDER_PAGE_SIZE: usize = 10;

impl Default for ProductConfig {
    fn default() -> Self {
        fn owned(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }

        Self {
            short_name: "ATL06".to_string(),
            version: None,
            beams: owned(&["gt1r", "gt1l", "gt2r", "gt2l", "gt3r", "gt3l"]),
            beam_variables: owned(&[
                "/land_ice_segments/atl06_quality_summary",
                "/land_ice_segments/delta_time",
                "/land_ice_segments/h_li",
                "/land_ice_segments/h_li_sigma",
                "/land_ice_segments/latitude",
                "/land_ice_segments/longitude",
                "/land_ice_segments/segment_id",
                "/land_ice_segments/sigma_geo_h",
            ]),
            ancillary_variables: owned(&[
                "/ancillary_data/atlas_sdp_gps_epoch",
                "/orbit_info/cycle_number",
                "/orbit_info/rgt",
                "/orbit_info/orbit_number",
            ]),
            order_page_size: ORDER_PAGE_SIZE,
            search_page_size: 100,
            max_search_pages: 10_000,
            request_mode: "async".to_string(),
        }
    }
}

impl ProductConfig {
    pub fn with_short_name(mut self, short_name: impl Into<String>) -> Self {
        self.short_name = short_name.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.order_page_size == 0 || self.search_page_size == 0 {
            return Err(Error::Config("page sizes must be greater than zero".into()));
        }
        if self.max_search_pages == 0 {
            return Err(Error::Config("max_search_pages must be greater than zero".into()));
        }
        if self.short_name.trim().is_empty() {
            return Err(Error::Config("product short name is empty".into()));
        }
        Ok(())
    }
}

/// Timeouts and transient-retry knobs of the HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    /// Attempts per request on connection errors and 408/429/5xx.
    pub retry_max: usize,
    pub retry_sleep: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            retry_max: 3,
            retry_sleep: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default)]
struct RcConfig {
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
    email: Option<String>,
    verify: Option<bool>,
}

impl RcConfig {
    fn from_env(env: &impl Fn(&str) -> Option<String>) -> Self {
        let var = |k: &str| env(k).filter(|v| !v.trim().is_empty());
        Self {
            username: var("EARTHDATA_USERNAME"),
            password: var("EARTHDATA_PASSWORD"),
            token: var("EARTHDATA_TOKEN"),
            email: var("NSIDC_EMAIL"),
            verify: None,
        }
    }

    fn credentials(&self) -> Option<Credentials> {
        if let Some(token) = &self.token {
            return Some(Credentials::Token(token.clone()));
        }
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some(Credentials::Login {
                username: u.clone(),
                password: p.clone(),
            }),
            _ => None,
        }
    }

    /// Fills every unset field from `other`.
    fn or(self, other: RcConfig) -> RcConfig {
        RcConfig {
            username: self.username.or(other.username),
            password: self.password.or(other.password),
            token: self.token.or(other.token),
            email: self.email.or(other.email),
            verify: self.verify.or(other.verify),
        }
    }
}

/// Resolves configuration with precedence: arguments, then environment
/// (`EARTHDATA_*`, `NSIDC_EMAIL`), then the first `.nsidcrc` found.
pub(crate) fn load_config(
    credentials: Option<Credentials>,
    email: Option<String>,
    verify: Option<bool>,
) -> Result<ClientConfig> {
    let env = |k: &str| std::env::var(k).ok();
    let candidates = rc_candidates(&env);
    resolve_config(credentials, email, verify, &env, &candidates)
}

fn resolve_config(
    credentials: Option<Credentials>,
    email: Option<String>,
    verify: Option<bool>,
    env: &impl Fn(&str) -> Option<String>,
    rc_candidates: &[PathBuf],
) -> Result<ClientConfig> {
    let mut resolved = RcConfig {
        email,
        verify,
        ..RcConfig::default()
    }
    .or(RcConfig::from_env(env));
    let mut credentials = credentials.or_else(|| resolved.credentials());

    if credentials.is_none() || resolved.email.is_none() || resolved.verify.is_none() {
        if let Some(rc_path) = rc_candidates.iter().find(|p| p.exists()) {
            let file = read_rc(rc_path)
                .with_context(|| {
                    format!("failed to read configuration file {}", rc_path.display())
                })
                .map_err(|e| Error::Config(format!("{:#}", e)))?;
            // a complete credential set in the file beats one split across env and file
            credentials = credentials.or_else(|| file.credentials());
            resolved = resolved.or(file);
            credentials = credentials.or_else(|| resolved.credentials());
        }
    }

    let Some(credentials) = credentials else {
        let searched = if rc_candidates.is_empty() {
            ".nsidcrc".to_string()
        } else {
            rc_candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        return Err(Error::Config(format!(
            "missing Earthdata credentials (set EARTHDATA_TOKEN, or EARTHDATA_USERNAME and \
             EARTHDATA_PASSWORD, or put `token:` / `username:` + `password:` in one of: {})",
            searched
        )));
    };

    Ok(ClientConfig {
        credentials,
        email: resolved.email,
        verify: resolved.verify.unwrap_or(true),
    })
}

fn read_rc(path: &Path) -> anyhow::Result<RcConfig> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_rc(&text))
}

fn parse_rc(text: &str) -> RcConfig {
    let mut cfg = RcConfig::default();

    // `key:` may be on one line with its value on the next.
    let mut pending_key: Option<String> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(pk) = pending_key.take() {
            if !line.contains(':') {
                assign(&mut cfg, &pk, strip_quotes(line));
                continue;
            }
        }

        if let Some((k, v)) = line.split_once(':') {
            let k = k.trim().to_ascii_lowercase();
            let v = strip_quotes(v.trim());
            if v.is_empty() {
                pending_key = Some(k);
            } else {
                assign(&mut cfg, &k, v);
            }
        }
    }

    cfg
}

fn assign(cfg: &mut RcConfig, key: &str, value: &str) {
    let value = value.to_string();
    match key {
        "username" | "user" | "login" => cfg.username = Some(value),
        "password" => cfg.password = Some(value),
        "token" => cfg.token = Some(value),
        "email" => cfg.email = Some(value),
        "verify" => cfg.verify = Some(value != "0" && !value.eq_ignore_ascii_case("false")),
        _ => {}
    }
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn rc_candidates(env: &impl Fn(&str) -> Option<String>) -> Vec<PathBuf> {
    // 1) NSIDC_RC (explicit)
    // 2) ./.nsidcrc
    // 3) ~/.nsidcrc
    if let Some(p) = env("NSIDC_RC").filter(|p| !p.trim().is_empty()) {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(".nsidcrc"));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(".nsidcrc"));
    }
    v
}
