use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::xml;

pub type Result<T> = std::result::Result<T, Error>;

/// The remote endpoint a request was addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Search,
    Collections,
    Submission,
    Status,
    Download,
    Capabilities,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Search => "granule search",
            Stage::Collections => "collection lookup",
            Stage::Submission => "order submission",
            Stage::Status => "order status",
            Stage::Download => "order download",
            Stage::Capabilities => "capabilities",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// The search or order parameters cannot be sent as-is (for example no spatial filter).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Non-2xx response (`status` is set) or network failure (`status` is `None`).
    #[error("{stage} request failed{http}: {url}\n{detail}", http = .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Transport {
        stage: Stage,
        status: Option<u16>,
        url: String,
        detail: String,
    },

    /// An expected element was absent from a response body.
    #[error("malformed {stage} response: {detail}")]
    MalformedResponse { stage: Stage, detail: String },

    #[error("failed to extract archive into {}: {reason}", .path.display())]
    Extraction { path: PathBuf, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    /// Granule search kept returning pages past the configured cap.
    #[error("granule search did not terminate after {limit} page(s)")]
    PageLimitExceeded { limit: usize },

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// The endpoint involved, for transport and response errors.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Transport { stage, .. } | Error::MalformedResponse { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }

    pub(crate) fn malformed(stage: Stage, detail: impl Into<String>) -> Self {
        Error::MalformedResponse {
            stage,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Default, serde::Deserialize)]
struct CmrErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

/// Builds a transport error from a non-2xx response, pulling the server's own
/// messages out of CMR JSON (`{"errors": [...]}`) or NSIDC XML (`<message>`) bodies.
pub(crate) fn format_http_error(stage: Stage, status: u16, url: &str, body: &[u8]) -> Error {
    let text = String::from_utf8_lossy(body);

    let mut messages = serde_json::from_str::<CmrErrorResponse>(&text)
        .map(|e| e.errors)
        .unwrap_or_default();
    if messages.is_empty() {
        messages = xml::all_texts(&text, "message").unwrap_or_default();
    }
    let server = if messages.is_empty() {
        text.trim().chars().take(512).collect::<String>()
    } else {
        messages.join("\n")
    };

    let hint = match status {
        401 => Some(
            "Earthdata Login rejected the credentials.\n- Check EARTHDATA_USERNAME / EARTHDATA_PASSWORD or EARTHDATA_TOKEN\n- Tokens expire; generate a new one at https://urs.earthdata.nasa.gov",
        ),
        403 => Some(
            "Access denied. The NSIDC application may not be authorized for this Earthdata account\n(approve it under 'Applications > Authorized Apps' at https://urs.earthdata.nasa.gov).",
        ),
        404 if stage == Stage::Download => {
            Some("The order archive is not available (yet). It may have expired on the server.")
        }
        404 => Some("Endpoint not found. The configured endpoint URL may be outdated."),
        _ => None,
    };

    let detail = match hint {
        Some(hint) if server.is_empty() => hint.to_string(),
        Some(hint) => format!("{}\n\nServer message: {}", hint, server),
        None => server,
    };

    Error::Transport {
        stage,
        status: Some(status),
        url: url.to_string(),
        detail,
    }
}
