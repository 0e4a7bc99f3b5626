//! The authenticated request capability the order workflow is built on.
//!
//! Everything above this module talks to a [`Transport`]; [`HttpTransport`] is
//! the reqwest implementation used outside of tests.

use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response, multipart};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::borrow::Cow;
use std::path::PathBuf;
use std::thread;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{Credentials, HttpSettings};
use crate::error::{Error, Result, Stage, format_http_error};
use crate::util::retriable_status;

/// Status code and raw body of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// A file sent as one multipart part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub field: String,
    pub path: PathBuf,
}

/// The request never produced a response.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct NetworkError {
    pub message: String,
}

pub type Params<'a> = [(&'a str, String)];

/// Whether a request may be sent again after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Repeat on connection errors and 408/429/5xx (idempotent lookups and downloads).
    Transient,
    /// One attempt only; the caller sees the first failure.
    Never,
}

pub trait Transport {
    fn get(
        &self,
        url: &str,
        params: &Params<'_>,
        headers: &[(&str, &str)],
        retry: Retry,
    ) -> std::result::Result<HttpResponse, NetworkError>;

    fn post(
        &self,
        url: &str,
        params: &Params<'_>,
        files: &[FilePart],
        retry: Retry,
    ) -> std::result::Result<HttpResponse, NetworkError>;
}

/// Maps a network failure or a non-2xx response into a [`Error::Transport`] for `stage`.
pub(crate) fn expect_success(
    stage: Stage,
    url: &str,
    result: std::result::Result<HttpResponse, NetworkError>,
) -> Result<HttpResponse> {
    let resp = result.map_err(|e| Error::Transport {
        stage,
        status: None,
        url: url.to_string(),
        detail: e.message,
    })?;
    if !resp.is_success() {
        return Err(format_http_error(stage, resp.status, url, &resp.body));
    }
    Ok(resp)
}

/// Blocking reqwest transport authenticated against Earthdata Login.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    credentials: Credentials,
    settings: HttpSettings,
    http: HttpClient,
}

impl HttpTransport {
    pub fn new(credentials: Credentials, verify: bool, settings: HttpSettings) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("nsidc-order/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("nsidc-order")),
        );

        let mut builder = HttpClient::builder()
            .default_headers(default_headers)
            .timeout(settings.timeout);

        if !verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            credentials,
            settings,
            http,
        })
    }

    fn apply_auth(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Credentials::Token(token) => req.bearer_auth(token.trim()),
            Credentials::Login { username, password } => req.basic_auth(username, Some(password)),
        }
    }

    fn robust_request<F>(
        &self,
        url: &str,
        retry: Retry,
        mut f: F,
    ) -> std::result::Result<HttpResponse, NetworkError>
    where
        F: FnMut() -> std::result::Result<RequestBuilder, NetworkError>,
    {
        let retry_max = match retry {
            Retry::Transient => self.settings.retry_max.max(1),
            Retry::Never => 1,
        };
        let mut tries = 0usize;
        loop {
            tries += 1;
            match f()?.send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if retriable_status(status) && tries < retry_max {
                        warn!(url, status, attempt = tries, "transient HTTP status, retrying");
                        thread::sleep(self.settings.retry_sleep);
                        continue;
                    }
                    return read_response(resp);
                }
                Err(err) => {
                    if tries >= retry_max {
                        return Err(NetworkError {
                            message: format!("could not connect: {}", err),
                        });
                    }
                    warn!(url, attempt = tries, error = %err, "request failed, retrying");
                    thread::sleep(self.settings.retry_sleep);
                }
            }
        }
    }
}

fn read_response(resp: Response) -> std::result::Result<HttpResponse, NetworkError> {
    let status = resp.status().as_u16();
    let body = resp.bytes().map_err(|e| NetworkError {
        message: format!("failed to read response body: {}", e),
    })?;
    debug!(status, bytes = body.len(), "response received");
    Ok(HttpResponse::new(status, body.to_vec()))
}

impl Transport for HttpTransport {
    fn get(
        &self,
        url: &str,
        params: &Params<'_>,
        headers: &[(&str, &str)],
        retry: Retry,
    ) -> std::result::Result<HttpResponse, NetworkError> {
        debug!(url, ?retry, "GET");
        self.robust_request(url, retry, || {
            let mut req = self.http.get(url).query(params);
            for (k, v) in headers {
                req = req.header(*k, *v);
            }
            Ok(self.apply_auth(req))
        })
    }

    fn post(
        &self,
        url: &str,
        params: &Params<'_>,
        files: &[FilePart],
        retry: Retry,
    ) -> std::result::Result<HttpResponse, NetworkError> {
        debug!(url, files = files.len(), ?retry, "POST");
        self.robust_request(url, retry, || {
            let mut req = self.http.post(url).query(params);
            if !files.is_empty() {
                // multipart forms are consumed by `send`, so rebuild one per attempt
                let mut form = multipart::Form::new();
                for part in files {
                    form = form
                        .file(part.field.clone(), &part.path)
                        .map_err(|e| NetworkError {
                            message: format!("failed to read {}: {}", part.path.display(), e),
                        })?;
                }
                req = req.multipart(form);
            }
            Ok(self.apply_auth(req))
        })
    }
}
