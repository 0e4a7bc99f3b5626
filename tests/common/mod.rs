//! Scripted transport, fake clock and response fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use nsidc_order::{
    Client, Clock, Endpoints, FilePart, HttpResponse, NetworkError, Params, ProductConfig, Retry,
    Transport,
};
use serde_json::json;

pub const CMR: &str = "http://cmr.test";
pub const EGI: &str = "http://egi.test";

pub fn endpoints() -> Endpoints {
    Endpoints::from_hosts(CMR, EGI)
}

pub fn search_url() -> String {
    endpoints().granule_search
}

pub fn order_url() -> String {
    endpoints().order_request
}

pub fn status_url(order_id: &str) -> String {
    format!("{}/{}", endpoints().order_request, order_id)
}

pub fn download_url(order_id: &str) -> String {
    format!("{}{}.zip", endpoints().download_base, order_id)
}

#[derive(Debug, Clone)]
pub struct Call {
    pub method: &'static str,
    pub url: String,
    pub params: Vec<(String, String)>,
    pub files: Vec<FilePart>,
    pub retry: Retry,
}

impl Call {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

enum Reply {
    Response(HttpResponse),
    NetworkDown,
}

/// Replies to each URL from a queue of canned responses, in order, and records every call.
/// A URL with nothing left queued answers 404.
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, url: impl Into<String>, response: HttpResponse) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry(url.into())
            .or_default()
            .push_back(Reply::Response(response));
        self
    }

    pub fn on_network_error(&self, url: impl Into<String>) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry(url.into())
            .or_default()
            .push_back(Reply::NetworkDown);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, url: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.url == url).collect()
    }

    fn respond(
        &self,
        method: &'static str,
        url: &str,
        params: &Params<'_>,
        files: &[FilePart],
        retry: Retry,
    ) -> Result<HttpResponse, NetworkError> {
        self.calls.lock().unwrap().push(Call {
            method,
            url: url.to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            files: files.to_vec(),
            retry,
        });

        let next = self
            .routes
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|q| q.pop_front());
        match next {
            Some(Reply::Response(r)) => Ok(r),
            Some(Reply::NetworkDown) => Err(NetworkError {
                message: "connection refused".into(),
            }),
            None => Ok(HttpResponse::new(404, format!("no route for {}", url))),
        }
    }
}

impl Transport for FakeTransport {
    fn get(
        &self,
        url: &str,
        params: &Params<'_>,
        _headers: &[(&str, &str)],
        retry: Retry,
    ) -> Result<HttpResponse, NetworkError> {
        self.respond("GET", url, params, &[], retry)
    }

    fn post(
        &self,
        url: &str,
        params: &Params<'_>,
        files: &[FilePart],
        retry: Retry,
    ) -> Result<HttpResponse, NetworkError> {
        self.respond("POST", url, params, files, retry)
    }
}

/// Clock whose sleeps return immediately and advance `now`.
pub struct ManualClock {
    start: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        })
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.elapsed.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        *self.elapsed.lock().unwrap() += duration;
        self.sleeps.lock().unwrap().push(duration);
    }
}

/// Client wired to `transport` and `clock`, product version pinned to 006.
pub fn client(transport: &Arc<FakeTransport>, clock: &Arc<ManualClock>) -> Client {
    Client::with_transport(transport.clone())
        .with_endpoints(endpoints())
        .with_product(ProductConfig::default().with_version("006"))
        .with_email(Some("tester@example.org".into()))
        .with_clock(clock.clone())
}

pub fn granule_page(first: usize, count: usize, size_mb: f64) -> HttpResponse {
    let entries: Vec<_> = (first..first + count)
        .map(|i| {
            json!({
                "id": format!("G{:04}-NSIDC_ECS", i),
                "title": format!("ATL06_2020010{}_{:04}.h5", i % 9, i),
                "granule_size": format!("{}", size_mb),
            })
        })
        .collect();
    HttpResponse::new(200, json!({ "feed": { "entry": entries } }).to_string())
}

pub fn empty_page() -> HttpResponse {
    granule_page(0, 0, 0.0)
}

pub fn order_accepted(order_id: &str) -> HttpResponse {
    HttpResponse::new(
        200,
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <eesi:agentResponse xmlns:eesi=\"http://eosdis.nasa.gov/esi/rsp/e\">\
             <order><orderId>{}</orderId><Info>queued</Info></order>\
             </eesi:agentResponse>",
            order_id
        ),
    )
}

pub fn status(token: &str, messages: &[&str]) -> HttpResponse {
    let info = if messages.is_empty() {
        String::new()
    } else {
        let items: String = messages
            .iter()
            .map(|m| format!("<info>{}</info>", m))
            .collect();
        format!("<processInfo>{}</processInfo>", items)
    };
    HttpResponse::new(
        200,
        format!(
            "<eesi:agentResponse xmlns:eesi=\"http://eosdis.nasa.gov/esi/rsp/e\">\
             <requestStatus><status>{}</status><numberProcessed>1</numberProcessed></requestStatus>\
             {}</eesi:agentResponse>",
            token, info
        ),
    )
}

pub fn archive(entries: &[(&str, &str)]) -> HttpResponse {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(*name, zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(data.as_bytes()).unwrap();
    }
    HttpResponse::new(200, writer.finish().unwrap().into_inner())
}
