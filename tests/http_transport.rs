//! `HttpTransport` against a local HTTP server.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use nsidc_order::{
    CancellationToken, Credentials, Endpoints, Error, HttpSettings, HttpTransport, OrderId,
    OrderRequest, OrderSubmitter, ProductConfig, Retry, RetryPolicy, SpatialFilter, Stage,
    StatusPoller, SystemClock, TemporalRange, Transport,
};

/// Answers each incoming connection with the next scripted `(status, body)`,
/// then 500 once the script runs out. Returns the base URL and a hit counter.
fn serve(script: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    thread::spawn(move || {
        let mut script = script.into_iter();
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            counter.fetch_add(1, Ordering::SeqCst);

            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }

            let (status, body) = script.next().unwrap_or((500, "script exhausted"));
            let response = format!(
                "HTTP/1.1 {} Scripted\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });

    (base, hits)
}

fn transport() -> HttpTransport {
    let settings = HttpSettings {
        timeout: Duration::from_secs(5),
        retry_max: 3,
        retry_sleep: Duration::from_millis(10),
    };
    HttpTransport::new(Credentials::Token("test-token".into()), true, settings).unwrap()
}

const ACCEPTED: &str =
    "<eesi:agentResponse><order><orderId>42</orderId></order></eesi:agentResponse>";
const COMPLETE: &str =
    "<eesi:agentResponse><requestStatus><status>complete</status></requestStatus></eesi:agentResponse>";

#[test]
fn transient_status_is_retried_only_when_allowed() {
    let (base, hits) = serve(vec![(503, "busy"), (200, "ok")]);
    let resp = transport().get(&base, &[], &[], Retry::Transient).unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    let (base, hits) = serve(vec![(503, "busy"), (200, "ok")]);
    let resp = transport().get(&base, &[], &[], Retry::Never).unwrap();
    assert_eq!(resp.status, 503);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn order_is_submitted_once_when_the_server_errors() {
    let (base, hits) = serve(vec![(503, "busy"), (200, ACCEPTED)]);
    let endpoints = Endpoints::from_hosts(&base, &base);
    let transport = transport();

    let request = OrderRequest::new(
        &ProductConfig::default(),
        "006",
        TemporalRange::parse("2020-01-01", "2020-01-02").unwrap(),
        SpatialFilter::Polygon("-100,30,-90,30,-90,40,-100,30".into()),
        None,
        1,
    );
    let err = OrderSubmitter::new(&transport, &endpoints)
        .submit(&request)
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Transport {
            stage: Stage::Submission,
            status: Some(503),
            ..
        }
    ));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn status_error_reaches_the_poller_unretried() {
    let (base, hits) = serve(vec![(503, "busy"), (200, COMPLETE)]);
    let endpoints = Endpoints::from_hosts(&base, &base);
    let transport = transport();
    let policy = RetryPolicy::default();
    let cancel = CancellationToken::new();

    let err = StatusPoller::new(&transport, &endpoints, &policy, &SystemClock, &cancel)
        .wait(&OrderId::new("42"))
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Transport {
            stage: Stage::Status,
            status: Some(503),
            ..
        }
    ));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
