//! Order status polling.
//!
//! An order is queried until it leaves `pending`/`processing`. The wait between
//! queries, and how long to keep waiting at all, come from a [`RetryPolicy`];
//! time is read and spent through a [`Clock`] so the loop can run against a
//! fake clock.

use indicatif::ProgressBar;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::Endpoints;
use crate::error::{Error, Result, Stage};
use crate::order::OrderId;
use crate::transport::{Retry, Transport, expect_success};
use crate::util::{backoff, urljoin};
use crate::xml;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Processing,
    Complete,
    CompleteWithErrors,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OrderStatus::Pending | OrderStatus::Processing)
    }

    /// Whether the server attaches diagnostics worth reporting.
    pub fn has_diagnostics(self) -> bool {
        matches!(self, OrderStatus::CompleteWithErrors | OrderStatus::Failed)
    }

    /// Whether an archive is available for download.
    pub fn has_archive(self) -> bool {
        matches!(self, OrderStatus::Complete | OrderStatus::CompleteWithErrors)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Complete => "complete",
            OrderStatus::CompleteWithErrors => "complete_with_errors",
            OrderStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "complete" => Ok(OrderStatus::Complete),
            "complete_with_errors" => Ok(OrderStatus::CompleteWithErrors),
            "failed" => Ok(OrderStatus::Failed),
            other => Err(format!("unknown order status [{}]", other)),
        }
    }
}

/// How long to wait between status queries and when to stop waiting.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub interval: Duration,
    /// Total wait budget; `None` waits indefinitely.
    pub max_wait: Option<Duration>,
    /// Maximum status queries; `None` is unbounded.
    pub max_attempts: Option<usize>,
    /// Grow the interval by 1.5x per attempt, capped at `sleep_max`.
    pub backoff: bool,
    pub sleep_max: Duration,
}

pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            max_wait: None,
            max_attempts: None,
            backoff: false,
            sleep_max: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_backoff(mut self, sleep_max: Duration) -> Self {
        self.backoff = true;
        self.sleep_max = sleep_max;
        self
    }

    /// Whether another wait of `next_sleep` is allowed after `attempts` queries
    /// and `elapsed` time.
    fn allows(&self, attempts: usize, elapsed: Duration, next_sleep: Duration) -> bool {
        if self.max_attempts.is_some_and(|max| attempts >= max) {
            return false;
        }
        if self.max_wait.is_some_and(|max| elapsed.saturating_add(next_sleep) > max) {
            return false;
        }
        true
    }
}

/// Source of time for the poll loop.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Shared flag that stops a job at the next page or poll boundary.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

/// Status and diagnostics from one status query.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub status: OrderStatus,
    pub messages: Vec<String>,
}

pub(crate) fn parse_status(body: &str) -> Result<StatusSnapshot> {
    let invalid =
        |e: quick_xml::Error| Error::malformed(Stage::Status, format!("invalid XML: {}", e));

    let token = xml::elements(body, "requestStatus")
        .map_err(invalid)?
        .first()
        .and_then(|e| e.first_value().map(str::to_string))
        .ok_or_else(|| Error::malformed(Stage::Status, "no <requestStatus> element in response"))?;
    let status = token
        .parse::<OrderStatus>()
        .map_err(|e| Error::malformed(Stage::Status, e))?;

    let messages = xml::elements(body, "processInfo")
        .map_err(invalid)?
        .iter()
        .flat_map(|e| e.values())
        .collect();

    Ok(StatusSnapshot { status, messages })
}

/// How the poll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Finished(OrderStatus),
    /// The retry policy ran out while the order was still in `last`.
    TimedOut { last: OrderStatus },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollResult {
    pub outcome: PollOutcome,
    /// Collected only for `complete_with_errors` and `failed`.
    pub diagnostics: Vec<String>,
    /// Status queries issued.
    pub polls: usize,
}

pub struct StatusPoller<'a> {
    transport: &'a dyn Transport,
    endpoints: &'a Endpoints,
    policy: &'a RetryPolicy,
    clock: &'a dyn Clock,
    cancel: &'a CancellationToken,
    progress: bool,
}

impl<'a> StatusPoller<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        endpoints: &'a Endpoints,
        policy: &'a RetryPolicy,
        clock: &'a dyn Clock,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            transport,
            endpoints,
            policy,
            clock,
            cancel,
            progress: false,
        }
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// One status query for `order_id`.
    pub fn query(&self, order_id: &OrderId) -> Result<StatusSnapshot> {
        let url = urljoin(&self.endpoints.order_request, order_id.as_str());
        let resp = expect_success(
            Stage::Status,
            &url,
            self.transport.get(&url, &[], &[], Retry::Never),
        )?;
        parse_status(&resp.text())
    }

    /// Queries `order_id` until it reaches a terminal status or the policy gives up.
    pub fn wait(&self, order_id: &OrderId) -> Result<PollResult> {
        let started = self.clock.now();
        let spinner = self.progress.then(|| {
            let pb = ProgressBar::new_spinner();
            pb.enable_steady_tick(Duration::from_millis(120));
            pb
        });

        let mut sleep = self.policy.interval;
        let mut polls = 0usize;
        let mut last_status: Option<OrderStatus> = None;

        let result = loop {
            self.cancel.check()?;

            let snapshot = self.query(order_id)?;
            polls += 1;

            if last_status != Some(snapshot.status) {
                if last_status.is_none() {
                    info!(%order_id, status = %snapshot.status, "initial order status");
                } else {
                    info!(
                        %order_id,
                        status = %snapshot.status,
                        attempt = polls,
                        "order status changed"
                    );
                }
                last_status = Some(snapshot.status);
                if let Some(pb) = &spinner {
                    pb.set_message(format!("order {}: {}", order_id, snapshot.status));
                }
            }

            if snapshot.status.is_terminal() {
                let diagnostics = if snapshot.status.has_diagnostics() {
                    snapshot.messages
                } else {
                    Vec::new()
                };
                break PollResult {
                    outcome: PollOutcome::Finished(snapshot.status),
                    diagnostics,
                    polls,
                };
            }

            let elapsed = self.clock.now().saturating_duration_since(started);
            if !self.policy.allows(polls, elapsed, sleep) {
                break PollResult {
                    outcome: PollOutcome::TimedOut {
                        last: snapshot.status,
                    },
                    diagnostics: snapshot.messages,
                    polls,
                };
            }

            debug!(
                %order_id,
                status = %snapshot.status,
                wait_secs = sleep.as_secs_f64(),
                "order not complete, waiting"
            );
            self.clock.sleep(sleep);
            if self.policy.backoff {
                sleep = backoff(sleep, self.policy.sleep_max);
            }
        };

        if let Some(pb) = spinner {
            pb.finish_and_clear();
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_tokens_parse() {
        assert_eq!("pending".parse::<OrderStatus>().unwrap(), OrderStatus::Pending);
        assert_eq!(
            " Complete_With_Errors ".parse::<OrderStatus>().unwrap(),
            OrderStatus::CompleteWithErrors
        );
        assert!("exploded".parse::<OrderStatus>().is_err());
        assert!(!OrderStatus::Processing.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
        assert!(!OrderStatus::Failed.has_archive());
        assert!(OrderStatus::CompleteWithErrors.has_archive());
    }

    #[test]
    fn huge_interval_exhausts_wait_budget() {
        let policy = RetryPolicy::default()
            .with_interval(Duration::MAX)
            .with_max_wait(Duration::from_secs(60));
        assert!(!policy.allows(1, Duration::from_secs(5), Duration::MAX));
        assert!(RetryPolicy::default().allows(1, Duration::MAX, Duration::MAX));
    }

    #[test]
    fn status_document_with_diagnostics() {
        let body = "<eesi:agentResponse>\
            <requestStatus><status>complete_with_errors</status><numberProcessed>9</numberProcessed></requestStatus>\
            <processInfo><processCompleted>2020-01-03</processCompleted><info>granule 3: no data in subset</info></processInfo>\
            </eesi:agentResponse>";
        let snap = parse_status(body).unwrap();
        assert_eq!(snap.status, OrderStatus::CompleteWithErrors);
        assert_eq!(
            snap.messages,
            vec!["2020-01-03".to_string(), "granule 3: no data in subset".to_string()]
        );
    }

    #[test]
    fn missing_or_unknown_status_is_malformed() {
        let err = parse_status("<r><processInfo/></r>").unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { stage: Stage::Status, .. }));
        let err = parse_status("<r><requestStatus><status>lost</status></requestStatus></r>")
            .unwrap_err();
        assert!(err.to_string().contains("unknown order status"));
    }

    #[test]
    fn policy_bounds() {
        let p = RetryPolicy::default();
        assert!(p.allows(10_000, Duration::from_secs(1_000_000), POLL_INTERVAL));

        let p = RetryPolicy::default().with_max_attempts(3);
        assert!(p.allows(2, Duration::ZERO, POLL_INTERVAL));
        assert!(!p.allows(3, Duration::ZERO, POLL_INTERVAL));

        let p = RetryPolicy::default().with_max_wait(Duration::from_secs(25));
        assert!(p.allows(2, Duration::from_secs(10), POLL_INTERVAL));
        assert!(!p.allows(3, Duration::from_secs(20), POLL_INTERVAL));
    }

    #[test]
    fn cancellation_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(Error::Cancelled)));
    }
}
