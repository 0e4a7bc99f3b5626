use std::fmt;
use std::path::PathBuf;

use crate::order::OrderId;
use crate::poll::{OrderStatus, PollOutcome};

/// Final state of one page of an order job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    Complete,
    CompleteWithErrors,
    Failed,
    /// Polling gave up before the order finished.
    TimedOut,
}

impl PageOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, PageOutcome::Complete | PageOutcome::CompleteWithErrors)
    }
}

impl From<PollOutcome> for PageOutcome {
    fn from(outcome: PollOutcome) -> Self {
        match outcome {
            PollOutcome::Finished(OrderStatus::Complete) => PageOutcome::Complete,
            PollOutcome::Finished(OrderStatus::CompleteWithErrors) => {
                PageOutcome::CompleteWithErrors
            }
            PollOutcome::Finished(_) => PageOutcome::Failed,
            PollOutcome::TimedOut { .. } => PageOutcome::TimedOut,
        }
    }
}

impl fmt::Display for PageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PageOutcome::Complete => "complete",
            PageOutcome::CompleteWithErrors => "complete_with_errors",
            PageOutcome::Failed => "failed",
            PageOutcome::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageReport {
    /// 1-based page number.
    pub page: usize,
    pub order_id: OrderId,
    pub outcome: PageOutcome,
    pub diagnostics: Vec<String>,
    /// Files extracted for this page; `None` when nothing was downloaded.
    pub extracted: Option<Vec<PathBuf>>,
    pub polls: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub granule_count: usize,
    pub page_count: usize,
    pub pages: Vec<PageReport>,
}

impl JobReport {
    /// Every page completed without errors.
    pub fn is_clean(&self) -> bool {
        self.pages.iter().all(|p| p.outcome == PageOutcome::Complete)
    }

    pub fn failed_pages(&self) -> impl Iterator<Item = &PageReport> {
        self.pages.iter().filter(|p| !p.outcome.is_success())
    }

    pub fn extracted_files(&self) -> impl Iterator<Item = &PathBuf> {
        self.pages.iter().filter_map(|p| p.extracted.as_ref()).flatten()
    }
}
