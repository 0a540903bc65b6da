//! Walks the audit log page by page until it runs out or a fetch fails.
//!
//! ```text
//! Fetching ──ok, full page──▶ HasMore ──step──▶ Fetching
//!     │ ok, short/empty page       │ fetch error
//!     ▼                            ▼
//! Exhausted                     Failed
//! ```
//!
//! End of log is inferred from page size: a page with fewer records than
//! requested is taken to be the last one. The service does not promise this;
//! if it ever returns a short page mid-stream, retrieval stops early and the
//! next run resumes from the returned cursor.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::batch::{BatchFetcher, BatchOutcome};
use crate::model::message::DecryptedMessage;
use crate::model::record::RetrievalCursor;
use crate::service::status;

/// Where the engine is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationState {
    /// About to fetch the page after the current cursor.
    Fetching,
    /// The last page was full; there may be more.
    HasMore,
    /// The last page was short or empty.
    Exhausted,
    /// A fetch failed. Messages gathered so far are kept.
    Failed,
}

impl PaginationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exhausted | Self::Failed)
    }
}

/// Counters for one retrieval run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalStats {
    pub batches: usize,
    pub records: usize,
    pub decrypted: usize,
    pub skipped: usize,
    pub duplicates: usize,
}

/// Reported after every page.
#[derive(Debug, Clone, Copy)]
pub struct BatchProgress {
    pub batch: usize,
    pub cursor: RetrievalCursor,
    pub records: usize,
    pub decrypted: usize,
    pub total_messages: usize,
}

/// The outcome of one retrieval run.
///
/// Serialized with the service's field names: `errcode`, `errmsg`,
/// `next_seq`, `messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// `0` on success, otherwise the status of the failed fetch.
    #[serde(rename = "errcode")]
    pub status: i32,
    #[serde(rename = "errmsg", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Resume point for the next run.
    #[serde(rename = "next_seq", default)]
    pub cursor: RetrievalCursor,
    /// `true` when the run stopped because the log ran out.
    #[serde(default)]
    pub exhausted: bool,
    #[serde(default)]
    pub stats: RetrievalStats,
    /// Decrypted messages, ascending by `seq`, without duplicates.
    #[serde(default)]
    pub messages: Vec<DecryptedMessage>,
}

impl RetrievalResult {
    pub fn is_success(&self) -> bool {
        self.status == status::OK
    }
}

/// Paging parameters.
#[derive(Debug, Clone, Copy)]
pub struct PaginationOptions {
    /// Records requested per fetch.
    pub page_size: u32,
    /// Timeout for each fetch.
    pub timeout: Duration,
    /// Stop after this many pages even if more are available.
    pub max_batches: Option<usize>,
}

impl Default for PaginationOptions {
    fn default() -> Self {
        Self {
            page_size: 1000,
            timeout: Duration::from_secs(60),
            max_batches: None,
        }
    }
}

/// Drives [`BatchFetcher`] over the log.
///
/// Pages are fetched strictly one after another: page N+1 starts from the
/// cursor committed by page N.
pub struct PaginationEngine<'a> {
    fetcher: BatchFetcher<'a>,
    options: PaginationOptions,
    state: PaginationState,
    cursor: RetrievalCursor,
    messages: Vec<DecryptedMessage>,
    stats: RetrievalStats,
    failure: Option<(i32, String)>,
}

impl<'a> PaginationEngine<'a> {
    pub fn new(fetcher: BatchFetcher<'a>, options: PaginationOptions, start: RetrievalCursor) -> Self {
        Self {
            fetcher,
            options: PaginationOptions {
                page_size: options.page_size.max(1),
                ..options
            },
            state: PaginationState::Fetching,
            cursor: start,
            messages: Vec::new(),
            stats: RetrievalStats::default(),
            failure: None,
        }
    }

    pub fn state(&self) -> PaginationState {
        self.state
    }

    pub fn cursor(&self) -> RetrievalCursor {
        self.cursor
    }

    pub fn messages(&self) -> &[DecryptedMessage] {
        &self.messages
    }

    /// Fetch and process one page. Does nothing once a terminal state is reached.
    pub fn step(&mut self) -> PaginationState {
        if self.state.is_terminal() {
            return self.state;
        }
        self.state = PaginationState::Fetching;

        let outcome = match self
            .fetcher
            .fetch(self.cursor, self.options.page_size, self.options.timeout)
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(cursor = %self.cursor, error = %e, "Batch fetch failed; stopping");
                self.failure = Some((e.status(), e.to_string()));
                self.state = PaginationState::Failed;
                return self.state;
            }
        };

        self.state = self.commit(outcome);
        self.state
    }

    fn commit(&mut self, outcome: BatchOutcome) -> PaginationState {
        let previous = self.cursor;
        self.stats.batches += 1;
        self.stats.records += outcome.record_count;
        self.stats.skipped += outcome.skipped;

        let before = outcome.messages.len();
        let fresh = outcome
            .messages
            .into_iter()
            .filter(|m| m.seq > previous.sequence());
        self.messages.extend(fresh);
        let added = self.messages.len() - self.stats.decrypted;
        self.stats.duplicates += before - added;
        self.stats.decrypted = self.messages.len();

        // Skipped records still consume their sequence numbers.
        if let Some(last) = outcome.last_sequence {
            if !self.cursor.advance_to(last) {
                let message = format!("service returned no records past sequence {previous}");
                warn!(cursor = %previous, "{message}");
                self.failure = Some((status::SYSTEM, message));
                return PaginationState::Failed;
            }
        }

        debug!(
            batch = self.stats.batches,
            from = %previous,
            to = %self.cursor,
            records = outcome.record_count,
            decrypted = added,
            "Committed batch"
        );

        // Raw records, not decrypted messages: a full page with failed
        // records still continues.
        if outcome.record_count < self.options.page_size as usize {
            PaginationState::Exhausted
        } else {
            PaginationState::HasMore
        }
    }

    /// Run until the log is exhausted, a fetch fails, or `max_batches` pages
    /// have been processed.
    pub fn run(mut self, progress: Option<&dyn Fn(&BatchProgress)>) -> RetrievalResult {
        info!(
            start = %self.cursor,
            page_size = self.options.page_size,
            "Starting retrieval"
        );
        loop {
            if let Some(max) = self.options.max_batches {
                if self.stats.batches >= max {
                    debug!(max, "Reached batch limit");
                    break;
                }
            }
            let state = self.step();
            if let Some(report) = progress {
                report(&BatchProgress {
                    batch: self.stats.batches,
                    cursor: self.cursor,
                    records: self.stats.records,
                    decrypted: self.stats.decrypted,
                    total_messages: self.messages.len(),
                });
            }
            if state.is_terminal() {
                break;
            }
        }
        let result = self.into_result();
        info!(
            status = result.status,
            messages = result.messages.len(),
            skipped = result.stats.skipped,
            next_seq = %result.cursor,
            "Retrieval finished"
        );
        result
    }

    /// Stop here and hand over everything gathered so far.
    pub fn into_result(self) -> RetrievalResult {
        let (status, error) = match self.failure {
            Some((code, message)) => (code, Some(message)),
            None => (status::OK, None),
        };
        RetrievalResult {
            status,
            error,
            cursor: self.cursor,
            exhausted: self.state == PaginationState::Exhausted,
            stats: self.stats,
            messages: self.messages,
        }
    }
}
