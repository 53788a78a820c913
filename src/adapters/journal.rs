//! Event journal cursor and per-request buffering.
//!
//! The journal is shared by every request the client submits. Each poll
//! returns a batch of entries and a `Link: <...>; rel="next"` cursor. Events
//! are buffered per request id so a waiter picks up entries another waiter's
//! poll already consumed.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::CompletionEvent;

/// One page of journal entries
#[derive(Debug, Default, Deserialize)]
pub struct JournalPage {
    #[serde(default)]
    pub events: Vec<JournalEntry>,
}

/// One journal entry; `event` carries the compute service payload
#[derive(Debug, Deserialize)]
pub struct JournalEntry {
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub event: Value,
}

/// Extract the `rel="next"` target of a `Link` header
pub fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| {
            let p = p.trim();
            p == "rel=\"next\"" || p == "rel=next"
        });
        if is_next {
            Some(
                target
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string(),
            )
        } else {
            None
        }
    })
}

/// Polling cursor plus events buffered for pending requests
#[derive(Debug)]
pub struct JournalState {
    /// URL of the next poll
    pub next_url: String,
    buffered: HashMap<String, Vec<CompletionEvent>>,
}

impl JournalState {
    pub fn new(journal_url: impl Into<String>) -> Self {
        Self {
            next_url: journal_url.into(),
            buffered: HashMap::new(),
        }
    }

    /// Buffer completion events of a page whose request id is pending.
    ///
    /// Returns the number of events kept. Entries of unknown type and
    /// entries for requests nobody waits on are dropped, as is anything
    /// still buffered for a request that is no longer pending.
    pub fn ingest(&mut self, page: JournalPage, pending: &HashMap<String, usize>) -> usize {
        self.buffered.retain(|id, _| pending.contains_key(id));
        let mut kept = 0;
        for entry in page.events {
            let event: CompletionEvent = match serde_json::from_value(entry.event) {
                Ok(event) => event,
                Err(e) => {
                    debug!(position = ?entry.position, error = %e, "Skipping journal entry");
                    continue;
                }
            };

            if !pending.contains_key(event.request_id()) {
                continue;
            }
            self.buffered
                .entry(event.request_id().to_string())
                .or_default()
                .push(event);
            kept += 1;
        }
        kept
    }

    /// Take the events of `request_id` once `expected` of them have arrived
    pub fn take_complete(&mut self, request_id: &str, expected: usize) -> Option<Vec<CompletionEvent>> {
        let count = self.buffered.get(request_id).map(Vec::len).unwrap_or(0);
        if count < expected {
            return None;
        }
        let events = self.buffered.remove(request_id).unwrap_or_default();
        if events.len() > expected {
            warn!(request_id, expected, received = events.len(), "More events than renditions");
        }
        Some(events)
    }

    /// Drop anything buffered for `request_id`
    pub fn discard(&mut self, request_id: &str) {
        self.buffered.remove(request_id);
    }

    pub fn buffered_count(&self, request_id: &str) -> usize {
        self.buffered.get(request_id).map(Vec::len).unwrap_or(0)
    }
}
