//! Process-local cache of recent response summaries, and the lookup that
//! decides where an outgoing conversation can be truncated.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::debug;

use super::summary::ResponseSummary;
use crate::config::ContinuationConfig;
use crate::protocol::canonical::{ConversationMessage, ProtocolVariant, Role};
use crate::util::unix_now_millis;

/// A reusable upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationMatch {
    /// Upstream response id to continue from.
    pub resume_id: String,
    /// Only messages strictly after this history index need to be sent.
    pub truncate_after_index: usize,
}

/// Upstream a cached response id is valid for. An id is only offered back
/// to requests for the same vendor, protocol and model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationScope {
    pub vendor: String,
    pub protocol: ProtocolVariant,
    pub model_id: String,
}

impl ContinuationScope {
    #[must_use]
    pub fn new(
        vendor: impl Into<String>,
        protocol: ProtocolVariant,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            vendor: vendor.into(),
            protocol,
            model_id: model_id.into(),
        }
    }
}

#[derive(Debug)]
struct CachedResponse {
    scope: ContinuationScope,
    response_id: String,
    summary: ResponseSummary,
    saved_at_ms: u64,
}

/// Bounded, TTL-limited summary cache. Safe to share across requests.
#[derive(Debug)]
pub struct ContinuationCache {
    config: ContinuationConfig,
    entries: Mutex<VecDeque<CachedResponse>>,
}

impl ContinuationCache {
    #[must_use]
    pub fn new(config: ContinuationConfig) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(config.max_entries.min(1024))),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ContinuationConfig {
        &self.config
    }

    /// Summarize and remember a completed response.
    pub fn save(&self, scope: &ContinuationScope, response_id: &str, message: &ConversationMessage) {
        self.save_at(scope, response_id, message, unix_now_millis());
    }

    pub fn save_at(
        &self,
        scope: &ContinuationScope,
        response_id: &str,
        message: &ConversationMessage,
        now_ms: u64,
    ) {
        let summary = ResponseSummary::from_message(message, self.config.summary_max_chars);
        self.save_summary_at(scope, response_id, summary, now_ms);
    }

    /// Remember an already-built summary. Saving an id again replaces the
    /// earlier entry and makes it the newest.
    pub fn save_summary_at(
        &self,
        scope: &ContinuationScope,
        response_id: &str,
        summary: ResponseSummary,
        now_ms: u64,
    ) {
        if summary.is_empty() {
            debug!(response_id, "not caching empty response summary");
            return;
        }
        let mut entries = self.entries.lock();
        if let Some(pos) = entries.iter().position(|e| e.response_id == response_id) {
            entries.remove(pos);
        }
        entries.push_back(CachedResponse {
            scope: scope.clone(),
            response_id: response_id.to_string(),
            summary,
            saved_at_ms: now_ms,
        });
        while entries.len() > self.config.max_entries {
            if let Some(evicted) = entries.pop_front() {
                debug!(response_id = %evicted.response_id, "evicted oldest continuation entry");
            }
        }
    }

    /// Find a response cached for `scope` that the conversation can
    /// continue from.
    #[must_use]
    pub fn find_continuation(
        &self,
        scope: &ContinuationScope,
        history: &[ConversationMessage],
    ) -> Option<ContinuationMatch> {
        self.find_continuation_at(scope, history, unix_now_millis())
    }

    #[must_use]
    pub fn find_continuation_at(
        &self,
        scope: &ContinuationScope,
        history: &[ConversationMessage],
        now_ms: u64,
    ) -> Option<ContinuationMatch> {
        let candidates: Vec<(usize, ResponseSummary)> = history
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, message)| message.role == Role::Assistant)
            .take(self.config.window)
            .map(|(index, message)| {
                (
                    index,
                    ResponseSummary::from_message(message, self.config.summary_max_chars),
                )
            })
            .collect();

        let mut entries = self.entries.lock();
        self.evict_expired(&mut entries, now_ms);
        if candidates.is_empty() {
            return None;
        }

        let threshold = self.config.similarity_threshold;
        for entry in entries.iter().rev().filter(|entry| entry.scope == *scope) {
            for (index, summary) in &candidates {
                if summary.matches_any(&entry.summary, threshold) {
                    debug!(
                        resume_id = %entry.response_id,
                        truncate_after_index = index,
                        "continuation matched"
                    );
                    return Some(ContinuationMatch {
                        resume_id: entry.response_id.clone(),
                        truncate_after_index: *index,
                    });
                }
            }
        }
        None
    }

    fn evict_expired(&self, entries: &mut VecDeque<CachedResponse>, now_ms: u64) {
        let ttl_ms = u64::try_from(self.config.ttl().as_millis()).unwrap_or(u64::MAX);
        let before = entries.len();
        entries.retain(|entry| now_ms.saturating_sub(entry.saved_at_ms) <= ttl_ms);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "evicted expired continuation entries");
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for ContinuationCache {
    fn default() -> Self {
        Self::new(ContinuationConfig::default())
    }
}
