//! Reassembly of streamed tool-call arguments.

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tracing::{debug, warn};

use crate::util::next_call_id;

/// A tool call that finished reassembly.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedToolCall {
    pub index: u32,
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Default)]
struct PendingToolCall {
    id: Option<String>,
    name: Option<String>,
    args: String,
    /// End offset in `args` of every fragment merged so far.
    fragment_ends: Vec<usize>,
    /// Leading fragments matched by an apparent replay of the sequence.
    replayed: usize,
}

impl PendingToolCall {
    fn fragment(&self, i: usize) -> &str {
        let start = if i == 0 { 0 } else { self.fragment_ends[i - 1] };
        &self.args[start..self.fragment_ends[i]]
    }

    /// Merge one fragment, discarding a replay of the sequence seen so far.
    ///
    /// A replay is only accepted once it reaches the last merged fragment.
    /// If it diverges earlier, the held fragments were genuine content and
    /// are merged before `fragment`.
    fn push_fragment(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        if self.replayed < self.fragment_ends.len() && self.fragment(self.replayed) == fragment {
            self.replayed += 1;
            if self.replayed == self.fragment_ends.len() {
                self.replayed = 0;
            }
            return;
        }
        if self.replayed > 0 {
            let held: Vec<String> = (0..self.replayed)
                .map(|i| self.fragment(i).to_string())
                .collect();
            self.replayed = 0;
            for piece in &held {
                self.merge(piece);
            }
        }
        self.merge(fragment);
    }

    fn merge(&mut self, fragment: &str) {
        match merge_fragment(&mut self.args, fragment) {
            FragmentMerge::Repeat => {}
            FragmentMerge::Replaced => {
                self.fragment_ends.clear();
                self.fragment_ends.push(self.args.len());
            }
            FragmentMerge::Appended => self.fragment_ends.push(self.args.len()),
        }
    }
}

/// Which merge rule a fragment hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentMerge {
    Repeat,
    Replaced,
    Appended,
}

/// What one fragment did to the buffer.
#[derive(Debug, Default, PartialEq)]
pub struct FragmentOutcome {
    /// First sighting of this index: `(id, name)` known so far.
    pub started: Option<(Option<String>, Option<String>)>,
    pub completed: Option<CompletedToolCall>,
}

/// Merge `fragment` into `args_so_far`.
///
/// A fragment the buffer already ends with is an exact repeat and is
/// dropped. A fragment that starts with the whole buffer is a cumulative
/// resend and replaces it. Anything else is appended.
pub fn merge_fragment(args_so_far: &mut String, fragment: &str) -> FragmentMerge {
    if args_so_far.ends_with(fragment) {
        return FragmentMerge::Repeat;
    }
    if fragment.starts_with(args_so_far.as_str()) {
        args_so_far.clear();
        args_so_far.push_str(fragment);
        return FragmentMerge::Replaced;
    }
    args_so_far.push_str(fragment);
    FragmentMerge::Appended
}

/// Tool calls under reassembly, keyed by the vendor-local index.
#[derive(Debug, Default)]
pub struct ToolCallBuffer {
    pending: FxHashMap<u32, PendingToolCall>,
    completed: FxHashSet<u32>,
}

impl ToolCallBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one fragment for `index`. Fragments for an index that already
    /// completed are suppressed.
    pub fn accumulate(
        &mut self,
        index: u32,
        id: Option<&str>,
        name: Option<&str>,
        fragment: Option<&str>,
    ) -> FragmentOutcome {
        let mut outcome = FragmentOutcome::default();
        if self.completed.contains(&index) {
            debug!(index, "suppressing fragment for completed tool call");
            return outcome;
        }

        let entry = self.pending.entry(index);
        let is_new = matches!(entry, std::collections::hash_map::Entry::Vacant(_));
        let call = entry.or_default();
        if let Some(id) = id.filter(|id| !id.is_empty()) {
            if call.id.is_none() {
                call.id = Some(id.to_string());
            }
        }
        if let Some(name) = name.filter(|name| !name.is_empty()) {
            if call.name.is_none() {
                call.name = Some(name.to_string());
            }
        }
        if let Some(fragment) = fragment {
            call.push_fragment(fragment);
        }
        if is_new {
            outcome.started = Some((call.id.clone(), call.name.clone()));
        }

        if call.name.is_some() && looks_complete(&call.args) {
            if let Ok(arguments) = serde_json::from_str::<Value>(&call.args) {
                outcome.completed = self.complete(index, arguments);
            }
        }
        outcome
    }

    /// Complete `index` now with best-effort parsing of whatever arrived.
    pub fn finalize(&mut self, index: u32) -> Option<CompletedToolCall> {
        let call = self.pending.get(&index)?;
        if call.name.is_none() {
            warn!(index, "dropping tool call without a name");
            self.pending.remove(&index);
            self.completed.insert(index);
            return None;
        }
        match best_effort_parse(&call.args) {
            Some(arguments) => self.complete(index, arguments),
            None => {
                warn!(
                    index,
                    args_len = call.args.len(),
                    "dropping tool call with unparsable arguments"
                );
                self.pending.remove(&index);
                self.completed.insert(index);
                None
            }
        }
    }

    /// Best-effort completion of every pending call, in index order.
    pub fn drain_pending(&mut self) -> Vec<CompletedToolCall> {
        let mut indices: Vec<u32> = self.pending.keys().copied().collect();
        indices.sort_unstable();
        indices
            .into_iter()
            .filter_map(|index| self.finalize(index))
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Record an atomically delivered call so later fragments at `index`
    /// are suppressed.
    pub fn mark_completed(&mut self, index: u32) {
        self.pending.remove(&index);
        self.completed.insert(index);
    }

    /// Lowest index not yet used by this response.
    #[must_use]
    pub fn next_free_index(&self) -> u32 {
        self.pending
            .keys()
            .chain(self.completed.iter())
            .max()
            .map_or(0, |max| max + 1)
    }

    fn complete(&mut self, index: u32, arguments: Value) -> Option<CompletedToolCall> {
        let call = self.pending.remove(&index)?;
        self.completed.insert(index);
        Some(CompletedToolCall {
            index,
            id: call.id.unwrap_or_else(next_call_id),
            name: call.name.unwrap_or_default(),
            arguments,
        })
    }
}

#[inline]
fn looks_complete(args: &str) -> bool {
    matches!(args.trim_end().as_bytes().last(), Some(b'}' | b']'))
}

/// Parse arguments at end of stream. Empty input means no arguments;
/// truncated input gets its open strings and brackets closed.
fn best_effort_parse(args: &str) -> Option<Value> {
    let trimmed = args.trim();
    if trimmed.is_empty() {
        return Some(Value::Object(serde_json::Map::new()));
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    let repaired = close_truncated_json(trimmed)?;
    serde_json::from_str(&repaired).ok()
}

fn close_truncated_json(input: &str) -> Option<String> {
    let mut closers = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for byte in input.bytes() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => closers.push(b'}'),
            b'[' => closers.push(b']'),
            b'}' | b']' => {
                if closers.pop() != Some(byte) {
                    return None;
                }
            }
            _ => {}
        }
    }
    if closers.is_empty() && !in_string {
        return None;
    }

    let mut out = String::with_capacity(input.len() + closers.len() + 1);
    out.push_str(input);
    if escaped {
        out.pop();
    }
    if in_string {
        out.push('"');
    }
    while let Some(closer) = closers.pop() {
        out.push(char::from(closer));
    }
    Some(out)
}
