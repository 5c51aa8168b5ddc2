//! Weighted time-event selection.
//!
//! Picks the subset of pairwise non-overlapping events with the greatest
//! total priority (weighted interval scheduling). Two events are compatible
//! when the earlier one ends no later than `epsilon` after the later one
//! starts, i.e. they may overlap by at most `epsilon`.
//!
//! Events are ordered by end ascending, then priority descending, then start
//! ascending. That order is the tie-break contract: among equal-total
//! selections the one found first in that order wins.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use tracing::debug;

use fedcat_core::{defaults, Metadata, QueryFilter, TransactionalMetadata};

/// Configuration of a [`TimeEventFilter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeEventConfig {
    pub start_key: String,
    pub end_key: String,
    pub priority_key: String,
    pub epsilon_ms: i64,
}

impl Default for TimeEventConfig {
    fn default() -> Self {
        Self {
            start_key: defaults::TIME_EVENT_START_KEY.to_string(),
            end_key: defaults::TIME_EVENT_END_KEY.to_string(),
            priority_key: defaults::TIME_EVENT_PRIORITY_KEY.to_string(),
            epsilon_ms: defaults::TIME_EVENT_EPSILON_MS,
        }
    }
}

/// Query filter keeping the best non-overlapping set of time events.
///
/// Records without a parsable start and end pass through unchanged after
/// the selected events.
#[derive(Debug, Clone, Default)]
pub struct TimeEventFilter {
    config: TimeEventConfig,
}

#[derive(Debug, Clone, Copy)]
struct TimeEvent {
    /// Position in the filter input.
    index: usize,
    start: i64,
    end: i64,
    priority: f64,
}

/// Parse an RFC 3339 timestamp or integer epoch milliseconds.
pub fn parse_time_ms(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return Some(ms);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

impl TimeEventFilter {
    pub fn new(config: TimeEventConfig) -> Self {
        Self { config }
    }

    pub fn with_keys(
        mut self,
        start_key: impl Into<String>,
        end_key: impl Into<String>,
        priority_key: impl Into<String>,
    ) -> Self {
        self.config.start_key = start_key.into();
        self.config.end_key = end_key.into();
        self.config.priority_key = priority_key.into();
        self
    }

    pub fn with_epsilon_ms(mut self, epsilon_ms: i64) -> Self {
        self.config.epsilon_ms = epsilon_ms.max(0);
        self
    }

    pub fn config(&self) -> &TimeEventConfig {
        &self.config
    }

    fn event(&self, index: usize, metadata: &Metadata) -> Option<TimeEvent> {
        let start = parse_time_ms(metadata.get(&self.config.start_key)?)?;
        let end = parse_time_ms(metadata.get(&self.config.end_key)?)?;
        if end < start {
            return None;
        }
        let priority = match metadata.get(&self.config.priority_key) {
            Some(raw) => raw.trim().parse::<f64>().ok().filter(|p| p.is_finite())?,
            None => defaults::TIME_EVENT_DEFAULT_PRIORITY,
        };
        Some(TimeEvent {
            index,
            start,
            end,
            priority,
        })
    }

    /// Input positions of the selected events, in chronological order.
    fn select(&self, mut events: Vec<TimeEvent>) -> Vec<usize> {
        events.sort_by(|a, b| {
            a.end
                .cmp(&b.end)
                .then_with(|| b.priority.total_cmp(&a.priority))
                .then_with(|| a.start.cmp(&b.start))
                .then_with(|| a.index.cmp(&b.index))
        });

        let n = events.len();
        let ends: Vec<i64> = events.iter().map(|e| e.end).collect();
        // best[i]: optimum over the first i events. pred[i]: how many of the
        // first i events are compatible with event i.
        let mut best = vec![0.0_f64; n + 1];
        let mut pred = vec![0_usize; n];
        let mut take = vec![false; n];

        for (i, event) in events.iter().enumerate() {
            let limit = event.start.saturating_add(self.config.epsilon_ms);
            pred[i] = ends[..i].partition_point(|&end| end <= limit);
            let with = event.priority + best[pred[i]];
            if with > best[i] {
                best[i + 1] = with;
                take[i] = true;
            } else {
                best[i + 1] = best[i];
            }
        }

        let mut chosen = Vec::new();
        let mut i = n;
        while i > 0 {
            if take[i - 1] {
                chosen.push(events[i - 1]);
                i = pred[i - 1];
            } else {
                i -= 1;
            }
        }

        chosen.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.end.cmp(&b.end)));
        chosen.into_iter().map(|e| e.index).collect()
    }
}

impl QueryFilter for TimeEventFilter {
    fn name(&self) -> &str {
        "time_event"
    }

    fn apply(&self, results: Vec<TransactionalMetadata>) -> Vec<TransactionalMetadata> {
        let input_count = results.len();
        let mut events = Vec::new();
        let mut passthrough = Vec::new();
        for (index, record) in results.iter().enumerate() {
            match self.event(index, &record.metadata) {
                Some(event) => events.push(event),
                None => passthrough.push(index),
            }
        }

        let selected = self.select(events);

        let mut slots: Vec<Option<TransactionalMetadata>> = results.into_iter().map(Some).collect();
        let output: Vec<TransactionalMetadata> = selected
            .iter()
            .chain(passthrough.iter())
            .filter_map(|&i| slots[i].take())
            .collect();

        debug!(
            subsystem = "filter",
            component = "time_event",
            input_count,
            selected = selected.len(),
            passthrough = passthrough.len(),
            epsilon_ms = self.config.epsilon_ms,
            "Time-event selection complete"
        );

        output
    }
}
