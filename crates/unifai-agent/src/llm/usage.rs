//! Rolling token usage accounting

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::info;

use super::types::ChatUsage;

const RETENTION_HOURS: i64 = 24;

/// Summed token counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Keeps per-call token counts for the last 24 hours
#[derive(Debug, Default)]
pub struct UsageTracker {
    entries: Mutex<VecDeque<(DateTime<Utc>, ChatUsage)>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call and log the last-hour and last-day totals
    pub fn record(&self, usage: ChatUsage) {
        let now = Utc::now();
        self.record_at(now, usage);
        let hour = self.stats_at(now, Some(1));
        let day = self.stats_at(now, Some(24));
        info!(
            "Tokens in={} out={} | last hour in={} out={} | last 24h in={} out={}",
            usage.input_tokens,
            usage.output_tokens,
            hour.input_tokens,
            hour.output_tokens,
            day.input_tokens,
            day.output_tokens
        );
    }

    pub fn record_at(&self, at: DateTime<Utc>, usage: ChatUsage) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        entries.push_back((at, usage));
        let cutoff = at - Duration::hours(RETENTION_HOURS);
        while entries.front().is_some_and(|(t, _)| *t <= cutoff) {
            entries.pop_front();
        }
    }

    /// Totals over the last `hours`, or everything retained when `None`
    pub fn stats(&self, hours: Option<u32>) -> UsageStats {
        self.stats_at(Utc::now(), hours)
    }

    pub fn stats_at(&self, now: DateTime<Utc>, hours: Option<u32>) -> UsageStats {
        let Ok(entries) = self.entries.lock() else {
            return UsageStats::default();
        };
        let cutoff = hours.map(|h| now - Duration::hours(i64::from(h)));
        entries
            .iter()
            .filter(|(t, _)| cutoff.is_none_or(|c| *t > c))
            .fold(UsageStats::default(), |mut acc, (_, u)| {
                acc.input_tokens += u64::from(u.input_tokens);
                acc.output_tokens += u64::from(u.output_tokens);
                acc
            })
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
