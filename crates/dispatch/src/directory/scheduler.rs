// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SEARCH retry timer with exponential backoff.
//!
//! ```text
//! observed set changes -> restart(): interval = floor, fire at now + initial_delay
//! fire(), names missing -> next fire at now + interval, interval = min(interval * mult, max)
//! fire(), nothing missing -> idle until the next restart()
//! ```

use crate::config::QueryConfig;
use std::time::{Duration, Instant};

/// Single-shot timer driving SEARCH rounds.
#[derive(Debug, Clone)]
pub struct QueryScheduler {
    config: QueryConfig,
    interval: Duration,
    deadline: Option<Instant>,
}

impl QueryScheduler {
    pub fn new(config: QueryConfig) -> Self {
        Self {
            interval: config.interval,
            config,
            deadline: None,
        }
    }

    /// Cancel any pending round and search again shortly.
    pub fn restart(&mut self, now: Instant) {
        self.interval = self.config.interval;
        self.deadline = Some(now + self.config.initial_delay);
    }

    /// Next firing time, `None` when idle.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_active(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.map_or(false, |at| now >= at)
    }

    /// Interval the next reschedule will use.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Handle a due timer. Returns `true` when a SEARCH round must be sent.
    pub fn fire(&mut self, now: Instant, has_missing: bool) -> bool {
        if !has_missing {
            self.deadline = None;
            return false;
        }
        self.deadline = Some(now + self.interval);
        if self.interval < self.config.max_interval {
            self.interval = self.interval.saturating_mul(self.config.multiplier);
        }
        if self.interval > self.config.max_interval {
            self.interval = self.config.max_interval;
        }
        true
    }
}

/// Group `names` into SEARCH datagrams.
///
/// Each batch holds at most `max_names` names and stays within
/// `max_datagram` bytes given a `header_len`-byte header. A name that cannot
/// fit even alone is skipped.
pub fn search_batches<'n, I>(
    names: I,
    header_len: usize,
    max_datagram: usize,
    max_names: usize,
) -> Vec<Vec<&'n str>>
where
    I: IntoIterator<Item = &'n str>,
{
    let mut batches: Vec<Vec<&'n str>> = Vec::new();
    let mut current: Vec<&'n str> = Vec::new();
    let mut len = header_len;

    for name in names {
        let cost = 1 + name.len();
        if header_len + cost > max_datagram {
            log::warn!(
                "[GOSSIP] topic name of {} bytes never fits a {} byte SEARCH, skipped",
                name.len(),
                max_datagram
            );
            continue;
        }
        if !current.is_empty() && (len + cost > max_datagram || current.len() >= max_names) {
            batches.push(std::mem::take(&mut current));
            len = header_len;
        }
        current.push(name);
        len += cost;
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence() {
        let t0 = Instant::now();
        let mut sched = QueryScheduler::new(QueryConfig::default());
        assert!(!sched.is_active());

        sched.restart(t0);
        assert_eq!(sched.deadline(), Some(t0 + Duration::from_millis(50)));
        assert!(!sched.is_due(t0));

        let mut now = t0 + Duration::from_millis(50);
        let mut gaps = Vec::new();
        for _ in 0..7 {
            assert!(sched.is_due(now));
            assert!(sched.fire(now, true));
            let next = sched.deadline().expect("rescheduled");
            gaps.push((next - now).as_secs());
            now = next;
        }
        assert_eq!(gaps, vec![1, 2, 4, 8, 16, 16, 16]);
    }

    #[test]
    fn test_idle_when_nothing_missing() {
        let t0 = Instant::now();
        let mut sched = QueryScheduler::new(QueryConfig::default());
        sched.restart(t0);
        assert!(!sched.fire(t0 + Duration::from_millis(50), false));
        assert!(!sched.is_active());
    }

    #[test]
    fn test_restart_resets_interval() {
        let t0 = Instant::now();
        let mut sched = QueryScheduler::new(QueryConfig::default());
        sched.restart(t0);
        sched.fire(t0, true);
        sched.fire(t0, true);
        assert_eq!(sched.interval(), Duration::from_secs(4));
        sched.restart(t0);
        assert_eq!(sched.interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_batches_by_count() {
        let names = ["a", "b", "c", "d", "e", "f"];
        let batches = search_batches(names.iter().copied(), 10, 1500, 4);
        assert_eq!(batches, vec![vec!["a", "b", "c", "d"], vec!["e", "f"]]);
    }

    #[test]
    fn test_batches_by_size() {
        // header 10 + " aaaa" (5) + " bbbb" (5) = 20
        let names = ["aaaa", "bbbb", "cccc"];
        let batches = search_batches(names.iter().copied(), 10, 20, 4);
        assert_eq!(batches, vec![vec!["aaaa", "bbbb"], vec!["cccc"]]);
    }

    #[test]
    fn test_oversized_name_skipped() {
        let long = "x".repeat(50);
        let names = ["a", long.as_str(), "b"];
        let batches = search_batches(names.iter().copied(), 10, 20, 4);
        assert_eq!(batches, vec![vec!["a", "b"]]);
    }
}
