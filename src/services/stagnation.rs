//! Stagnation monitor: escalates a running agent through
//! `none → warn → pause → abort` from turn counts, wall clock, and repeated
//! state fingerprints.
//!
//! The level is monotonic: nothing ever de-escalates, and a repeated-state
//! trigger raises the level by exactly one step per check.

use std::collections::VecDeque;
use std::time::Duration;

/// Escalation level, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StagnationLevel {
    None,
    Warn,
    Pause,
    Abort,
}

impl StagnationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Warn => "warn",
            Self::Pause => "pause",
            Self::Abort => "abort",
        }
    }

    /// The next level up; abort saturates.
    fn escalated(self) -> Self {
        match self {
            Self::None => Self::Warn,
            Self::Warn => Self::Pause,
            Self::Pause | Self::Abort => Self::Abort,
        }
    }
}

/// Thresholds for the monitor.
#[derive(Debug, Clone)]
pub struct StagnationConfig {
    /// Turn count that triggers a warning
    pub warn_turns: u32,
    /// Turn count that triggers an abort
    pub abort_turns: u32,
    /// Wall-clock bound for a warning
    pub warn_time: Duration,
    /// Wall-clock bound for an abort
    pub abort_time: Duration,
    /// Identical fingerprints within the window that trigger an escalation
    pub repeat_threshold: usize,
    /// Size of the sliding fingerprint window
    pub history_window: usize,
}

impl Default for StagnationConfig {
    fn default() -> Self {
        Self {
            warn_turns: 30,
            abort_turns: 80,
            warn_time: Duration::from_secs(15 * 60),
            abort_time: Duration::from_secs(60 * 60),
            repeat_threshold: 4,
            history_window: 10,
        }
    }
}

/// Per-spawn monitor state. One instance watches one agent.
#[derive(Debug)]
pub struct StagnationMonitor {
    config: StagnationConfig,
    started_at_ms: i64,
    level: StagnationLevel,
    history: VecDeque<String>,
}

impl StagnationMonitor {
    pub fn new(config: StagnationConfig) -> Self {
        Self {
            config,
            started_at_ms: crate::domain::clock::now_ms(),
            level: StagnationLevel::None,
            history: VecDeque::new(),
        }
    }

    /// Current level.
    pub fn level(&self) -> StagnationLevel {
        self.level
    }

    /// Feed one observation and get the (possibly escalated) level back.
    pub fn check(&mut self, turns: u32, fingerprint: &str) -> StagnationLevel {
        self.check_at(turns, fingerprint, crate::domain::clock::now_ms())
    }

    /// Evaluate only the wall-clock and turn thresholds, without recording
    /// a fingerprint. Used by periodic ticks between agent observations so
    /// the tick cadence cannot masquerade as repeated state.
    pub fn check_elapsed(&mut self, turns: u32) -> StagnationLevel {
        let now_ms = crate::domain::clock::now_ms();
        let elapsed = Duration::from_millis((now_ms - self.started_at_ms).max(0) as u64);
        let mut next = self.level;
        if turns >= self.config.abort_turns || elapsed >= self.config.abort_time {
            next = next.max(StagnationLevel::Abort);
        } else if turns >= self.config.warn_turns || elapsed >= self.config.warn_time {
            next = next.max(StagnationLevel::Warn);
        }
        self.level = next;
        self.level
    }

    /// `check` with an explicit clock, for tests and replay.
    pub fn check_at(&mut self, turns: u32, fingerprint: &str, now_ms: i64) -> StagnationLevel {
        self.history.push_back(fingerprint.to_string());
        while self.history.len() > self.config.history_window {
            self.history.pop_front();
        }

        let elapsed = Duration::from_millis((now_ms - self.started_at_ms).max(0) as u64);
        let before = self.level;

        let mut next = self.level;
        if turns >= self.config.abort_turns || elapsed >= self.config.abort_time {
            next = next.max(StagnationLevel::Abort);
        } else if turns >= self.config.warn_turns || elapsed >= self.config.warn_time {
            next = next.max(StagnationLevel::Warn);
        }

        let repeats = self.history.iter().filter(|f| *f == fingerprint).count();
        if repeats >= self.config.repeat_threshold {
            next = next.max(before.escalated());
        }

        if next > before {
            tracing::warn!(
                from = before.as_str(),
                to = next.as_str(),
                turns,
                elapsed_secs = elapsed.as_secs(),
                repeats,
                "agent stagnation escalation"
            );
        }
        self.level = next;
        self.level
    }
}
