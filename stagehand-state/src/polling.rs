//! Client poll cadence.
//!
//! Clients poll fast while an operation they care about is in flight and slow
//! otherwise. A fast session is capped so a producer that never clears its
//! flag cannot keep every client polling at the fast rate forever.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

use stagehand_core::config::PollSettings;
use stagehand_core::DisplayValue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollCadence {
    pub fast: Duration,
    pub slow: Duration,
    pub max_fast_session: Duration,
    /// `display` flags that count as an active operation when `true`.
    pub active_operations: Vec<String>,
}

impl Default for PollCadence {
    fn default() -> Self {
        Self::from_settings(&PollSettings::default())
    }
}

impl PollCadence {
    pub fn from_settings(settings: &PollSettings) -> Self {
        Self {
            fast: Duration::from_secs(settings.fast_interval_secs),
            slow: Duration::from_secs(settings.slow_interval_secs),
            max_fast_session: Duration::from_secs(settings.max_fast_secs),
            active_operations: settings.active_operations.clone(),
        }
    }

    pub fn is_active(&self, display: &BTreeMap<String, DisplayValue>) -> bool {
        self.active_operations
            .iter()
            .any(|flag| display.get(flag).is_some_and(DisplayValue::is_true))
    }

    /// Interval before the next poll. `fast_for` is how long the current
    /// fast session has lasted, `None` when not in one.
    pub fn next_interval(
        &self,
        display: &BTreeMap<String, DisplayValue>,
        fast_for: Option<Duration>,
    ) -> Duration {
        let within_cap = fast_for.map_or(true, |elapsed| elapsed < self.max_fast_session);
        if self.is_active(display) && within_cap {
            self.fast
        } else {
            self.slow
        }
    }
}

/// Tracks when the current fast session started.
#[derive(Debug, Clone)]
pub struct PollSession {
    cadence: PollCadence,
    fast_since: Option<Instant>,
}

impl PollSession {
    pub fn new(cadence: PollCadence) -> Self {
        Self {
            cadence,
            fast_since: None,
        }
    }

    /// Record a fresh observation and return the wait before the next poll.
    pub fn observe(&mut self, display: &BTreeMap<String, DisplayValue>, now: Instant) -> Duration {
        if !self.cadence.is_active(display) {
            self.fast_since = None;
            return self.cadence.slow;
        }
        let since = *self.fast_since.get_or_insert(now);
        self.cadence
            .next_interval(display, Some(now.saturating_duration_since(since)))
    }
}
