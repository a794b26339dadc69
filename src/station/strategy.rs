//! Interchangeable scheduling strategies.
//!
//! A strategy defines a total order over waiting requests of one mode at a
//! given simulated instant; the scheduler always dispatches the minimum of
//! that order. Strategies are selected by configuration and swappable at
//! runtime without disturbing active sessions.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{ChargeRequest, StationError};

/// Total order over waiting requests; `Ordering::Less` dispatches first.
pub trait ScheduleStrategy: Send {
    fn kind(&self) -> StrategyKind;

    fn compare(&self, a: &ChargeRequest, b: &ChargeRequest, now: DateTime<Utc>) -> Ordering;

    /// Picks the request to dispatch next among `waiting`.
    fn select<'a>(
        &self,
        waiting: &mut dyn Iterator<Item = &'a ChargeRequest>,
        now: DateTime<Utc>,
    ) -> Option<&'a ChargeRequest> {
        waiting.min_by(|a, b| self.compare(a, b, now))
    }
}

/// Configuration tag for the two built-in strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Priority,
    TimeOrder,
}

impl StrategyKind {
    /// Instantiates the strategy this tag names.
    pub fn build(self) -> Box<dyn ScheduleStrategy + Send> {
        match self {
            Self::Priority => Box::new(PriorityStrategy::new()),
            Self::TimeOrder => Box::new(TimeOrderStrategy),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Priority => write!(f, "priority"),
            Self::TimeOrder => write!(f, "time_order"),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = StationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "priority" => Ok(Self::Priority),
            "time_order" => Ok(Self::TimeOrder),
            other => Err(StationError::Validation(format!(
                "unknown strategy \"{other}\", expected \"priority\" or \"time_order\""
            ))),
        }
    }
}

/// Scoring function used by [`PriorityStrategy`]; higher scores dispatch
/// earlier.
pub type PriorityScorer = fn(&ChargeRequest, DateTime<Utc>) -> f64;

/// Default score: the explicit priority field when set, otherwise the
/// requested-amount-to-wait-time ratio. Wait time is floored at one second
/// so a just-admitted request has a finite score.
pub fn default_score(request: &ChargeRequest, now: DateTime<Utc>) -> f64 {
    if let Some(p) = request.priority {
        return f64::from(p);
    }
    let waited_secs = (now - request.submitted_at).num_milliseconds() as f64 / 1000.0;
    let waited_hours = waited_secs.max(1.0) / 3600.0;
    request.requested_amount / waited_hours
}

/// Highest computed score first; ties broken by submission time, then
/// queue number. The scorer is a plain function pointer so deployments can
/// swap the formula without touching the scheduler.
pub struct PriorityStrategy {
    scorer: PriorityScorer,
}

impl PriorityStrategy {
    pub fn new() -> Self {
        Self {
            scorer: default_score,
        }
    }

    pub fn with_scorer(scorer: PriorityScorer) -> Self {
        Self { scorer }
    }
}

impl Default for PriorityStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleStrategy for PriorityStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Priority
    }

    fn compare(&self, a: &ChargeRequest, b: &ChargeRequest, now: DateTime<Utc>) -> Ordering {
        let sa = (self.scorer)(a, now);
        let sb = (self.scorer)(b, now);
        // Descending by score; total_cmp keeps the order total even for
        // pathological scorer outputs.
        sb.total_cmp(&sa)
            .then_with(|| a.submitted_at.cmp(&b.submitted_at))
            .then_with(|| a.queue_number.cmp(&b.queue_number))
    }
}

/// Strict FIFO on submission time; ties broken by queue number.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeOrderStrategy;

impl ScheduleStrategy for TimeOrderStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TimeOrder
    }

    fn compare(&self, a: &ChargeRequest, b: &ChargeRequest, _now: DateTime<Utc>) -> Ordering {
        a.submitted_at
            .cmp(&b.submitted_at)
            .then_with(|| a.queue_number.cmp(&b.queue_number))
    }
}
