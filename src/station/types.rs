//! Core entity types: charge requests, piles, and the error taxonomy.
//!
//! State transitions are exposed as atomic operations that check their
//! precondition first and mutate only on success, so a failed call leaves
//! every entity exactly as it was.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Charging mode. Each mode has its own pile pool and waiting queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Fast,
    Slow,
}

impl Mode {
    /// Queue-number prefix letter: `F` for fast, `T` for slow (trickle).
    pub fn letter(self) -> char {
        match self {
            Self::Fast => 'F',
            Self::Slow => 'T',
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Slow => write!(f, "slow"),
        }
    }
}

impl FromStr for Mode {
    type Err = StationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(Self::Fast),
            "slow" => Ok(Self::Slow),
            other => Err(StationError::Validation(format!(
                "unknown mode \"{other}\", expected \"fast\" or \"slow\""
            ))),
        }
    }
}

/// Lifecycle state of a charge request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    Waiting,
    Assigned,
    Charging,
    Completed,
    Cancelled,
}

impl RequestState {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Operational state of a charging pile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PileState {
    Idle,
    Charging,
    Faulted,
    Offline,
}

/// Stable per-mode sequential identifier assigned at admission.
///
/// Human-readable form is the mode letter plus a zero-padded sequence,
/// e.g. `F0007`. Ordering is mode-major then sequence, which makes the
/// sequence a deterministic tie-breaker within a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueNumber {
    pub mode: Mode,
    pub seq: u32,
}

impl fmt::Display for QueueNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:04}", self.mode.letter(), self.seq)
    }
}

impl FromStr for QueueNumber {
    type Err = StationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StationError::Validation(format!("invalid queue number \"{s}\""));
        let mut chars = s.chars();
        let mode = match chars.next() {
            Some('F') => Mode::Fast,
            Some('T') => Mode::Slow,
            _ => return Err(invalid()),
        };
        let seq: u32 = chars.as_str().parse().map_err(|_| invalid())?;
        Ok(Self { mode, seq })
    }
}

impl Serialize for QueueNumber {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for QueueNumber {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A vehicle's request for energy, from admission to a terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct ChargeRequest {
    pub queue_number: QueueNumber,
    pub username: String,
    pub mode: Mode,
    /// Energy requested, in units.
    pub requested_amount: f64,
    /// Explicit scheduling priority; higher wins under the priority strategy.
    pub priority: Option<u32>,
    pub state: RequestState,
    /// Simulated admission time.
    pub submitted_at: DateTime<Utc>,
    /// Set iff state is Assigned or Charging.
    pub pile_id: Option<String>,
    /// Simulated session start; set iff state is Charging.
    pub started_at: Option<DateTime<Utc>>,
}

impl ChargeRequest {
    /// Creates a freshly admitted request in `Waiting`.
    pub fn new(
        queue_number: QueueNumber,
        username: impl Into<String>,
        requested_amount: f64,
        priority: Option<u32>,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            queue_number,
            username: username.into(),
            mode: queue_number.mode,
            requested_amount,
            priority,
            state: RequestState::Waiting,
            submitted_at,
            pile_id: None,
            started_at: None,
        }
    }

    /// Marks an assigned request as charging, stamping the session start.
    pub fn begin_charging(&mut self, at: DateTime<Utc>) -> Result<(), StationError> {
        if self.state != RequestState::Assigned {
            return Err(StationError::InvalidTransition(format!(
                "request {} cannot start charging from {:?}",
                self.queue_number, self.state
            )));
        }
        self.state = RequestState::Charging;
        self.started_at = Some(at);
        Ok(())
    }

    /// Cancels a waiting request.
    pub fn cancel_waiting(&mut self) -> Result<(), StationError> {
        if self.state != RequestState::Waiting {
            return Err(StationError::NotWaiting(self.queue_number));
        }
        self.state = RequestState::Cancelled;
        Ok(())
    }
}

/// A physical charging unit, the schedulable resource.
#[derive(Debug, Clone, Serialize)]
pub struct ChargingPile {
    pub pile_id: String,
    pub mode: Mode,
    /// Delivery rate in energy units per hour.
    pub rate: f64,
    pub state: PileState,
    /// Set iff state is Charging.
    pub current_request: Option<QueueNumber>,
    pub total_energy_delivered: f64,
    pub total_earnings: f64,
    pub sessions_served: u32,
}

impl ChargingPile {
    pub fn new(pile_id: impl Into<String>, mode: Mode, rate: f64) -> Self {
        Self {
            pile_id: pile_id.into(),
            mode,
            rate,
            state: PileState::Idle,
            current_request: None,
            total_energy_delivered: 0.0,
            total_earnings: 0.0,
            sessions_served: 0,
        }
    }

    /// Claims this pile for a waiting request: request Waiting → Assigned,
    /// pile Idle → Charging, both in one step or neither.
    pub fn assign(&mut self, request: &mut ChargeRequest) -> Result<(), StationError> {
        if request.state != RequestState::Waiting {
            return Err(StationError::InvalidTransition(format!(
                "request {} is {:?}, not waiting",
                request.queue_number, request.state
            )));
        }
        if self.state != PileState::Idle {
            return Err(StationError::InvalidTransition(format!(
                "pile {} is {:?}, not idle",
                self.pile_id, self.state
            )));
        }
        if self.mode != request.mode {
            return Err(StationError::InvalidTransition(format!(
                "pile {} is a {} pile, request {} wants {}",
                self.pile_id, self.mode, request.queue_number, request.mode
            )));
        }
        request.state = RequestState::Assigned;
        request.pile_id = Some(self.pile_id.clone());
        self.state = PileState::Charging;
        self.current_request = Some(request.queue_number);
        Ok(())
    }

    /// Finishes a charging session: request Charging → Completed, pile back
    /// to Idle with the cumulative counters updated.
    pub fn complete(
        &mut self,
        request: &mut ChargeRequest,
        energy: f64,
        earnings: f64,
    ) -> Result<(), StationError> {
        self.check_linked(request)?;
        if request.state != RequestState::Charging {
            return Err(StationError::InvalidTransition(format!(
                "request {} is {:?}, not charging",
                request.queue_number, request.state
            )));
        }
        request.state = RequestState::Completed;
        request.pile_id = None;
        self.state = PileState::Idle;
        self.current_request = None;
        self.total_energy_delivered += energy;
        self.total_earnings += earnings;
        self.sessions_served += 1;
        Ok(())
    }

    /// Cancels an assigned-but-not-yet-charging request, releasing the pile.
    pub fn cancel_assigned(&mut self, request: &mut ChargeRequest) -> Result<(), StationError> {
        self.check_linked(request)?;
        if request.state != RequestState::Assigned {
            return Err(StationError::InvalidTransition(format!(
                "request {} is {:?}, not assigned",
                request.queue_number, request.state
            )));
        }
        request.state = RequestState::Cancelled;
        request.pile_id = None;
        self.state = PileState::Idle;
        self.current_request = None;
        Ok(())
    }

    /// Fault path for a busy pile: the charging request drops back to
    /// Waiting (original submission time kept) and the pile goes Faulted.
    /// The caller bills the truncated session separately.
    pub fn fail_charging(
        &mut self,
        request: &mut ChargeRequest,
        energy: f64,
        earnings: f64,
    ) -> Result<(), StationError> {
        self.check_linked(request)?;
        if request.state != RequestState::Charging {
            return Err(StationError::InvalidTransition(format!(
                "request {} is {:?}, not charging",
                request.queue_number, request.state
            )));
        }
        request.state = RequestState::Waiting;
        request.pile_id = None;
        request.started_at = None;
        self.state = PileState::Faulted;
        self.current_request = None;
        self.total_energy_delivered += energy;
        self.total_earnings += earnings;
        self.sessions_served += 1;
        Ok(())
    }

    /// Fault path for an idle pile.
    pub fn fault_idle(&mut self) -> Result<(), StationError> {
        if self.state != PileState::Idle {
            return Err(StationError::InvalidTransition(format!(
                "pile {} is {:?}, not idle",
                self.pile_id, self.state
            )));
        }
        self.state = PileState::Faulted;
        Ok(())
    }

    /// Faulted → Idle.
    pub fn repair(&mut self) -> Result<(), StationError> {
        if self.state != PileState::Faulted {
            return Err(StationError::InvalidTransition(format!(
                "pile {} is {:?}, not faulted",
                self.pile_id, self.state
            )));
        }
        self.state = PileState::Idle;
        Ok(())
    }

    fn check_linked(&self, request: &ChargeRequest) -> Result<(), StationError> {
        if self.current_request != Some(request.queue_number) {
            return Err(StationError::InvalidTransition(format!(
                "request {} is not on pile {}",
                request.queue_number, self.pile_id
            )));
        }
        Ok(())
    }
}

/// Every failure the engine can surface. All are recovered at the boundary
/// of the operation that detects them; none crash the process.
#[derive(Debug, Error)]
pub enum StationError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("user \"{0}\" already has an active request")]
    DuplicateRequest(String),
    #[error("the {0} waiting queue is full")]
    QueueFull(Mode),
    #[error("request {0} is no longer waiting")]
    NotWaiting(QueueNumber),
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("pile {0} is busy charging")]
    PileBusy(String),
    #[error("{0} not found")]
    NotFound(String),
}
