//! Station engine: admission, scheduling, fault handling, and time control.
//!
//! The engine owns every piece of mutable station state — clock, queues,
//! pile table, strategy, bills — and is driven through `&mut self`
//! operations, so one lock around a `Station` serializes admissions,
//! scheduling passes, and fault handling (a run queue of one). Every
//! operation checks its preconditions before mutating anything; a failed
//! call leaves the station exactly as it was.
//!
//! Sessions are settled lazily: each operation first completes any session
//! whose requested amount has been reached (the bill ends at the exact cap
//! instant, not the settlement instant), then applies itself, then runs a
//! scheduling pass where state may have changed.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::config::StationConfig;

use super::billing::{Bill, BillingLedger, ReportKind, TariffTable, UsageReport};
use super::clock::SimClock;
use super::queue::ModeQueue;
use super::strategy::{ScheduleStrategy, StrategyKind};
use super::types::{
    ChargeRequest, ChargingPile, Mode, PileState, QueueNumber, RequestState, StationError,
};

/// Admin switch positions for a pile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleAction {
    Start,
    Stop,
}

impl FromStr for ToggleAction {
    type Err = StationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            other => Err(StationError::Validation(format!(
                "unknown toggle action \"{other}\", expected \"start\" or \"stop\""
            ))),
        }
    }
}

/// One waiting request in a queue snapshot, in dispatch order.
#[derive(Debug, Clone, Serialize)]
pub struct WaitingEntry {
    pub queue_number: QueueNumber,
    pub username: String,
    pub mode: Mode,
    pub requested_amount: f64,
    pub priority: Option<u32>,
    pub submitted_at: DateTime<Utc>,
}

/// Snapshot of both waiting queues.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub strategy: StrategyKind,
    pub fast_capacity: usize,
    pub slow_capacity: usize,
    pub fast: Vec<WaitingEntry>,
    pub slow: Vec<WaitingEntry>,
}

/// The live session on a charging pile.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveSession {
    pub queue_number: QueueNumber,
    pub username: String,
    pub requested_amount: f64,
    pub start_time: DateTime<Utc>,
    /// Metered against the simulated clock at snapshot time, capped at the
    /// requested amount.
    pub energy_delivered: f64,
}

/// One pile in a status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PileSnapshot {
    pub pile_id: String,
    pub mode: Mode,
    pub rate: f64,
    pub state: PileState,
    pub session: Option<ActiveSession>,
}

/// Admin pile view: snapshot plus lifetime counters.
#[derive(Debug, Clone, Serialize)]
pub struct PileDetail {
    #[serde(flatten)]
    pub snapshot: PileSnapshot,
    pub total_energy_delivered: f64,
    pub total_earnings: f64,
    pub sessions_served: u32,
}

/// The charging-station engine.
pub struct Station {
    clock: SimClock,
    strategy: Box<dyn ScheduleStrategy + Send>,
    fast: ModeQueue,
    slow: ModeQueue,
    requests: BTreeMap<QueueNumber, ChargeRequest>,
    piles: BTreeMap<String, ChargingPile>,
    ledger: BillingLedger,
}

impl Station {
    /// Builds a station from a validated configuration, tracking real time.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed tariff table; all other
    /// configuration problems are reported by `StationConfig::validate`.
    pub fn new(config: &StationConfig) -> Result<Self, StationError> {
        Self::with_clock(config, SimClock::new())
    }

    /// Builds a station driven by the given clock (frozen clocks make the
    /// engine fully deterministic in tests).
    pub fn with_clock(config: &StationConfig, clock: SimClock) -> Result<Self, StationError> {
        let tariff = TariffTable::new(config.tariff.clone())?;
        let mut piles = BTreeMap::new();
        for p in &config.piles {
            piles.insert(p.id.clone(), ChargingPile::new(&p.id, p.mode, p.rate));
        }
        Ok(Self {
            clock,
            strategy: config.station.strategy.build(),
            fast: ModeQueue::new(Mode::Fast, config.queues.fast_capacity),
            slow: ModeQueue::new(Mode::Slow, config.queues.slow_capacity),
            requests: BTreeMap::new(),
            piles,
            ledger: BillingLedger::new(tariff, config.station.service_fee_rate),
        })
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    fn queue(&self, mode: Mode) -> &ModeQueue {
        match mode {
            Mode::Fast => &self.fast,
            Mode::Slow => &self.slow,
        }
    }

    fn queue_mut(&mut self, mode: Mode) -> &mut ModeQueue {
        match mode {
            Mode::Fast => &mut self.fast,
            Mode::Slow => &mut self.slow,
        }
    }

    // ---- admission -------------------------------------------------------

    /// Admits a charge request into the waiting queue of `mode`.
    ///
    /// # Errors
    ///
    /// `Validation` for a non-positive amount, `DuplicateRequest` if the
    /// user already has a non-terminal request, `QueueFull` at capacity.
    pub fn join(
        &mut self,
        username: &str,
        mode: Mode,
        requested_amount: f64,
        priority: Option<u32>,
    ) -> Result<QueueNumber, StationError> {
        self.tick();
        if username.trim().is_empty() {
            return Err(StationError::Validation("username must be non-empty".into()));
        }
        if !(requested_amount.is_finite() && requested_amount > 0.0) {
            return Err(StationError::Validation(format!(
                "requested amount must be finite and > 0, got {requested_amount}"
            )));
        }
        if self
            .requests
            .values()
            .any(|r| r.username == username && !r.state.is_terminal())
        {
            return Err(StationError::DuplicateRequest(username.to_string()));
        }
        let qn = self.queue_mut(mode).admit()?;
        let now = self.clock.now();
        self.requests.insert(
            qn,
            ChargeRequest::new(qn, username, requested_amount, priority, now),
        );
        info!(%qn, username, %mode, requested_amount, "request admitted");
        self.schedule_pass();
        Ok(qn)
    }

    /// Withdraws a waiting request.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown queue number, `NotWaiting` once assigned.
    pub fn leave(&mut self, qn: QueueNumber) -> Result<(), StationError> {
        self.tick();
        let req = self
            .requests
            .get_mut(&qn)
            .ok_or_else(|| StationError::NotFound(format!("queue number {qn}")))?;
        req.cancel_waiting()?;
        self.queue_mut(qn.mode).remove(qn);
        info!(%qn, "request left the queue");
        Ok(())
    }

    /// Moves a waiting request to the other mode's queue, issuing a fresh
    /// queue number there. All-or-nothing: a full destination leaves the
    /// original queue membership untouched.
    ///
    /// # Errors
    ///
    /// `NotFound`, `NotWaiting`, or `QueueFull` for the destination.
    pub fn change_mode(
        &mut self,
        qn: QueueNumber,
        new_mode: Mode,
    ) -> Result<QueueNumber, StationError> {
        self.tick();
        let req = self
            .requests
            .get(&qn)
            .ok_or_else(|| StationError::NotFound(format!("queue number {qn}")))?;
        if req.state != RequestState::Waiting {
            return Err(StationError::NotWaiting(qn));
        }
        if req.mode == new_mode {
            return Ok(qn);
        }
        if self.queue(new_mode).is_full() {
            return Err(StationError::QueueFull(new_mode));
        }
        let old = self
            .requests
            .remove(&qn)
            .ok_or_else(|| StationError::NotFound(format!("queue number {qn}")))?;
        self.queue_mut(qn.mode).remove(qn);
        let new_qn = self.queue_mut(new_mode).admit()?;
        let now = self.clock.now();
        self.requests.insert(
            new_qn,
            ChargeRequest::new(new_qn, old.username, old.requested_amount, old.priority, now),
        );
        info!(%qn, %new_qn, %new_mode, "request changed mode");
        self.schedule_pass();
        Ok(new_qn)
    }

    /// Cancels a waiting or assigned request. Charging sessions must be
    /// stopped through [`Station::disconnect`] so they are billed.
    ///
    /// # Errors
    ///
    /// `NotFound` or `InvalidTransition`.
    pub fn cancel(&mut self, qn: QueueNumber) -> Result<(), StationError> {
        self.tick();
        let state = self
            .requests
            .get(&qn)
            .ok_or_else(|| StationError::NotFound(format!("queue number {qn}")))?
            .state;
        match state {
            RequestState::Waiting => {
                if let Some(req) = self.requests.get_mut(&qn) {
                    req.cancel_waiting()?;
                }
                self.queue_mut(qn.mode).remove(qn);
                info!(%qn, "waiting request cancelled");
                Ok(())
            }
            RequestState::Assigned => {
                let pile_id = self
                    .requests
                    .get(&qn)
                    .and_then(|r| r.pile_id.clone())
                    .ok_or_else(|| {
                        StationError::InvalidTransition(format!("request {qn} has no pile"))
                    })?;
                if let (Some(pile), Some(req)) =
                    (self.piles.get_mut(&pile_id), self.requests.get_mut(&qn))
                {
                    pile.cancel_assigned(req)?;
                }
                info!(%qn, pile_id, "assigned request cancelled");
                self.schedule_pass();
                Ok(())
            }
            RequestState::Charging => Err(StationError::InvalidTransition(format!(
                "request {qn} is charging; stop it by disconnecting the pile"
            ))),
            RequestState::Completed | RequestState::Cancelled => Err(
                StationError::InvalidTransition(format!("request {qn} is already finished")),
            ),
        }
    }

    /// Edits a request before its session starts: the amount while Waiting
    /// or Assigned, the mode only while Waiting (delegates to
    /// [`Station::change_mode`]). Returns the (possibly new) queue number.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Validation`, `InvalidTransition` for a charging or
    /// finished request, `QueueFull` for a full destination queue.
    pub fn modify_charging(
        &mut self,
        qn: QueueNumber,
        new_amount: Option<f64>,
        new_mode: Option<Mode>,
    ) -> Result<QueueNumber, StationError> {
        self.tick();
        let req = self
            .requests
            .get(&qn)
            .ok_or_else(|| StationError::NotFound(format!("queue number {qn}")))?;
        if let Some(a) = new_amount {
            if !(a.is_finite() && a > 0.0) {
                return Err(StationError::Validation(format!(
                    "requested amount must be finite and > 0, got {a}"
                )));
            }
        }
        let wants_mode_change = new_mode.is_some_and(|m| m != req.mode);
        match req.state {
            RequestState::Waiting => {}
            RequestState::Assigned if !wants_mode_change => {}
            RequestState::Assigned => {
                return Err(StationError::InvalidTransition(format!(
                    "request {qn} is assigned; mode can only change while waiting"
                )));
            }
            other => {
                return Err(StationError::InvalidTransition(format!(
                    "request {qn} is {other:?} and can no longer be modified"
                )));
            }
        }
        if let (Some(a), Some(req)) = (new_amount, self.requests.get_mut(&qn)) {
            req.requested_amount = a;
            info!(%qn, new_amount = a, "request amount modified");
        }
        let final_qn = match new_mode {
            Some(m) if wants_mode_change => self.change_mode(qn, m)?,
            _ => qn,
        };
        self.schedule_pass();
        Ok(final_qn)
    }

    // ---- sessions --------------------------------------------------------

    /// User-initiated early stop of the session on `pile_id`; bills the
    /// energy delivered so far.
    ///
    /// # Errors
    ///
    /// `NotFound` or `InvalidTransition` when the pile is not charging.
    pub fn disconnect(&mut self, pile_id: &str) -> Result<Bill, StationError> {
        self.tick();
        let pile = self
            .piles
            .get(pile_id)
            .ok_or_else(|| StationError::NotFound(format!("pile {pile_id}")))?;
        if pile.state != PileState::Charging {
            return Err(StationError::InvalidTransition(format!(
                "pile {pile_id} is {:?}, not charging",
                pile.state
            )));
        }
        let qn = pile.current_request.ok_or_else(|| {
            StationError::InvalidTransition(format!("pile {pile_id} has no active request"))
        })?;
        let now = self.clock.now();
        let bill = self.finish_session(pile_id, qn, now, now)?;
        info!(%qn, pile_id, energy = bill.energy_delivered, "session disconnected");
        self.schedule_pass();
        Ok(bill)
    }

    // ---- faults and recovery ---------------------------------------------

    /// Faults a pile. A charging victim is billed up to the fault time and
    /// re-admitted to the head of its queue with its original submission
    /// time; subsequent matching follows the given strategy.
    ///
    /// Returns the truncated bill when a session was interrupted.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `InvalidTransition` when already Faulted or Offline.
    pub fn set_fault(
        &mut self,
        pile_id: &str,
        strategy: StrategyKind,
    ) -> Result<Option<Bill>, StationError> {
        self.tick();
        let pile = self
            .piles
            .get(pile_id)
            .ok_or_else(|| StationError::NotFound(format!("pile {pile_id}")))?;
        let bill = match pile.state {
            PileState::Idle => {
                if let Some(pile) = self.piles.get_mut(pile_id) {
                    pile.fault_idle()?;
                }
                None
            }
            PileState::Charging => {
                let qn = pile.current_request.ok_or_else(|| {
                    StationError::InvalidTransition(format!(
                        "pile {pile_id} has no active request"
                    ))
                })?;
                let now = self.clock.now();
                Some(self.evict_session(pile_id, qn, now)?)
            }
            PileState::Faulted | PileState::Offline => {
                return Err(StationError::InvalidTransition(format!(
                    "pile {pile_id} is {:?} and cannot fault",
                    pile.state
                )));
            }
        };
        info!(pile_id, %strategy, evicted = bill.is_some(), "pile faulted");
        if self.strategy.kind() != strategy {
            self.strategy = strategy.build();
        }
        self.schedule_pass();
        Ok(bill)
    }

    /// Repairs a faulted pile and immediately re-runs the scheduler.
    ///
    /// # Errors
    ///
    /// `NotFound` or `InvalidTransition` when the pile is not Faulted.
    pub fn repair(&mut self, pile_id: &str) -> Result<(), StationError> {
        self.tick();
        let pile = self
            .piles
            .get_mut(pile_id)
            .ok_or_else(|| StationError::NotFound(format!("pile {pile_id}")))?;
        pile.repair()?;
        info!(pile_id, "pile repaired");
        self.schedule_pass();
        Ok(())
    }

    /// Takes an idle pile offline (`stop`) or brings it back (`start`).
    /// Distinct from faulting: no session can be interrupted because only
    /// an Idle pile may be stopped.
    ///
    /// # Errors
    ///
    /// `NotFound`, `PileBusy` for a charging pile, `InvalidTransition`
    /// otherwise.
    pub fn toggle_pile(&mut self, pile_id: &str, action: ToggleAction) -> Result<(), StationError> {
        self.tick();
        let pile = self
            .piles
            .get_mut(pile_id)
            .ok_or_else(|| StationError::NotFound(format!("pile {pile_id}")))?;
        match (action, pile.state) {
            (_, PileState::Charging) => {
                return Err(StationError::PileBusy(pile_id.to_string()));
            }
            (ToggleAction::Stop, PileState::Idle) => {
                pile.state = PileState::Offline;
                info!(pile_id, "pile taken offline");
            }
            (ToggleAction::Start, PileState::Offline) => {
                pile.state = PileState::Idle;
                info!(pile_id, "pile brought online");
                self.schedule_pass();
            }
            (action, state) => {
                return Err(StationError::InvalidTransition(format!(
                    "cannot {action:?} pile {pile_id} while {state:?}"
                )));
            }
        }
        Ok(())
    }

    /// Switches the matching strategy; active sessions are untouched, only
    /// future matching order changes.
    pub fn set_strategy(&mut self, kind: StrategyKind) {
        if self.strategy.kind() != kind {
            info!(%kind, "strategy switched");
            self.strategy = kind.build();
        }
        self.tick();
    }

    // ---- time control ----------------------------------------------------

    /// Sets the clock speedup factor.
    ///
    /// # Errors
    ///
    /// `Validation` for a negative or non-finite factor.
    pub fn set_speedup(&mut self, factor: f64) -> Result<(), StationError> {
        self.clock.set_speedup(factor)?;
        info!(factor, "clock speedup set");
        self.tick();
        Ok(())
    }

    /// Jumps simulated time to `time_str` (`YYYY-MM-DD HH:MM:SS`).
    ///
    /// # Errors
    ///
    /// `Validation` for an unparsable time string, rejected before any
    /// clock mutation.
    pub fn set_time(&mut self, time_str: &str) -> Result<(), StationError> {
        let parsed = NaiveDateTime::parse_from_str(time_str, "%Y-%m-%d %H:%M:%S")
            .map_err(|e| {
                StationError::Validation(format!(
                    "cannot parse \"{time_str}\" as YYYY-MM-DD HH:MM:SS: {e}"
                ))
            })?;
        self.clock.set_absolute(parsed.and_utc());
        info!(time = time_str, "clock set");
        self.tick();
        Ok(())
    }

    /// Current simulated time.
    pub fn get_time(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Reverts the clock to real time at speedup 1.
    pub fn reset_time(&mut self) {
        self.clock.reset_to_real();
        info!("clock reset to real time");
        self.tick();
    }

    // ---- scheduling ------------------------------------------------------

    /// Settles finished sessions and runs a scheduling pass. Idempotent:
    /// with no intervening state change a second call does nothing.
    pub fn tick(&mut self) {
        self.settle();
        self.schedule_pass();
    }

    /// Completes every session that has reached its requested amount. The
    /// bill ends at the exact cap instant.
    fn settle(&mut self) {
        let now = self.clock.now();
        let pile_ids: Vec<String> = self.piles.keys().cloned().collect();
        for pile_id in pile_ids {
            let Some(qn) = self.piles.get(&pile_id).and_then(|p| p.current_request) else {
                continue;
            };
            let Some(req) = self.requests.get(&qn) else {
                continue;
            };
            let (Some(started_at), Some(pile)) = (req.started_at, self.piles.get(&pile_id)) else {
                continue;
            };
            let hours_to_full = req.requested_amount / pile.rate;
            let finish_at = started_at + Duration::milliseconds((hours_to_full * 3_600_000.0) as i64);
            if now < finish_at {
                continue;
            }
            match self.finish_session(&pile_id, qn, finish_at, now) {
                Ok(bill) => {
                    info!(%qn, pile_id, energy = bill.energy_delivered, "session completed");
                }
                Err(e) => error!(%qn, pile_id, %e, "settlement failed"),
            }
        }
    }

    /// Matches waiting requests to idle piles, mode-exclusively, until one
    /// side runs dry. Pile order is deterministic (sorted by id) and the
    /// request order is the active strategy's.
    fn schedule_pass(&mut self) {
        let now = self.clock.now();
        for mode in [Mode::Fast, Mode::Slow] {
            loop {
                let Some(pile_id) = self
                    .piles
                    .values()
                    .find(|p| p.mode == mode && p.state == PileState::Idle)
                    .map(|p| p.pile_id.clone())
                else {
                    break;
                };
                let waiting: Vec<&ChargeRequest> = self
                    .queue(mode)
                    .waiting()
                    .iter()
                    .filter_map(|qn| self.requests.get(qn))
                    .filter(|r| r.state == RequestState::Waiting)
                    .collect();
                let Some(qn) = self
                    .strategy
                    .select(&mut waiting.into_iter(), now)
                    .map(|r| r.queue_number)
                else {
                    break;
                };
                self.queue_mut(mode).remove(qn);
                let (Some(pile), Some(req)) =
                    (self.piles.get_mut(&pile_id), self.requests.get_mut(&qn))
                else {
                    break;
                };
                if let Err(e) = pile.assign(req).and_then(|()| req.begin_charging(now)) {
                    error!(%qn, pile_id, %e, "assignment failed");
                    break;
                }
                info!(%qn, pile_id, "request dispatched");
            }
        }
    }

    /// Bills the session on `pile_id` as ending at `end` and returns the
    /// pile to Idle.
    fn finish_session(
        &mut self,
        pile_id: &str,
        qn: QueueNumber,
        end: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Result<Bill, StationError> {
        let (Some(pile), Some(req)) = (self.piles.get_mut(pile_id), self.requests.get_mut(&qn))
        else {
            return Err(StationError::NotFound(format!(
                "session {qn} on pile {pile_id}"
            )));
        };
        let start = req.started_at.ok_or_else(|| {
            StationError::InvalidTransition(format!("request {qn} has no session start"))
        })?;
        let bill = self
            .ledger
            .close_session(req, pile, start, end, created_at)
            .clone();
        pile.complete(req, bill.energy_delivered, bill.cost)?;
        Ok(bill)
    }

    /// Fault path: bills the session truncated at `fault_time`, drops the
    /// request back to Waiting (original submission time kept), and
    /// reinstates it at the head of its queue.
    fn evict_session(
        &mut self,
        pile_id: &str,
        qn: QueueNumber,
        fault_time: DateTime<Utc>,
    ) -> Result<Bill, StationError> {
        let (Some(pile), Some(req)) = (self.piles.get_mut(pile_id), self.requests.get_mut(&qn))
        else {
            return Err(StationError::NotFound(format!(
                "session {qn} on pile {pile_id}"
            )));
        };
        let start = req.started_at.ok_or_else(|| {
            StationError::InvalidTransition(format!("request {qn} has no session start"))
        })?;
        let bill = self
            .ledger
            .close_session(req, pile, start, fault_time, fault_time)
            .clone();
        pile.fail_charging(req, bill.energy_delivered, bill.cost)?;
        self.queue_mut(qn.mode).reinstate_front(qn);
        info!(%qn, pile_id, "session evicted by fault");
        Ok(bill)
    }

    // ---- snapshots -------------------------------------------------------

    /// Both waiting queues in dispatch order under the active strategy.
    pub fn queue_status(&mut self) -> QueueStatus {
        self.tick();
        QueueStatus {
            strategy: self.strategy.kind(),
            fast_capacity: self.fast.capacity(),
            slow_capacity: self.slow.capacity(),
            fast: self.waiting_entries(Mode::Fast),
            slow: self.waiting_entries(Mode::Slow),
        }
    }

    fn waiting_entries(&self, mode: Mode) -> Vec<WaitingEntry> {
        let now = self.clock.now();
        let mut waiting: Vec<&ChargeRequest> = self
            .queue(mode)
            .waiting()
            .iter()
            .filter_map(|qn| self.requests.get(qn))
            .filter(|r| r.state == RequestState::Waiting)
            .collect();
        waiting.sort_by(|a, b| self.strategy.compare(a, b, now));
        waiting
            .into_iter()
            .map(|r| WaitingEntry {
                queue_number: r.queue_number,
                username: r.username.clone(),
                mode: r.mode,
                requested_amount: r.requested_amount,
                priority: r.priority,
                submitted_at: r.submitted_at,
            })
            .collect()
    }

    /// All waiting requests across both modes (admin view).
    pub fn waiting_requests(&mut self) -> Vec<WaitingEntry> {
        self.tick();
        let mut entries = self.waiting_entries(Mode::Fast);
        entries.extend(self.waiting_entries(Mode::Slow));
        entries
    }

    /// Pile table snapshot with live session metering.
    pub fn pile_status(&mut self) -> Vec<PileSnapshot> {
        self.tick();
        let now = self.clock.now();
        self.piles
            .values()
            .map(|p| self.snapshot_pile(p, now))
            .collect()
    }

    /// Detailed admin pile view including lifetime counters.
    pub fn admin_pile_status(&mut self) -> Vec<PileDetail> {
        self.tick();
        let now = self.clock.now();
        self.piles
            .values()
            .map(|p| PileDetail {
                snapshot: self.snapshot_pile(p, now),
                total_energy_delivered: p.total_energy_delivered,
                total_earnings: p.total_earnings,
                sessions_served: p.sessions_served,
            })
            .collect()
    }

    fn snapshot_pile(&self, pile: &ChargingPile, now: DateTime<Utc>) -> PileSnapshot {
        let session = pile.current_request.and_then(|qn| {
            let req = self.requests.get(&qn)?;
            let start = req.started_at?;
            let hours = (now - start).num_milliseconds() as f64 / 3_600_000.0;
            Some(ActiveSession {
                queue_number: qn,
                username: req.username.clone(),
                requested_amount: req.requested_amount,
                start_time: start,
                energy_delivered: (pile.rate * hours).min(req.requested_amount),
            })
        });
        PileSnapshot {
            pile_id: pile.pile_id.clone(),
            mode: pile.mode,
            rate: pile.rate,
            state: pile.state,
            session,
        }
    }

    /// Bills filtered by username, or all bills for the admin view.
    pub fn bills(&mut self, username: Option<&str>) -> Vec<Bill> {
        self.tick();
        self.ledger.query(username)
    }

    /// Usage report over a simulated-time window.
    pub fn report(
        &mut self,
        kind: ReportKind,
        start_date: Option<chrono::NaiveDate>,
    ) -> UsageReport {
        self.tick();
        self.ledger.report(kind, start_date, self.clock.now())
    }

    /// Looks up a request by queue number.
    pub fn request(&self, qn: QueueNumber) -> Option<&ChargeRequest> {
        self.requests.get(&qn)
    }

    /// Panics with a description if any cross-entity invariant is broken.
    /// Debug aid for tests; not called on production paths.
    pub fn assert_invariants(&self) {
        for pile in self.piles.values() {
            assert_eq!(
                pile.current_request.is_some(),
                pile.state == PileState::Charging,
                "pile {} links a request iff charging",
                pile.pile_id
            );
            if let Some(qn) = pile.current_request {
                let req = self
                    .requests
                    .get(&qn)
                    .unwrap_or_else(|| panic!("pile {} links unknown {qn}", pile.pile_id));
                assert!(
                    matches!(req.state, RequestState::Assigned | RequestState::Charging),
                    "linked request {qn} is {:?}",
                    req.state
                );
                assert_eq!(req.pile_id.as_deref(), Some(pile.pile_id.as_str()));
            }
        }
        for req in self.requests.values() {
            assert_eq!(
                req.pile_id.is_some(),
                matches!(req.state, RequestState::Assigned | RequestState::Charging),
                "request {} holds a pile iff assigned or charging",
                req.queue_number
            );
            if req.state == RequestState::Waiting {
                assert!(
                    self.queue(req.mode).contains(req.queue_number),
                    "waiting request {} missing from its queue",
                    req.queue_number
                );
            }
        }
        for mode in [Mode::Fast, Mode::Slow] {
            for qn in self.queue(mode).waiting() {
                let req = self
                    .requests
                    .get(qn)
                    .unwrap_or_else(|| panic!("queued {qn} has no request"));
                assert_eq!(req.state, RequestState::Waiting);
                assert_eq!(req.mode, mode);
            }
        }
        let mut active_users: Vec<&str> = self
            .requests
            .values()
            .filter(|r| !r.state.is_terminal())
            .map(|r| r.username.as_str())
            .collect();
        active_users.sort_unstable();
        let before = active_users.len();
        active_users.dedup();
        assert_eq!(before, active_users.len(), "duplicate active user");
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::config::StationConfig;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 20, 8, 0, 0).unwrap()
    }

    fn station() -> Station {
        Station::with_clock(&StationConfig::compact(), SimClock::frozen_at(t0()))
            .expect("compact config is valid")
    }

    #[test]
    fn join_dispatches_to_idle_pile_immediately() {
        let mut s = station();
        let qn = s.join("alice", Mode::Fast, 30.0, None).unwrap();
        assert_eq!(qn.to_string(), "F0001");
        let req = s.request(qn).unwrap();
        assert_eq!(req.state, RequestState::Charging);
        assert_eq!(req.pile_id.as_deref(), Some("A"));
        s.assert_invariants();
    }

    #[test]
    fn join_rejects_duplicate_user() {
        let mut s = station();
        s.join("alice", Mode::Fast, 30.0, None).unwrap();
        let err = s.join("alice", Mode::Slow, 10.0, None);
        assert!(matches!(err, Err(StationError::DuplicateRequest(_))));
        s.assert_invariants();
    }

    #[test]
    fn join_rejects_nonpositive_amount() {
        let mut s = station();
        assert!(matches!(
            s.join("alice", Mode::Fast, 0.0, None),
            Err(StationError::Validation(_))
        ));
        assert!(matches!(
            s.join("alice", Mode::Fast, f64::NAN, None),
            Err(StationError::Validation(_))
        ));
    }

    #[test]
    fn leave_requires_waiting_state() {
        let mut s = station();
        let charging = s.join("alice", Mode::Fast, 30.0, None).unwrap();
        assert!(matches!(
            s.leave(charging),
            Err(StationError::NotWaiting(_))
        ));
        let waiting = s.join("bob", Mode::Fast, 30.0, None).unwrap();
        s.leave(waiting).unwrap();
        assert_eq!(s.request(waiting).unwrap().state, RequestState::Cancelled);
        s.assert_invariants();
    }

    #[test]
    fn change_mode_is_all_or_nothing_when_destination_full() {
        let mut s = station();
        // Occupy the slow pile and fill the slow queue (capacity 2).
        s.join("s0", Mode::Slow, 7.0, None).unwrap();
        s.join("s1", Mode::Slow, 7.0, None).unwrap();
        s.join("s2", Mode::Slow, 7.0, None).unwrap();
        // A fast waiter behind the charging fast pile.
        s.join("f0", Mode::Fast, 30.0, None).unwrap();
        let waiter = s.join("f1", Mode::Fast, 30.0, None).unwrap();

        let err = s.change_mode(waiter, Mode::Slow);
        assert!(matches!(err, Err(StationError::QueueFull(Mode::Slow))));
        // Original membership preserved.
        let req = s.request(waiter).unwrap();
        assert_eq!(req.state, RequestState::Waiting);
        assert_eq!(req.mode, Mode::Fast);
        s.assert_invariants();
    }

    #[test]
    fn change_mode_issues_fresh_number_in_destination() {
        let mut s = station();
        s.join("f0", Mode::Fast, 30.0, None).unwrap();
        let waiter = s.join("f1", Mode::Fast, 30.0, None).unwrap();
        s.join("s0", Mode::Slow, 7.0, None).unwrap();

        let new_qn = s.change_mode(waiter, Mode::Slow).unwrap();
        assert_eq!(new_qn.mode, Mode::Slow);
        assert!(s.request(waiter).is_none());
        s.assert_invariants();
    }

    #[test]
    fn cancel_rejects_charging_request() {
        let mut s = station();
        let qn = s.join("alice", Mode::Fast, 30.0, None).unwrap();
        assert!(matches!(
            s.cancel(qn),
            Err(StationError::InvalidTransition(_))
        ));
    }

    #[test]
    fn disconnect_bills_partial_session() {
        let mut s = station();
        let qn = s.join("alice", Mode::Fast, 30.0, None).unwrap();
        s.clock().advance(Duration::minutes(30));
        let bill = s.disconnect("A").unwrap();
        assert_eq!(bill.queue_number, qn);
        // Half an hour at 30 units/h.
        assert!((bill.energy_delivered - 15.0).abs() < 1e-6);
        assert_eq!(s.request(qn).unwrap().state, RequestState::Completed);
        s.assert_invariants();
    }

    #[test]
    fn modify_charging_rejects_active_session() {
        let mut s = station();
        let qn = s.join("alice", Mode::Fast, 30.0, None).unwrap();
        assert!(matches!(
            s.modify_charging(qn, Some(10.0), None),
            Err(StationError::InvalidTransition(_))
        ));
    }

    #[test]
    fn modify_charging_updates_amount_while_waiting() {
        let mut s = station();
        s.join("f0", Mode::Fast, 30.0, None).unwrap();
        let waiter = s.join("f1", Mode::Fast, 30.0, None).unwrap();
        let same = s.modify_charging(waiter, Some(12.5), None).unwrap();
        assert_eq!(same, waiter);
        assert_eq!(s.request(waiter).unwrap().requested_amount, 12.5);
    }

    #[test]
    fn set_time_rejects_garbage_before_mutation() {
        let mut s = station();
        let before = s.get_time();
        assert!(s.set_time("not a time").is_err());
        assert_eq!(s.get_time(), before);
        s.set_time("2024-05-21 10:30:00").unwrap();
        assert_eq!(
            s.get_time(),
            Utc.with_ymd_and_hms(2024, 5, 21, 10, 30, 0).unwrap()
        );
    }

    #[test]
    fn toggle_rejects_charging_pile() {
        let mut s = station();
        s.join("alice", Mode::Fast, 30.0, None).unwrap();
        assert!(matches!(
            s.toggle_pile("A", ToggleAction::Stop),
            Err(StationError::PileBusy(_))
        ));
    }

    #[test]
    fn toggle_offline_blocks_dispatch_until_started() {
        let mut s = station();
        s.toggle_pile("A", ToggleAction::Stop).unwrap();
        let qn = s.join("alice", Mode::Fast, 30.0, None).unwrap();
        assert_eq!(s.request(qn).unwrap().state, RequestState::Waiting);
        s.toggle_pile("A", ToggleAction::Start).unwrap();
        assert_eq!(s.request(qn).unwrap().state, RequestState::Charging);
        s.assert_invariants();
    }
}
