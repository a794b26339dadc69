//! Time-of-day tariffs, session billing, and usage reports.
//!
//! Cost is the exact integral of the applicable tier rate over the
//! session's simulated-time span: the span is split at every tier
//! boundary it crosses and each segment priced independently.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{ChargeRequest, ChargingPile, QueueNumber, StationError};

/// Price band a tariff window belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateTier {
    Valley,
    Normal,
    Peak,
}

impl fmt::Display for RateTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valley => write!(f, "valley"),
            Self::Normal => write!(f, "normal"),
            Self::Peak => write!(f, "peak"),
        }
    }
}

/// One time-of-day pricing window. `end == 00:00` means end of day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TariffWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    /// Price per energy unit inside this window.
    pub rate: f64,
    pub tier: RateTier,
}

/// Full-day tariff table: contiguous windows covering midnight to midnight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TariffTable {
    windows: Vec<TariffWindow>,
}

impl TariffTable {
    /// Builds a table from windows, checking they tile the whole day.
    ///
    /// # Errors
    ///
    /// Validation error when windows are empty, out of order, overlapping,
    /// gapped, or do not start and end at midnight.
    pub fn new(windows: Vec<TariffWindow>) -> Result<Self, StationError> {
        let midnight = NaiveTime::MIN;
        let Some(first) = windows.first() else {
            return Err(StationError::Validation("tariff table is empty".into()));
        };
        if first.start != midnight {
            return Err(StationError::Validation(
                "tariff windows must start at 00:00".into(),
            ));
        }
        for pair in windows.windows(2) {
            if pair[0].end != pair[1].start {
                return Err(StationError::Validation(format!(
                    "tariff windows must be contiguous: {} then {}",
                    pair[0].end, pair[1].start
                )));
            }
        }
        let last = windows[windows.len() - 1];
        if last.end != midnight {
            return Err(StationError::Validation(
                "tariff windows must end at 00:00 (end of day)".into(),
            ));
        }
        for w in &windows {
            if !(w.rate.is_finite() && w.rate >= 0.0) {
                return Err(StationError::Validation(format!(
                    "tariff rate must be finite and >= 0, got {}",
                    w.rate
                )));
            }
        }
        Ok(Self { windows })
    }

    /// The deployment default: valley 0.4 (23:00–07:00), normal 0.7
    /// (07–10, 15–18, 21–23), peak 1.0 (10–15, 18–21).
    pub fn standard() -> Self {
        let t = |h| NaiveTime::from_hms_opt(h, 0, 0).unwrap_or(NaiveTime::MIN);
        let w = |s, e, rate, tier| TariffWindow {
            start: t(s),
            end: t(e),
            rate,
            tier,
        };
        Self {
            windows: vec![
                w(0, 7, 0.4, RateTier::Valley),
                w(7, 10, 0.7, RateTier::Normal),
                w(10, 15, 1.0, RateTier::Peak),
                w(15, 18, 0.7, RateTier::Normal),
                w(18, 21, 1.0, RateTier::Peak),
                w(21, 23, 0.7, RateTier::Normal),
                w(23, 0, 0.4, RateTier::Valley),
            ],
        }
    }

    pub fn windows(&self) -> &[TariffWindow] {
        &self.windows
    }

    /// Window in effect at a time of day.
    pub fn window_at(&self, time: NaiveTime) -> &TariffWindow {
        let midnight = NaiveTime::MIN;
        self.windows
            .iter()
            .find(|w| time >= w.start && (time < w.end || w.end == midnight))
            // The constructor guarantees full-day coverage.
            .unwrap_or(&self.windows[0])
    }

    /// Integrates `power` (units/hour) over `[start, end)` of simulated
    /// time, splitting at tier boundaries.
    ///
    /// Returns `(energy, cost)`.
    pub fn integrate(&self, power: f64, start: DateTime<Utc>, end: DateTime<Utc>) -> (f64, f64) {
        let mut energy = 0.0;
        let mut cost = 0.0;
        let mut cur = start;
        while cur < end {
            let window = self.window_at(cur.time());
            let boundary = if window.end == NaiveTime::MIN {
                // End of day: next midnight.
                (cur.date_naive() + Duration::days(1))
                    .and_time(NaiveTime::MIN)
                    .and_utc()
            } else {
                cur.date_naive().and_time(window.end).and_utc()
            };
            let seg_end = boundary.min(end);
            let hours = (seg_end - cur).num_milliseconds() as f64 / 3_600_000.0;
            let seg_energy = power * hours;
            energy += seg_energy;
            cost += seg_energy * window.rate;
            cur = seg_end;
        }
        (energy, cost)
    }
}

impl Default for TariffTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Immutable record of one finished charging session.
#[derive(Debug, Clone, Serialize)]
pub struct Bill {
    pub bill_id: Uuid,
    /// Simulated time the bill was produced.
    pub created_at: DateTime<Utc>,
    pub queue_number: QueueNumber,
    pub username: String,
    pub pile_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub energy_delivered: f64,
    /// Energy cost, integrated over the tariff table.
    pub cost: f64,
    /// Service fee on top of the energy cost.
    pub service_cost: f64,
    pub total_cost: f64,
    /// Tier in effect at `start_time`; `cost` remains the exact
    /// multi-segment integral when the session crosses tiers.
    pub rate_tier: RateTier,
}

/// Owns every bill ever produced plus the pricing inputs.
#[derive(Debug, Clone)]
pub struct BillingLedger {
    tariff: TariffTable,
    service_fee_rate: f64,
    bills: Vec<Bill>,
}

impl BillingLedger {
    pub fn new(tariff: TariffTable, service_fee_rate: f64) -> Self {
        Self {
            tariff,
            service_fee_rate,
            bills: Vec::new(),
        }
    }

    pub fn tariff(&self) -> &TariffTable {
        &self.tariff
    }

    /// Bills a session spanning `[start, end)` on `pile` and records it.
    ///
    /// Energy is clamped to the request's amount to absorb floating-point
    /// drift when the session ran to the exact cap instant.
    pub fn close_session(
        &mut self,
        request: &ChargeRequest,
        pile: &ChargingPile,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> &Bill {
        let (raw_energy, cost) = self.tariff.integrate(pile.rate, start, end);
        let energy = raw_energy.min(request.requested_amount);
        let service_cost = cost * self.service_fee_rate;
        let bill = Bill {
            bill_id: Uuid::new_v4(),
            created_at,
            queue_number: request.queue_number,
            username: request.username.clone(),
            pile_id: pile.pile_id.clone(),
            start_time: start,
            end_time: end,
            energy_delivered: energy,
            cost,
            service_cost,
            total_cost: cost + service_cost,
            rate_tier: self.tariff.window_at(start.time()).tier,
        };
        self.bills.push(bill);
        // Just pushed, so the ledger is non-empty.
        &self.bills[self.bills.len() - 1]
    }

    pub fn all(&self) -> &[Bill] {
        &self.bills
    }

    /// Bills filtered by username, or everything for the admin view.
    pub fn query(&self, username: Option<&str>) -> Vec<Bill> {
        self.bills
            .iter()
            .filter(|b| username.is_none_or(|u| b.username == u))
            .cloned()
            .collect()
    }

    /// Aggregates bills over a simulated-time window.
    pub fn report(
        &self,
        kind: ReportKind,
        start_date: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> UsageReport {
        let span = kind.span();
        let (window_start, window_end) = match start_date {
            Some(d) => {
                let ws = d.and_time(NaiveTime::MIN).and_utc();
                (ws, ws + span)
            }
            None => (now - span, now),
        };
        let mut report = UsageReport {
            kind,
            window_start,
            window_end,
            total_sessions: 0,
            total_energy: 0.0,
            total_hours: 0.0,
            total_cost: 0.0,
            total_service_cost: 0.0,
            total_revenue: 0.0,
            by_pile: Vec::new(),
        };
        let mut per_pile: BTreeMap<&str, PileUsage> = BTreeMap::new();
        for bill in &self.bills {
            if bill.end_time < window_start || bill.end_time >= window_end {
                continue;
            }
            let hours = (bill.end_time - bill.start_time).num_milliseconds() as f64 / 3_600_000.0;
            report.total_sessions += 1;
            report.total_energy += bill.energy_delivered;
            report.total_hours += hours;
            report.total_cost += bill.cost;
            report.total_service_cost += bill.service_cost;
            report.total_revenue += bill.total_cost;

            let entry = per_pile
                .entry(bill.pile_id.as_str())
                .or_insert_with(|| PileUsage {
                    pile_id: bill.pile_id.clone(),
                    sessions: 0,
                    energy_delivered: 0.0,
                    charging_hours: 0.0,
                    revenue: 0.0,
                });
            entry.sessions += 1;
            entry.energy_delivered += bill.energy_delivered;
            entry.charging_hours += hours;
            entry.revenue += bill.total_cost;
        }
        report.by_pile = per_pile.into_values().collect();
        report
    }
}

/// Report granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Day,
    Week,
    Month,
}

impl ReportKind {
    /// Window length; a month is a fixed 30-day span.
    pub fn span(self) -> Duration {
        match self {
            Self::Day => Duration::days(1),
            Self::Week => Duration::days(7),
            Self::Month => Duration::days(30),
        }
    }
}

impl FromStr for ReportKind {
    type Err = StationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            other => Err(StationError::Validation(format!(
                "unknown report type \"{other}\", expected day, week, or month"
            ))),
        }
    }
}

/// Per-pile slice of a usage report.
#[derive(Debug, Clone, Serialize)]
pub struct PileUsage {
    pub pile_id: String,
    pub sessions: usize,
    pub energy_delivered: f64,
    pub charging_hours: f64,
    pub revenue: f64,
}

/// Aggregate over all bills whose `end_time` falls in the window.
#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    pub kind: ReportKind,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total_sessions: usize,
    pub total_energy: f64,
    pub total_hours: f64,
    pub total_cost: f64,
    pub total_service_cost: f64,
    pub total_revenue: f64,
    pub by_pile: Vec<PileUsage>,
}
