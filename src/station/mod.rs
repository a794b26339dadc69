/// Controllable simulated clock.
pub mod clock;
pub mod types;
/// Bounded per-mode waiting queues and queue numbering.
pub mod queue;
pub mod strategy;
pub mod engine;
/// Tariff tables, bills, and usage reports.
pub mod billing;

pub use clock::SimClock;
pub use engine::Station;
pub use types::{ChargeRequest, ChargingPile, Mode, PileState, QueueNumber, RequestState, StationError};
