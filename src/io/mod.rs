/// CSV export of the bills ledger.
pub mod export;
