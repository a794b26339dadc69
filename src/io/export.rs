//! CSV export for the bills ledger.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::station::billing::Bill;

/// Column header for CSV bill export.
const HEADER: &str = "bill_id,created_at,queue_number,username,pile_id,\
                      start_time,end_time,energy_delivered,cost,\
                      service_cost,total_cost,rate_tier";

/// Exports bills to a CSV file at the given path.
///
/// Writes a header row followed by one data row per bill. Produces
/// deterministic output for identical inputs.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(bills: &[Bill], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_csv(bills, buf)
}

/// Writes bills as CSV to any writer.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(bills: &[Bill], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    wtr.write_record(HEADER.split(',').map(str::trim))?;

    for b in bills {
        wtr.write_record(&[
            b.bill_id.to_string(),
            b.created_at.to_rfc3339(),
            b.queue_number.to_string(),
            b.username.clone(),
            b.pile_id.clone(),
            b.start_time.to_rfc3339(),
            b.end_time.to_rfc3339(),
            format!("{:.4}", b.energy_delivered),
            format!("{:.4}", b.cost),
            format!("{:.4}", b.service_cost),
            format!("{:.4}", b.total_cost),
            b.rate_tier.to_string(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::station::billing::{BillingLedger, TariffTable};
    use crate::station::types::{ChargeRequest, ChargingPile, Mode, QueueNumber};

    fn sample_bills() -> Vec<Bill> {
        let mut ledger = BillingLedger::new(TariffTable::standard(), 0.1);
        let start = Utc.with_ymd_and_hms(2024, 5, 20, 8, 0, 0).unwrap();
        let pile = ChargingPile::new("A", Mode::Fast, 30.0);
        for seq in 1..=3 {
            let req = ChargeRequest::new(
                QueueNumber { mode: Mode::Fast, seq },
                "alice",
                30.0,
                None,
                start,
            );
            let s = start + Duration::hours(i64::from(seq));
            ledger.close_session(&req, &pile, s, s + Duration::hours(1), s);
        }
        ledger.query(None)
    }

    #[test]
    fn csv_has_header_and_one_row_per_bill() {
        let bills = sample_bills();
        let mut out = Vec::new();
        write_csv(&bills, &mut out).expect("csv export should succeed");

        let csv = String::from_utf8(out).expect("csv output should be valid UTF-8");
        let mut lines = csv.lines();
        let header = lines.next().expect("header line");
        assert!(header.starts_with("bill_id,created_at,queue_number"));
        assert_eq!(lines.count(), 3);
    }

    #[test]
    fn csv_rows_carry_bill_fields() {
        let bills = sample_bills();
        let mut out = Vec::new();
        write_csv(&bills, &mut out).expect("csv export should succeed");

        let csv = String::from_utf8(out).expect("valid UTF-8");
        let row = csv.lines().nth(1).expect("first data row");
        assert!(row.contains("F0001"));
        assert!(row.contains("alice"));
        assert!(row.contains(",A,"));
    }
}
