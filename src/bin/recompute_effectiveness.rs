// Dev utility: rebuild DAY/WEEK/MONTH effectiveness snapshots from the attempt log.
//
// Usage:
//   cargo run --bin recompute_effectiveness -- [db_path] [YYYY-MM-DD]
//
// Does not start the dispatch engine; only reads attempts/runs and rewrites snapshots.

use chrono::{NaiveDate, Utc};
use contractor_dispatch::db::open_shared_connection;
use contractor_dispatch::domain::types::PeriodKind;
use contractor_dispatch::engine::EffectivenessTracker;
use contractor_dispatch::repository::{AttemptRepository, DispatchRunRepository, EffectivenessRepository};
use std::sync::Arc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let db_path = args
        .next()
        .unwrap_or_else(contractor_dispatch::app::get_default_db_path);

    let date = match args.next().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
        Some(d) => NaiveDate::parse_from_str(&d, "%Y-%m-%d")?,
        None => Utc::now().date_naive(),
    };

    let conn = open_shared_connection(&db_path)?;
    let tracker = EffectivenessTracker::new(
        Arc::new(EffectivenessRepository::new(conn.clone())),
        Arc::new(AttemptRepository::new(conn.clone())),
        Arc::new(DispatchRunRepository::new(conn)),
    );

    for kind in PeriodKind::ALL {
        let snapshot = tracker.recompute(kind, date)?;
        println!(
            "{} {} total={} success={} failed={} success_rate={:.1} avg_score={:.1} fallback={} manual={} unassignable={}",
            kind,
            snapshot.period_start,
            snapshot.total_assignments,
            snapshot.successful_assignments,
            snapshot.failed_assignments,
            snapshot.success_rate,
            snapshot.average_score,
            snapshot.fallback_assignments,
            snapshot.manual_assignments,
            snapshot.unassignable_jobs,
        );
    }
    Ok(())
}
