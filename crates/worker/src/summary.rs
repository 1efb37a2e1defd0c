use coindaily_core::pipeline::{OutcomeStatus, RunSummary};
use std::fmt::Write;

/// Logs the per-coin outcome table of a finished job.
pub fn log(summary: &RunSummary) {
    tracing::info!(
        run_id = %summary.run_id,
        job = summary.job,
        ok = summary.count(OutcomeStatus::Ok),
        failed = summary.count(OutcomeStatus::Failed),
        skipped = summary.count(OutcomeStatus::Skipped),
        "run summary\n{}",
        render(summary)
    );
}

fn render(summary: &RunSummary) -> String {
    let id_width = summary
        .outcomes
        .iter()
        .map(|o| o.coin_id.len())
        .max()
        .unwrap_or(0)
        .max("coin".len());

    let mut out = String::new();
    let _ = writeln!(out, "{:<id_width$}  {:<10}  {:<7}  detail", "coin", "date", "status");
    for o in &summary.outcomes {
        let date = o.date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<id_width$}  {:<10}  {:<7}  {}",
            o.coin_id,
            date,
            o.status.to_string(),
            o.detail.as_deref().unwrap_or("")
        );
    }
    out
}
