use crate::query::JobStatus;
use crate::workflow::{RunPath, RunReport};

fn status_icon(s: JobStatus) -> &'static str {
    match s {
        JobStatus::Succeeded => "✅",
        JobStatus::Failed => "❌",
        JobStatus::Cancelled => "⏹️ ",
        JobStatus::Queued | JobStatus::Running => "⏳",
    }
}

pub fn print_summary(report: &RunReport) {
    let path = match report.path {
        Some(RunPath::Bootstrap) => "bootstrap",
        Some(RunPath::Incremental) => "incremental",
        None => "undecided",
    };
    eprintln!(
        "\nDatabase {} ({} tables listed, path: {})",
        report.database,
        report.lookup_tables.len(),
        path
    );

    for j in &report.jobs {
        let rows = j
            .rows_affected
            .map(|n| format!("{} rows", n))
            .unwrap_or_default();
        eprintln!("{} {:<40} {:<10} {}", status_icon(j.status), j.step, j.job_id, rows);
    }

    let c = &report.counters;
    if c.unrecognized_skipped > 0 || c.unpaired_skipped > 0 {
        eprintln!(
            "    skipped {} unrecognized and {} unpaired tables",
            c.unrecognized_skipped, c.unpaired_skipped
        );
    }

    eprintln!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    match &report.error {
        None => eprintln!(
            "Done in {:.1}s: {} queries, {} created, {} existing, {} loads",
            report.duration_ms as f64 / 1000.0,
            c.queries,
            c.objects_applied,
            c.objects_existing,
            c.loads
        ),
        Some(e) => {
            eprintln!("💥 Failed at {}: {}", e.step, e.cause);
            if let Some(job) = &e.last_job {
                eprintln!("    Last job: {} (may still be running; see `lakeflow cancel`)", job);
            }
        }
    }
}
