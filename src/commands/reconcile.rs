use anyhow::Result;
use owo_colors::OwoColorize;

use calmirror_core::{PassReport, ReconciliationEngine, SyncConfig};

use crate::tui::create_spinner;

pub async fn run(config: &SyncConfig, json: bool) -> Result<()> {
    let ctx = super::connect(config).await?;
    let engine = ReconciliationEngine::new(ctx);

    let spinner = create_spinner("Reconciling".to_string());
    let result = engine.run_with_retry().await;
    spinner.finish_and_clear();
    let report = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &PassReport) {
    println!("Fetched {} remote events", report.fetched);

    let lines = [
        ("created", report.created),
        ("updated", report.updated),
        ("deleted", report.deleted),
        ("stale", report.stale),
        ("retired", report.retired),
        ("skipped", report.skipped),
    ];
    for (label, count) in lines {
        if count > 0 {
            println!("   {} {}", format!("{count:>4}").green(), label);
        }
    }

    if report.failed > 0 {
        println!("   {} failed (see log)", format!("{:>4}", report.failed).red());
    }
}
