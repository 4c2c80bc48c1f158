use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use coapcheck_analysis::analysis::{analyse, AnalysisOptions, Report};
use coapcheck_analysis::testcases::catalogue;
use coapcheck_core::config::Config;
use tracing::info;

use crate::trace;

pub fn run(dump: &Utf8Path, config: &Config) -> Result<()> {
    let frames = trace::load(dump)?;
    info!("Loaded {} frames from {}", frames.len(), dump);

    let options = AnalysisOptions::from_config(config);
    let report = analyse(frames, &options, catalogue())?;
    info!("Overall verdict: {}", report.overall_verdict());

    match &config.general.report_dir {
        Some(dir) => {
            let path = write_report(&report, dir, dump)?;
            info!("Report written to {}", path);
        }
        None => print!("{}", report.render()),
    }
    Ok(())
}

/// Write the report next to the others as `<dump stem>.txt`
fn write_report(report: &Report, dir: &Utf8Path, dump: &Utf8Path) -> Result<Utf8PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create report directory {dir}"))?;
    let name = dump.file_stem().unwrap_or("capture");
    let path = dir.join(format!("{name}.txt"));
    std::fs::write(&path, report.render()).with_context(|| format!("Failed to write report {path}"))?;
    Ok(path)
}
