//! Toon format report for a pipeline run
//!
//! Toon (Token-Oriented Object Notation) is TOML with tabular arrays; it keeps
//! run reports compact enough to paste into an incident ticket or an LLM
//! context.
//!
//! See: https://github.com/toon-format/toon

use crate::error::Stage;
use crate::pipeline::RunRecord;
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// Write the toon report for `record` to `output_path` (`~` is expanded)
pub fn write_report(record: &RunRecord, output_path: &Path) -> Result<PathBuf> {
    let toon = serialize_to_toon(record);

    let raw = output_path.to_string_lossy();
    let final_path = PathBuf::from(shellexpand::tilde(&raw).into_owned());

    if let Some(parent) = final_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {}", parent.display()))?;
    }

    fs::write(&final_path, toon)
        .with_context(|| format!("Failed to write report to {}", final_path.display()))?;

    Ok(final_path)
}

fn quote(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n");
    format!("\"{escaped}\"")
}

/// Serialize a run record to Toon format
pub fn serialize_to_toon(record: &RunRecord) -> String {
    let mut toon = String::new();

    toon.push_str("# deploy run report\n\n");
    toon.push_str("[meta]\n");
    let _ = writeln!(toon, "started_at = \"{}\"", record.started_at.to_rfc3339());
    let _ = writeln!(toon, "finished_at = \"{}\"", record.finished_at.to_rfc3339());
    toon.push_str("format = \"toon\"\n\n");

    if let Some(target) = &record.target {
        toon.push_str("[target]\n");
        let _ = writeln!(toon, "project = {}", quote(&target.project));
        let _ = writeln!(toon, "cluster = {}", quote(&target.cluster));
        let _ = writeln!(toon, "zone = {}", quote(&target.zone));
        toon.push('\n');
    }

    toon.push_str("[summary]\n");
    let _ = writeln!(toon, "success = {}", record.result.is_ok());
    let _ = writeln!(toon, "exit_code = {}", record.exit_code());
    let completed: Vec<String> = record.completed.iter().map(|s| quote(s.as_str())).collect();
    let _ = writeln!(toon, "completed = [{}]", completed.join(", "));
    let pending: Vec<String> = Stage::PIPELINE
        .iter()
        .filter(|s| !record.completed.contains(*s))
        .map(|s| quote(s.as_str()))
        .collect();
    let _ = writeln!(toon, "not_reached = [{}]", pending.join(", "));
    toon.push('\n');

    match &record.result {
        Ok(outcome) => {
            toon.push_str("[cluster]\n");
            let _ = writeln!(toon, "context = {}", quote(outcome.handle.context()));
            let _ = writeln!(toon, "created = {}\n", outcome.handle.created());

            if !outcome.applied.is_empty() {
                toon.push_str("# Applied manifests, in apply order\n");
                for applied in &outcome.applied {
                    toon.push_str("[[applied]]\n");
                    let _ = writeln!(toon, "kind = {}", quote(&applied.kind.to_string()));
                    let _ = writeln!(toon, "name = {}", quote(&applied.name));
                    let _ = writeln!(toon, "namespace = {}\n", quote(&applied.namespace));
                }
            }

            toon.push_str("[rollout]\n");
            let _ = writeln!(toon, "ready = {}", outcome.rollout.status.ready);
            let _ = writeln!(toon, "desired = {}", outcome.rollout.status.desired);
            let _ = writeln!(toon, "elapsed_secs = {}", outcome.rollout.elapsed.as_secs());
            let _ = writeln!(toon, "polls = {}", outcome.rollout.polls);
        }
        Err(err) => {
            toon.push_str("[failure]\n");
            let _ = writeln!(toon, "stage = {}", quote(err.stage().as_str()));
            let _ = writeln!(toon, "message = {}", quote(&err.to_string()));
        }
    }

    toon
}
