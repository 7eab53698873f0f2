//! Check command - validates saved server entries.
//!
//! Each `[[servers]]` entry is decoded and validated on its own, so one bad
//! entry does not hide problems in the others.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Args;
use inspector_proxy::ConnectionDescriptor;
use serde::Serialize;

use super::Context;

/// Arguments for the check command.
#[derive(Args, Debug, Default)]
pub struct CheckArgs {
    /// Config files to check (default: --config, or the discovered files)
    #[arg(value_name = "FILE")]
    pub files: Vec<PathBuf>,
}

/// Outcome for one server entry.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EntryReport {
    pub file: String,
    /// Position in the file's `servers` array.
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Run the check command.
pub fn run(args: CheckArgs, ctx: &Context) -> Result<()> {
    let files = files_to_check(args, ctx)?;
    if files.is_empty() {
        if ctx.json_output {
            println!("[]");
        } else {
            println!("No config files found.");
        }
        return Ok(());
    }

    let mut reports = Vec::new();
    for file in &files {
        if ctx.verbose && !ctx.json_output {
            println!("Checking {}", file.display());
        }
        reports.extend(check_file(file)?);
    }

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        print_table(&reports);
    }

    let invalid = reports.iter().filter(|r| !r.valid).count();
    if invalid > 0 {
        anyhow::bail!("{} of {} server entries are invalid", invalid, reports.len());
    }
    Ok(())
}

fn files_to_check(args: CheckArgs, ctx: &Context) -> Result<Vec<PathBuf>> {
    if !args.files.is_empty() {
        return Ok(args.files);
    }
    if let Some(ref path) = ctx.config_path {
        return Ok(vec![path.clone()]);
    }
    let loaded = inspector_config::load_config(None)?;
    Ok(loaded
        .sources
        .into_iter()
        .map(|s| s.path)
        .filter(|p| p.is_file())
        .collect())
}

/// Validate every server entry in one config file.
pub fn check_file(path: &Path) -> Result<Vec<EntryReport>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let document: toml::Table = toml::from_str(&contents)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    let file = path.display().to_string();
    let entries = match document.get("servers") {
        None => return Ok(Vec::new()),
        Some(toml::Value::Array(entries)) => entries.as_slice(),
        Some(_) => anyhow::bail!("{}: `servers` must be an array of tables", file),
    };

    let mut seen = HashSet::new();
    let reports = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let mut report = check_entry(entry);
            report.file = file.clone();
            report.index = index;
            if let Some(ref id) = report.id
                && report.valid
                && !seen.insert(id.clone())
            {
                report.valid = false;
                report.error = Some(format!("duplicate server id '{id}'"));
            }
            report
        })
        .collect();
    Ok(reports)
}

fn check_entry(entry: &toml::Value) -> EntryReport {
    let id = entry
        .get("id")
        .and_then(toml::Value::as_str)
        .map(str::to_string);
    let mut report = EntryReport {
        file: String::new(),
        index: 0,
        id,
        kind: None,
        target: None,
        valid: false,
        error: None,
    };

    let decoded = serde_json::to_value(entry)
        .map_err(|e| e.to_string())
        .and_then(|value| ConnectionDescriptor::from_json(value).map_err(|e| e.to_string()))
        .and_then(|descriptor| {
            descriptor.validate().map_err(|e| e.to_string())?;
            Ok(descriptor)
        });

    match decoded {
        Ok(descriptor) => {
            report.kind = Some(descriptor.kind().as_str().to_string());
            report.target = Some(descriptor.target());
            report.valid = true;
        }
        Err(e) => report.error = Some(e),
    }
    report
}

fn print_table(reports: &[EntryReport]) {
    if reports.is_empty() {
        println!("No server entries found.");
        return;
    }

    println!(
        "{:<20} {:<16} {:<8} {:<40}",
        "ID", "TRANSPORT", "STATUS", "TARGET / ERROR"
    );
    println!("{}", "-".repeat(84));

    for report in reports {
        let id = report
            .id
            .clone()
            .unwrap_or_else(|| format!("#{}", report.index));
        let kind = report.kind.as_deref().unwrap_or("-");
        let (status, detail) = if report.valid {
            ("ok", report.target.as_deref().unwrap_or(""))
        } else {
            ("invalid", report.error.as_deref().unwrap_or(""))
        };
        println!("{:<20} {:<16} {:<8} {:<40}", id, kind, status, detail);
    }
}
