//! Terminal table and JSON output for a [`DiffReport`].
//!
//! Masking happens here and nowhere else: entries carry their true values and
//! the `masked` flag, and the renderer decides what to print.

use std::fmt::Write as _;
use std::str::FromStr;

use serde::Serialize;
#[cfg(feature = "tracing")]
use tracing::warn;

use crate::diff::DiffReport;
use crate::mask::{UNMASK_WARNING, display_value};
use crate::model::{DiffStatus, DiffSummary, Direction};

/// Stand-in for a value absent on one side.
const ABSENT: &str = "-";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
  #[default]
  Table,
  Json,
}

impl FromStr for OutputFormat {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "table" => Ok(OutputFormat::Table),
      "json" => Ok(OutputFormat::Json),
      other => Err(format!("unknown output format '{}', expected table or json", other)),
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
  pub format: OutputFormat,
  /// Show sensitive values in plaintext. Always comes with a warning.
  pub unmask: bool,
  pub dry_run: bool,
  /// Where the remote side lives, shown in the header.
  pub backend: Option<String>,
}

/// Rendered output. `warning`, when present, must be shown before `body`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
  pub body: String,
  pub warning: Option<String>,
}

#[derive(Serialize)]
struct JsonReport<'a> {
  direction: Direction,
  #[serde(skip_serializing_if = "Option::is_none")]
  backend: Option<&'a str>,
  dry_run: bool,
  summary: DiffSummary,
  entries: Vec<JsonEntry<'a>>,
  rejected: &'a [String],
}

#[derive(Serialize)]
struct JsonEntry<'a> {
  key: &'a str,
  status: DiffStatus,
  local: Option<&'a str>,
  remote: Option<&'a str>,
  masked: bool,
}

pub fn render(report: &DiffReport, options: &RenderOptions) -> Result<Rendered, serde_json::Error> {
  let warning = if options.unmask {
    #[cfg(feature = "tracing")]
    warn!("Rendering with masking disabled");

    Some(UNMASK_WARNING.to_string())
  } else {
    None
  };

  let body = match options.format {
    OutputFormat::Table => render_table(report, options),
    OutputFormat::Json => render_json(report, options)?,
  };

  Ok(Rendered { body, warning })
}

fn render_json(report: &DiffReport, options: &RenderOptions) -> Result<String, serde_json::Error> {
  let entries = report
    .entries
    .iter()
    .map(|entry| JsonEntry {
      key: &entry.key,
      status: entry.status,
      local: entry
        .local_value
        .as_deref()
        .map(|value| display_value(value, entry.masked, options.unmask)),
      remote: entry
        .remote_value
        .as_deref()
        .map(|value| display_value(value, entry.masked, options.unmask)),
      masked: entry.masked && !options.unmask,
    })
    .collect();

  let mut json = serde_json::to_string_pretty(&JsonReport {
    direction: report.direction,
    backend: options.backend.as_deref(),
    dry_run: options.dry_run,
    summary: report.summary,
    entries,
    rejected: &report.rejected,
  })?;
  json.push('\n');
  Ok(json)
}

fn render_table(report: &DiffReport, options: &RenderOptions) -> String {
  let rows: Vec<[String; 4]> = report
    .entries
    .iter()
    .map(|entry| {
      let cell = |value: Option<&str>| match value {
        Some(value) => display_value(value, entry.masked, options.unmask).to_string(),
        None => ABSENT.to_string(),
      };
      [
        entry.status.symbol().to_string(),
        entry.key.clone(),
        cell(entry.local_value.as_deref()),
        cell(entry.remote_value.as_deref()),
      ]
    })
    .collect();

  let header = ["", "Key", "Local", "Remote"];
  let mut widths = header.map(str::len);
  for row in &rows {
    for (width, cell) in widths.iter_mut().zip(row) {
      *width = (*width).max(cell.chars().count());
    }
  }

  let mut out = String::new();
  let direction = report.direction.to_string().to_uppercase();
  match &options.backend {
    Some(backend) => {
      let _ = writeln!(out, "Diff: {} [{}]", direction, backend);
    }
    None => {
      let _ = writeln!(out, "Diff: {}", direction);
    }
  }

  if rows.is_empty() {
    out.push_str("No entries on either side.\n");
  } else {
    push_row(&mut out, &header.map(str::to_string), &widths);
    for row in &rows {
      push_row(&mut out, row, &widths);
    }
  }

  let summary = summary_line(&report.summary);
  if !summary.is_empty() {
    let _ = writeln!(out, "\n  {}", summary);
  }

  if !report.rejected.is_empty() {
    let _ = writeln!(
      out,
      "\nSkipped {} remote key(s) that are not valid identifiers: {}",
      report.rejected.len(),
      report.rejected.join(", ")
    );
  }

  if options.dry_run {
    out.push_str("\nDry-run mode: no changes will be written.\n");
  }

  out
}

fn push_row(out: &mut String, row: &[String; 4], widths: &[usize; 4]) {
  let line = row
    .iter()
    .zip(widths)
    .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
    .collect::<Vec<_>>()
    .join("  ");
  out.push_str(line.trim_end());
  out.push('\n');
}

fn summary_line(summary: &DiffSummary) -> String {
  [
    (summary.added, DiffStatus::Added),
    (summary.removed, DiffStatus::Removed),
    (summary.changed, DiffStatus::Changed),
    (summary.unchanged, DiffStatus::Unchanged),
  ]
  .into_iter()
  .filter(|(count, _)| *count > 0)
  .map(|(count, status)| format!("{}{} {}", status.symbol(), count, status))
  .collect::<Vec<_>>()
  .join("  ")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::diff::diff;
  use crate::mask::{MASK_PLACEHOLDER, Masker};
  use crate::model::EnvVar;
  use std::collections::BTreeMap;

  fn report(direction: Direction) -> DiffReport {
    let local = vec![
      EnvVar::new("DB_PASSWORD", "hunter2").unwrap(),
      EnvVar::new("DB_HOST", "localhost").unwrap(),
    ];
    let remote: BTreeMap<String, String> = [("DB_HOST", "db.internal")]
      .into_iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    DiffReport::new(
      direction,
      diff(&local, &remote, direction, &Masker::default()),
      Vec::new(),
    )
  }

  #[test]
  fn test_table_masks_by_default() {
    let rendered = render(&report(Direction::Push), &RenderOptions::default()).unwrap();
    assert!(rendered.warning.is_none());
    assert!(rendered.body.contains(MASK_PLACEHOLDER));
    assert!(!rendered.body.contains("hunter2"));
    assert!(rendered.body.contains("db.internal"));
    assert!(rendered.body.contains("+1 added  ~1 changed"));
  }

  #[test]
  fn test_unmask_requires_warning() {
    let options = RenderOptions {
      unmask: true,
      ..RenderOptions::default()
    };
    let rendered = render(&report(Direction::Push), &options).unwrap();
    assert_eq!(rendered.warning.as_deref(), Some(UNMASK_WARNING));
    assert!(rendered.body.contains("hunter2"));
  }

  #[test]
  fn test_table_rows_and_notices() {
    let options = RenderOptions {
      dry_run: true,
      backend: Some("secrets_manager:myapp/dev".to_string()),
      ..RenderOptions::default()
    };
    let mut report = report(Direction::Pull);
    report.rejected.push("123BAD".to_string());
    let body = render(&report, &options).unwrap().body;

    assert!(body.starts_with("Diff: PULL [secrets_manager:myapp/dev]\n"));
    let password_row = body
      .lines()
      .find(|line| line.contains("DB_PASSWORD"))
      .unwrap();
    assert!(password_row.starts_with('-'));
    assert!(password_row.trim_end().ends_with(" -"));
    assert!(body.contains("123BAD"));
    assert!(body.contains("Dry-run mode"));
  }

  #[test]
  fn test_json_shape() {
    let options = RenderOptions {
      format: OutputFormat::Json,
      ..RenderOptions::default()
    };
    let body = render(&report(Direction::Push), &options).unwrap().body;
    let value: serde_json::Value = serde_json::from_str(&body).unwrap();

    assert_eq!(value["direction"], "push");
    assert_eq!(value["dry_run"], false);
    assert_eq!(value["summary"]["added"], 1);
    assert_eq!(value["summary"]["changed"], 1);
    assert_eq!(value["rejected"], serde_json::json!([]));
    assert!(value.get("backend").is_none());

    let entries = value["entries"].as_array().unwrap();
    assert_eq!(entries[0]["key"], "DB_HOST");
    assert_eq!(entries[0]["status"], "changed");
    assert_eq!(entries[1]["key"], "DB_PASSWORD");
    assert_eq!(entries[1]["local"], MASK_PLACEHOLDER);
    assert_eq!(entries[1]["remote"], serde_json::Value::Null);
    assert_eq!(entries[1]["masked"], true);
  }

  #[test]
  fn test_output_format_from_str() {
    assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
    assert!("yaml".parse::<OutputFormat>().is_err());
  }
}
