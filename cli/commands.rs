//! The query commands shared by the one-shot subcommands and the interactive
//! session. Each command runs against an already-built service and writes a
//! plain-text report.

use glycorisk::service::{FieldSelector, Override, RiskBand, RiskService, ServiceError};
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("{0}")]
    Service(#[from] ServiceError),

    #[error("Failed to write output: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to write score file: {0}")]
    Csv(#[from] csv::Error),

    #[error("{0}")]
    Usage(String),
}

/// Parses `COLUMN=VALUE` into an exact-name override. The value stays text
/// until the service knows the kind of the column it lands in.
pub fn parse_exact_override(spec: &str) -> Result<Override, String> {
    parse_override(spec, FieldSelector::Exact)
}

/// Parses `TEXT=VALUE` into an override of every column containing `TEXT`.
pub fn parse_matching_override(spec: &str) -> Result<Override, String> {
    parse_override(spec, FieldSelector::Contains)
}

fn parse_override(spec: &str, selector: fn(String) -> FieldSelector) -> Result<Override, String> {
    let (field, raw) = spec
        .split_once('=')
        .ok_or_else(|| format!("expected COLUMN=VALUE, got '{spec}'"))?;
    let field = field.trim();
    if field.is_empty() {
        return Err(format!("missing column name in '{spec}'"));
    }
    Ok(Override::from_text(selector(field.to_string()), raw.trim()))
}

pub fn assess(service: &RiskService, index: usize, out: &mut impl Write) -> Result<(), CommandError> {
    let assessment = service.assess(index)?;
    writeln!(out, "Patient {}", assessment.index)?;
    for (name, value) in assessment.record.fields() {
        writeln!(out, "  {name}: {value}")?;
    }
    writeln!(
        out,
        "Risk probability: {:.4} ({})",
        assessment.probability, assessment.band
    )?;
    Ok(())
}

pub fn what_if(
    service: &RiskService,
    index: usize,
    overrides: &[Override],
    out: &mut impl Write,
) -> Result<(), CommandError> {
    let outcome = service.what_if(index, overrides)?;
    for name in &outcome.changed {
        if let Some(value) = outcome.record.get(name) {
            writeln!(out, "  {name} -> {value}")?;
        }
    }
    let direction = if outcome.modified > outcome.original {
        "increase"
    } else if outcome.modified < outcome.original {
        "decrease"
    } else {
        "no change"
    };
    writeln!(
        out,
        "Original risk: {:.4} ({})",
        outcome.original,
        RiskBand::from_probability(outcome.original)
    )?;
    writeln!(
        out,
        "Simulated risk: {:.4} ({})",
        outcome.modified,
        RiskBand::from_probability(outcome.modified)
    )?;
    writeln!(out, "Change: {:.4} ({direction})", outcome.delta)?;
    Ok(())
}

pub fn explain(
    service: &RiskService,
    index: usize,
    top_k: usize,
    out: &mut impl Write,
) -> Result<(), CommandError> {
    let explanation = service.explain(index)?;
    writeln!(
        out,
        "Top {} feature contributions for patient {index} (log-odds):",
        explanation.top(top_k).len()
    )?;
    let width = explanation
        .top(top_k)
        .iter()
        .map(|c| c.feature.len())
        .max()
        .unwrap_or(0);
    for c in explanation.top(top_k) {
        writeln!(
            out,
            "  {:<width$}  value {:>10.4}  contribution {:>+9.4}",
            c.feature, c.value, c.contribution
        )?;
    }
    writeln!(out, "Baseline (log-odds): {:.4}", explanation.baseline)?;
    writeln!(out, "Predicted probability: {:.4}", explanation.probability())?;
    Ok(())
}

/// With a column, prints its breakdown; without one, lists the eligible columns.
pub fn fairness(
    service: &RiskService,
    column: Option<&str>,
    out: &mut impl Write,
) -> Result<(), CommandError> {
    let Some(column) = column else {
        let eligible = service.sensitive_columns();
        if eligible.is_empty() {
            writeln!(out, "No column has few enough distinct values for a breakdown.")?;
        } else {
            writeln!(out, "Columns available for a breakdown:")?;
            for name in eligible {
                writeln!(out, "  {name}")?;
            }
        }
        return Ok(());
    };

    let breakdown = service.fairness_breakdown(column)?;
    writeln!(out, "Mean predicted risk by '{}':", breakdown.column)?;
    for group in &breakdown.groups {
        writeln!(
            out,
            "  {:<12} {:.4}  (n = {})",
            group.value.to_string(),
            group.mean_probability,
            group.count
        )?;
    }
    Ok(())
}

/// Writes every reference row's probability and band as a TSV file.
pub fn write_scores(service: &RiskService, path: &Path) -> Result<(), CommandError> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record(["index", "probability", "risk_band"])?;
    for (index, p) in service.reference_scores().iter().enumerate() {
        writer.write_record([
            index.to_string(),
            format!("{p:.6}"),
            RiskBand::from_probability(*p).to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
