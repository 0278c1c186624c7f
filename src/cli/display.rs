//! Table and color helpers for human-readable output.
//!
//! Styling goes through `console`, which drops colors when stdout is not a
//! terminal or `NO_COLOR` is set.

use comfy_table::{presets, Cell, CellAlignment, ContentArrangement, Table};
use console::{style, StyledObject};

use crate::domain::models::{StabilityStatus, Trend};

/// Create a standard list table with the given headers.
pub fn list_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h.to_uppercase()).set_alignment(CellAlignment::Left)),
        );
    table
}

/// Key/value table used for summaries.
pub fn detail_table(rows: &[(&str, String)]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic);
    for (key, value) in rows {
        table.add_row(vec![Cell::new(style(key).bold().to_string()), Cell::new(value)]);
    }
    table
}

pub fn colorize_status(status: StabilityStatus) -> StyledObject<&'static str> {
    match status {
        StabilityStatus::Stable => style(status.as_str()).green().bold(),
        StabilityStatus::Watch => style(status.as_str()).yellow(),
        StabilityStatus::Breach => style(status.as_str()).red().bold(),
    }
}

pub fn colorize_trend(trend: Trend) -> StyledObject<&'static str> {
    match trend {
        Trend::Improving => style(trend.as_str()).green(),
        Trend::Steady => style(trend.as_str()).dim(),
        Trend::Declining => style(trend.as_str()).red(),
    }
}

/// Fixed-width bar for a score in [0, 1].
pub fn score_bar(score: f64, width: usize) -> String {
    let filled = ((score.clamp(0.0, 1.0) * width as f64).round() as usize).min(width);
    format!("{}{}", "#".repeat(filled), ".".repeat(width - filled))
}
