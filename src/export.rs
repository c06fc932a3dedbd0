//! CSV export of the category hierarchy.
//!
//! One row per category in display order, with the depth and the same
//! indented label the category picker shows.

use crate::tree::{indent_label, Forest};
use anyhow::{Context, Result};
use chrono::NaiveDate;

const HEADERS: [&str; 7] = [
    "id",
    "name",
    "parent_id",
    "depth",
    "product_count",
    "slug",
    "label",
];

/// Render the forest as CSV. Every field is quoted.
pub fn forest_to_csv(forest: &Forest, glyph: &str) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(Vec::new());

    writer
        .write_record(HEADERS)
        .context("Failed to write CSV headers")?;

    for (depth, node) in forest.iter() {
        let record = &node.record;
        let depth_field = depth.to_string();
        let count_field = record.product_count.to_string();
        let label = indent_label(depth, &record.name, glyph);
        writer
            .write_record([
                record.id.as_str(),
                record.name.as_str(),
                record.parent_id.as_deref().unwrap_or(""),
                depth_field.as_str(),
                count_field.as_str(),
                record.slug.as_deref().unwrap_or(""),
                label.as_str(),
            ])
            .with_context(|| format!("Failed to write CSV row for category {}", record.id))?;
    }

    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV: {}", e.error()))
}

/// `{stem}_{YYYY-MM-DD}.csv`
pub fn export_filename(stem: &str, date: NaiveDate) -> String {
    format!("{}_{}.csv", stem, date.format("%Y-%m-%d"))
}
