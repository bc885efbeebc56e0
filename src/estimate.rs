// src/estimate.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::financial;

/// One priced row of an insurance estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub line_number: String,
    pub description: String,
    pub quantity: f64,
    pub unit: String,
    pub unit_price: f64,
    #[serde(rename = "RCV")]
    pub rcv: f64,
    #[serde(default)]
    pub age_life: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    /// Depreciation percentage as a whole number (25 means 25%).
    #[serde(default)]
    pub dep_percent: f64,
    #[serde(default)]
    pub depreciation_amount: f64,
    #[serde(rename = "ACV")]
    pub acv: f64,
    #[serde(default)]
    pub location_room: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub page_number: u32,
    /// Free-text explanation attached directly to the item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
    /// Set when a human added this item while a specific rule step was active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_by_rule: Option<String>,
}

impl LineItem {
    /// Recompute RCV, depreciation amount, and ACV from the current
    /// quantity, unit price, and depreciation percentage.
    pub fn recompute_costs(&mut self) {
        self.rcv = financial::rcv(self.quantity, self.unit_price);
        self.depreciation_amount = financial::depreciation(self.rcv, self.dep_percent);
        self.acv = financial::acv(self.rcv, self.depreciation_amount);
    }
}

/// Next free line number: max of the existing numeric line numbers plus one.
pub fn next_line_number(items: &[LineItem]) -> String {
    let max = items
        .iter()
        .filter_map(|i| i.line_number.trim().parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    (max + 1).to_string()
}

/// Highest page number seen so far; new items land on the last page.
pub fn max_page_number(items: &[LineItem]) -> u32 {
    items.iter().map(|i| i.page_number).max().unwrap_or(1).max(1)
}

/// Find an item by exact description, ignoring surrounding whitespace.
pub fn find_item<'a>(items: &'a [LineItem], description: &str) -> Option<&'a LineItem> {
    items
        .iter()
        .find(|i| i.description.trim() == description.trim())
}

pub fn find_item_mut<'a>(items: &'a mut [LineItem], description: &str) -> Option<&'a mut LineItem> {
    items
        .iter_mut()
        .find(|i| i.description.trim() == description.trim())
}

// Measurement names as they appear in the upstream roof reports.
pub const TOTAL_ROOF_AREA: &str = "Total Roof Area";
pub const TOTAL_EAVES_LENGTH: &str = "Total Eaves Length";
pub const TOTAL_RAKES_LENGTH: &str = "Total Rakes Length";
pub const TOTAL_RIDGES_HIPS_LENGTH: &str = "Total Ridges/Hips Length";
pub const TOTAL_LINE_LENGTHS_RIDGES: &str = "Total Line Lengths (Ridges)";
pub const TOTAL_VALLEYS_LENGTH: &str = "Total Valleys Length";

/// Named geometric quantities for one roof, normalized to plain numbers.
///
/// Upstream reports mix bare numbers and `{"value": n}` wrappers; the
/// extractor flattens both forms before anything here sees them. Missing
/// names read as zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoofMeasurements {
    #[serde(flatten)]
    values: BTreeMap<String, f64>,
}

impl RoofMeasurements {
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> f64 {
        self.values.get(name).copied().unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn total_roof_area(&self) -> f64 {
        self.get(TOTAL_ROOF_AREA)
    }

    pub fn eaves_length(&self) -> f64 {
        self.get(TOTAL_EAVES_LENGTH)
    }

    pub fn rakes_length(&self) -> f64 {
        self.get(TOTAL_RAKES_LENGTH)
    }

    /// Combined ridge/hip length, falling back to the ridges-only line
    /// lengths when the combined field is absent from the report.
    pub fn ridge_length(&self) -> f64 {
        let combined = self.get(TOTAL_RIDGES_HIPS_LENGTH);
        if combined > 0.0 {
            combined
        } else {
            self.get(TOTAL_LINE_LENGTHS_RIDGES)
        }
    }

    pub fn valleys_length(&self) -> f64 {
        self.get(TOTAL_VALLEYS_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(line: &str, desc: &str, qty: f64, price: f64) -> LineItem {
        let mut it = LineItem {
            line_number: line.to_string(),
            description: desc.to_string(),
            quantity: qty,
            unit: "SQ".to_string(),
            unit_price: price,
            rcv: 0.0,
            age_life: None,
            condition: None,
            dep_percent: 0.0,
            depreciation_amount: 0.0,
            acv: 0.0,
            location_room: None,
            category: None,
            page_number: 1,
            narrative: None,
            added_by_rule: None,
        };
        it.recompute_costs();
        it
    }

    #[test]
    fn recompute_keeps_rcv_invariant() {
        let mut it = item("1", "Roofing felt - 15 lb.", 12.5, 40.0);
        assert_eq!(it.rcv, 500.0);
        assert_eq!(it.acv, 500.0);

        it.dep_percent = 10.0;
        it.recompute_costs();
        assert_eq!(it.depreciation_amount, 50.0);
        assert_eq!(it.acv, 450.0);
    }

    #[test]
    fn next_line_number_ignores_non_numeric() {
        let items = vec![
            item("1", "a", 1.0, 1.0),
            item("7", "b", 1.0, 1.0),
            item("N/A", "c", 1.0, 1.0),
        ];
        assert_eq!(next_line_number(&items), "8");
        assert_eq!(next_line_number(&[]), "1");
    }

    #[test]
    fn ridge_length_falls_back_to_line_lengths() {
        let mut m = RoofMeasurements::default();
        m.insert(TOTAL_LINE_LENGTHS_RIDGES, 250.0);
        assert_eq!(m.ridge_length(), 250.0);

        m.insert(TOTAL_RIDGES_HIPS_LENGTH, 310.0);
        assert_eq!(m.ridge_length(), 310.0);
    }

    #[test]
    fn missing_measurement_reads_zero() {
        let m = RoofMeasurements::default();
        assert_eq!(m.total_roof_area(), 0.0);
    }
}
