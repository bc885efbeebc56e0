// src/reconcile.rs

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::estimate::LineItem;

/// Merge an original item set with an adjusted item set keyed by line
/// number.
///
/// Every original item appears exactly once in the output: superseded by
/// its adjusted version when one exists, otherwise unchanged. Adjusted
/// items whose line number never appeared in the originals are genuinely
/// new and are appended in their own insertion order. Nothing is silently
/// dropped — an adjusted set that omits originals (a rule engine returning
/// only its additions) still yields the full estimate.
pub fn merge(original: &[LineItem], adjusted: &[LineItem]) -> Vec<LineItem> {
    let by_line: HashMap<&str, &LineItem> = adjusted
        .iter()
        .map(|item| (item.line_number.as_str(), item))
        .collect();

    let original_lines: HashSet<&str> =
        original.iter().map(|item| item.line_number.as_str()).collect();

    let mut merged = Vec::with_capacity(original.len().max(adjusted.len()));
    for item in original {
        match by_line.get(item.line_number.as_str()) {
            Some(updated) => merged.push((*updated).clone()),
            None => merged.push(item.clone()),
        }
    }

    let mut appended: HashSet<&str> = HashSet::new();
    for item in adjusted {
        let line = item.line_number.as_str();
        if !original_lines.contains(line) && appended.insert(line) {
            merged.push(item.clone());
        }
    }

    debug!(
        original = original.len(),
        adjusted = adjusted.len(),
        merged = merged.len(),
        "item sets merged"
    );
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimate::LineItem;

    fn item(line: &str, desc: &str, qty: f64) -> LineItem {
        let mut it = LineItem {
            line_number: line.to_string(),
            description: desc.to_string(),
            quantity: qty,
            unit: "SQ".to_string(),
            unit_price: 10.0,
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

    fn lines(items: &[LineItem]) -> Vec<&str> {
        items.iter().map(|i| i.line_number.as_str()).collect()
    }

    #[test]
    fn adjusted_version_supersedes_original() {
        let original = vec![item("1", "Valley metal", 10.0), item("2", "Step flashing", 5.0)];
        let adjusted = vec![item("1", "Valley metal", 30.0)];

        let merged = merge(&original, &adjusted);
        assert_eq!(lines(&merged), vec!["1", "2"]);
        assert_eq!(merged[0].quantity, 30.0);
        assert_eq!(merged[1].quantity, 5.0);
    }

    #[test]
    fn additions_only_adjusted_set_drops_nothing() {
        let original = vec![item("1", "Valley metal", 10.0), item("2", "Step flashing", 5.0)];
        let adjusted = vec![item("3", "O&P", 1.0)];

        let merged = merge(&original, &adjusted);
        assert_eq!(lines(&merged), vec!["1", "2", "3"]);
        assert!(merged.len() >= original.len());
    }

    #[test]
    fn new_items_preserve_adjusted_insertion_order() {
        let original = vec![item("1", "Valley metal", 10.0)];
        let adjusted = vec![
            item("1", "Valley metal", 12.0),
            item("4", "Permit", 1.0),
            item("2", "Hidden damages", 1.0),
        ];

        let merged = merge(&original, &adjusted);
        assert_eq!(lines(&merged), vec!["1", "4", "2"]);
    }

    #[test]
    fn no_duplicate_line_numbers_after_merge() {
        let original = vec![item("1", "a", 1.0), item("2", "b", 1.0)];
        let adjusted = vec![item("2", "b", 2.0), item("3", "c", 1.0), item("3", "c", 1.0)];

        let merged = merge(&original, &adjusted);
        let mut seen = std::collections::HashSet::new();
        for line in lines(&merged) {
            assert!(seen.insert(line), "duplicate line number {line}");
        }
    }

    #[test]
    fn empty_adjusted_set_returns_originals() {
        let original = vec![item("1", "a", 1.0)];
        let merged = merge(&original, &[]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].description, "a");
    }
}
