// src/adjust.rs
//
// Audited mutations that run outside the rule chain: quantity alignment
// against measured roof geometry, carrier-wording replacement against the
// catalog, and manual price/quantity edits.

use thiserror::Error;
use tracing::{info, warn};

use crate::audit::{AuditAction, AuditEntry, AuditLog};
use crate::catalog::CatalogIndex;
use crate::estimate::{LineItem, RoofMeasurements, find_item_mut};
use crate::matcher::{SHINGLE_INSTALLATION_OPTIONS, SHINGLE_REMOVAL_OPTIONS};

pub const RULE_QUANTITY_ALIGNMENT: &str = "quantity_alignment";
pub const RULE_QUANTITY_ROUNDING: &str = "quantity_rounding";
pub const RULE_CARRIER_REPLACEMENT: &str = "carrier_replacement";
pub const RULE_MANUAL_PRICE_EDIT: &str = "manual_price_edit";
pub const RULE_MANUAL_QUANTITY_EDIT: &str = "manual_quantity_edit";

fn is_multiple_of(value: f64, step: f64) -> bool {
    let ratio = value / step;
    (ratio - ratio.round()).abs() < 1e-5
}

fn record_quantity_change(
    audit: &mut AuditLog,
    item: &LineItem,
    before: f64,
    rule: &str,
    explanation: String,
) {
    audit.record(AuditEntry {
        line_number: item.line_number.clone(),
        field: "quantity".to_string(),
        before: Some(before.to_string()),
        after: item.quantity.to_string(),
        rule_applied: rule.to_string(),
        explanation,
        action: AuditAction::Updated,
    });
}

/// Raise shingle removal/installation quantities to the measured roof
/// squares and apply the per-material rounding conventions. Returns the
/// number of quantity changes made.
///
/// Skipped entirely when the measured area is zero, which usually means the
/// roof report failed to load.
pub fn align_shingle_quantities(
    items: &mut [LineItem],
    measurements: &RoofMeasurements,
    audit: &mut AuditLog,
) -> usize {
    let total_squares = measurements.total_roof_area() / 100.0;
    if total_squares <= 0.0 {
        warn!("total roof area is 0 - skipping shingle quantity alignment");
        return 0;
    }

    let mut changes = 0usize;

    for desc in SHINGLE_REMOVAL_OPTIONS.iter().chain(&SHINGLE_INSTALLATION_OPTIONS) {
        let Some(item) = find_item_mut(items, desc) else {
            continue;
        };
        if item.quantity < total_squares && (total_squares - item.quantity).abs() > 1e-9 {
            let before = item.quantity;
            item.quantity = total_squares;
            item.recompute_costs();
            record_quantity_change(
                audit,
                item,
                before,
                RULE_QUANTITY_ALIGNMENT,
                format!(
                    "Quantity should equal Total Roof Area / 100 ({total_squares:.2})"
                ),
            );
            changes += 1;
        }
    }

    // Laminated shingles sell in quarter-square bundles.
    let laminated = [
        SHINGLE_REMOVAL_OPTIONS[0],
        SHINGLE_REMOVAL_OPTIONS[3],
        SHINGLE_INSTALLATION_OPTIONS[0],
        SHINGLE_INSTALLATION_OPTIONS[3],
    ];
    for desc in laminated {
        let Some(item) = find_item_mut(items, desc) else {
            continue;
        };
        if !is_multiple_of(item.quantity, 0.25) {
            let before = item.quantity;
            item.quantity = (item.quantity * 4.0).ceil() / 4.0;
            item.recompute_costs();
            record_quantity_change(
                audit,
                item,
                before,
                RULE_QUANTITY_ROUNDING,
                "Laminated shingles round up to the nearest 0.25".to_string(),
            );
            changes += 1;
        }
    }

    // 3-tab shingles sell in thirds; tolerate the .33/.67 decimal convention.
    let three_tab = [
        SHINGLE_REMOVAL_OPTIONS[1],
        SHINGLE_REMOVAL_OPTIONS[2],
        SHINGLE_INSTALLATION_OPTIONS[1],
        SHINGLE_INSTALLATION_OPTIONS[2],
    ];
    for desc in three_tab {
        let Some(item) = find_item_mut(items, desc) else {
            continue;
        };
        let frac = item.quantity - item.quantity.floor();
        let on_third =
            frac.abs() < 1e-5 || (frac - 0.33).abs() <= 0.01 || (frac - 0.67).abs() <= 0.01;
        if !on_third {
            let before = item.quantity;
            item.quantity = (item.quantity * 3.0).ceil() / 3.0;
            item.recompute_costs();
            record_quantity_change(
                audit,
                item,
                before,
                RULE_QUANTITY_ROUNDING,
                "3-tab shingles round up to the nearest 1/3".to_string(),
            );
            changes += 1;
        }
    }

    info!(changes, total_squares, "shingle quantity alignment complete");
    changes
}

// Carrier estimates word detach/reset and install work their own way; the
// catalog prices the combined R&R (or bare) wording.
const CARRIER_REPLACEMENTS: &[(&[&str], &str)] = &[
    (
        &[
            "Detach & Reset Continuous ridge vent - shingle-over",
            "Install Continuous ridge vent - shingle-over style",
        ],
        "R&R Continuous ridge vent - shingle-over style",
    ),
    (
        &[
            "Detach & Reset Continuous ridge vent - aluminum",
            "Install Continuous ridge vent - aluminum",
        ],
        "R&R Continuous ridge vent - aluminum",
    ),
    (
        &[
            "Detach & Reset Roof vent - turtle type - Plastic",
            "Install Roof vent - turtle type - Plastic",
        ],
        "R&R Roof vent - turtle type - Plastic",
    ),
    (
        &[
            "Detach & Reset Roof vent - turtle type - Metal",
            "Install Roof vent - turtle type - Metal",
        ],
        "R&R Roof vent - turtle type - Metal",
    ),
    (&["Install Valley metal - (W) profile"], "R&R Valley metal - (W) profile"),
    (&["Install Valley metal"], "R&R Valley metal"),
    (&["Install Step flashing"], "Step flashing"),
    (
        &["Install Aluminum sidewall/endwall flashing - mill"],
        "Aluminum sidewall/endwall flashing - mill finish",
    ),
    (
        &["Install Chimney flashing - small (24\" x 24\")"],
        "R&R Chimney flashing - small (24\" x 24\")",
    ),
    (
        &["Install Chimney flashing - average (32\" x 36\")"],
        "R&R Chimney flashing - average (32\" x 36\")",
    ),
    (
        &["Install Chimney flashing - large (32\" x 60\")"],
        "R&R Chimney flashing - large (32\" x 60\")",
    ),
    (&["Install Saddle or cricket - up to 25 SF"], "Saddle or cricket - up to 25 SF"),
    (&["Install Saddle or cricket - 26 to 50 SF"], "Saddle or cricket - 26 to 50 SF"),
    (&["Install Drip edge/gutter apron"], "R&R Drip edge/gutter apron"),
    (&["Install Drip edge"], "R&R Drip edge"),
];

/// Replace carrier-worded items with the catalog's canonical descriptions,
/// re-pricing from the catalog. Only fires when the catalog resolves the
/// canonical wording to a positive price. Returns the replacement count.
pub fn replace_carrier_items(
    items: &mut [LineItem],
    catalog: &CatalogIndex,
    audit: &mut AuditLog,
) -> usize {
    let mut replaced = 0usize;

    for (patterns, canonical) in CARRIER_REPLACEMENTS {
        for pattern in *patterns {
            let found = items.iter_mut().find(|item| {
                let desc = item.description.trim();
                desc != *canonical && desc.contains(pattern)
            });
            let Some(item) = found else {
                continue;
            };
            let Some((_, entry)) = catalog.resolve(canonical) else {
                continue;
            };
            if entry.unit_price <= 0.0 {
                continue;
            }

            let old_desc = item.description.clone();
            let old_price = item.unit_price;
            item.description = canonical.to_string();
            item.unit = entry.unit.clone();
            item.unit_price = entry.unit_price;
            item.recompute_costs();

            audit.record(AuditEntry {
                line_number: item.line_number.clone(),
                field: "description".to_string(),
                before: Some(old_desc),
                after: canonical.to_string(),
                rule_applied: RULE_CARRIER_REPLACEMENT.to_string(),
                explanation: format!(
                    "Replaced carrier item with catalog item; unit price {old_price:.2} -> {:.2}",
                    entry.unit_price
                ),
                action: AuditAction::Replaced,
            });
            replaced += 1;
        }
    }

    info!(replaced, "carrier item replacement complete");
    replaced
}

#[derive(Debug, Error, PartialEq)]
pub enum EditError {
    #[error("no line item numbered {0}")]
    UnknownLineNumber(String),
    #[error("value must be positive")]
    NonPositiveValue,
    #[error("a justification is required")]
    MissingJustification,
}

fn edited_item<'a>(
    items: &'a mut [LineItem],
    line_number: &str,
    value: f64,
    justification: &str,
) -> Result<&'a mut LineItem, EditError> {
    if !(value > 0.0) {
        return Err(EditError::NonPositiveValue);
    }
    if justification.trim().is_empty() {
        return Err(EditError::MissingJustification);
    }
    items
        .iter_mut()
        .find(|i| i.line_number == line_number)
        .ok_or_else(|| EditError::UnknownLineNumber(line_number.to_string()))
}

/// Manual unit-price override with mandatory justification.
pub fn apply_price_edit(
    items: &mut [LineItem],
    audit: &mut AuditLog,
    line_number: &str,
    new_unit_price: f64,
    justification: &str,
) -> Result<(), EditError> {
    let item = edited_item(items, line_number, new_unit_price, justification)?;
    let before = item.unit_price;
    item.unit_price = new_unit_price;
    item.recompute_costs();
    audit.record(AuditEntry {
        line_number: item.line_number.clone(),
        field: "unit_price".to_string(),
        before: Some(before.to_string()),
        after: new_unit_price.to_string(),
        rule_applied: RULE_MANUAL_PRICE_EDIT.to_string(),
        explanation: justification.trim().to_string(),
        action: AuditAction::Updated,
    });
    Ok(())
}

/// Manual quantity override with mandatory justification.
pub fn apply_quantity_edit(
    items: &mut [LineItem],
    audit: &mut AuditLog,
    line_number: &str,
    new_quantity: f64,
    justification: &str,
) -> Result<(), EditError> {
    let item = edited_item(items, line_number, new_quantity, justification)?;
    let before = item.quantity;
    item.quantity = new_quantity;
    item.recompute_costs();
    audit.record(AuditEntry {
        line_number: item.line_number.clone(),
        field: "quantity".to_string(),
        before: Some(before.to_string()),
        after: new_quantity.to_string(),
        rule_applied: RULE_MANUAL_QUANTITY_EDIT.to_string(),
        explanation: justification.trim().to_string(),
        action: AuditAction::Updated,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimate::{LineItem, RoofMeasurements, TOTAL_ROOF_AREA};

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

    fn measurements(area: f64) -> RoofMeasurements {
        let mut m = RoofMeasurements::default();
        m.insert(TOTAL_ROOF_AREA, area);
        m
    }

    #[test]
    fn alignment_raises_low_quantities_and_rounds() {
        let mut items = vec![item(
            "1",
            "Remove Laminated - comp. shingle rfg. - w/out felt",
            18.0,
            62.74,
        )];
        let mut audit = AuditLog::default();

        // 2510 sq ft -> 25.1 squares -> raised then rounded up to 25.25.
        let changes = align_shingle_quantities(&mut items, &measurements(2510.0), &mut audit);
        assert_eq!(changes, 2);
        assert_eq!(items[0].quantity, 25.25);
        assert_eq!(items[0].rcv, crate::financial::rcv(25.25, 62.74));
        assert_eq!(audit.entries_for("1").len(), 2);
    }

    #[test]
    fn alignment_skips_when_area_missing() {
        let mut items = vec![item(
            "1",
            "Remove Laminated - comp. shingle rfg. - w/out felt",
            18.0,
            62.74,
        )];
        let mut audit = AuditLog::default();
        assert_eq!(
            align_shingle_quantities(&mut items, &measurements(0.0), &mut audit),
            0
        );
        assert_eq!(items[0].quantity, 18.0);
        assert!(audit.is_empty());
    }

    #[test]
    fn three_tab_decimal_convention_is_tolerated() {
        let mut items = vec![item(
            "1",
            "3 tab - 25 yr. - comp. shingle roofing - w/out felt",
            25.33,
            180.0,
        )];
        let mut audit = AuditLog::default();
        align_shingle_quantities(&mut items, &measurements(2500.0), &mut audit);
        // Already above 25.0 squares and on a .33 boundary: untouched.
        assert_eq!(items[0].quantity, 25.33);
        assert!(audit.is_empty());
    }

    #[test]
    fn carrier_items_replace_and_reprice() {
        let catalog = CatalogIndex::parse(
            "Description,Unit,Unit Price\nR&R Valley metal,LF,7.02\nStep flashing,LF,9.10\n",
        );
        let mut items = vec![
            item("1", "Install Valley metal", 30.0, 5.0),
            item("2", "Install Step flashing", 12.0, 4.0),
        ];
        let mut audit = AuditLog::default();

        let replaced = replace_carrier_items(&mut items, &catalog, &mut audit);
        assert_eq!(replaced, 2);
        assert_eq!(items[0].description, "R&R Valley metal");
        assert_eq!(items[0].unit_price, 7.02);
        assert_eq!(items[0].rcv, crate::financial::rcv(30.0, 7.02));
        assert_eq!(items[1].description, "Step flashing");
        assert_eq!(audit.entries()[0].action, AuditAction::Replaced);
    }

    #[test]
    fn replacement_needs_a_priced_catalog_entry() {
        let catalog = CatalogIndex::parse("Description,Unit,Unit Price\n");
        let mut items = vec![item("1", "Install Valley metal", 30.0, 5.0)];
        let mut audit = AuditLog::default();
        assert_eq!(replace_carrier_items(&mut items, &catalog, &mut audit), 0);
        assert_eq!(items[0].description, "Install Valley metal");
    }

    #[test]
    fn price_edit_requires_justification_and_recomputes() {
        let mut items = vec![item("1", "Valley metal", 30.0, 5.0)];
        let mut audit = AuditLog::default();

        assert_eq!(
            apply_price_edit(&mut items, &mut audit, "1", 6.5, "  "),
            Err(EditError::MissingJustification)
        );
        assert_eq!(
            apply_price_edit(&mut items, &mut audit, "1", 0.0, "market rate"),
            Err(EditError::NonPositiveValue)
        );
        assert_eq!(
            apply_price_edit(&mut items, &mut audit, "9", 6.5, "market rate"),
            Err(EditError::UnknownLineNumber("9".to_string()))
        );
        assert!(audit.is_empty());

        apply_price_edit(&mut items, &mut audit, "1", 6.5, "regional supplier quote").unwrap();
        assert_eq!(items[0].unit_price, 6.5);
        assert_eq!(items[0].rcv, 195.0);
        let entries = audit.entries_for("1");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].explanation, "regional supplier quote");
    }

    #[test]
    fn quantity_edit_keeps_rcv_invariant() {
        let mut items = vec![item("1", "Valley metal", 30.0, 5.0)];
        let mut audit = AuditLog::default();
        apply_quantity_edit(&mut items, &mut audit, "1", 33.0, "re-measured on site").unwrap();
        assert_eq!(items[0].quantity, 33.0);
        assert_eq!(items[0].rcv, 165.0);
    }
}
