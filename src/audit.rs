// src/audit.rs

use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Added,
    Updated,
    Replaced,
}

/// One recorded field change or item addition, with rule provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Line number of the affected or added item.
    pub line_number: String,
    /// Name of the changed attribute, or `"item"` for additions.
    pub field: String,
    pub before: Option<String>,
    pub after: String,
    /// Identifier of the rule-chain step (or manual operation) responsible.
    pub rule_applied: String,
    pub explanation: String,
    pub action: AuditAction,
}

/// Append-only audit trail for one reconciliation run.
///
/// Every mutation records exactly one entry before it is considered
/// complete; an item accumulates entries over its lifetime and they come
/// back in insertion order.
#[derive(Debug, Default, Clone, Serialize)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    pub fn record(&mut self, entry: AuditEntry) {
        info!(
            line = %entry.line_number,
            field = %entry.field,
            rule = %entry.rule_applied,
            action = ?entry.action,
            "audit entry recorded"
        );
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn entries_for(&self, line_number: &str) -> Vec<&AuditEntry> {
        self.entries
            .iter()
            .filter(|e| e.line_number == line_number)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(line: &str, field: &str, rule: &str, action: AuditAction) -> AuditEntry {
        AuditEntry {
            line_number: line.to_string(),
            field: field.to_string(),
            before: None,
            after: "x".to_string(),
            rule_applied: rule.to_string(),
            explanation: "test".to_string(),
            action,
        }
    }

    #[test]
    fn entries_accumulate_in_insertion_order() {
        let mut log = AuditLog::default();
        log.record(entry("9", "item", "ridge_vent", AuditAction::Added));
        log.record(entry("3", "quantity", "quantity_alignment", AuditAction::Updated));
        log.record(entry("9", "unit_price", "manual_price_edit", AuditAction::Updated));

        let for_nine = log.entries_for("9");
        assert_eq!(for_nine.len(), 2);
        assert_eq!(for_nine[0].field, "item");
        assert_eq!(for_nine[1].field, "unit_price");
        assert_eq!(log.len(), 3);
    }
}
