// src/catalog.rs

use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Priced reference entry for one standard line-item description.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub unit: String,
    pub unit_price: f64,
}

/// In-memory price catalog keyed by normalized description.
///
/// Built once from the tabular price list; later duplicate descriptions
/// overwrite earlier ones (table overlay semantics).
#[derive(Debug, Default)]
pub struct CatalogIndex {
    entries: HashMap<String, CatalogEntry>,
}

fn strip_quotes(field: &str) -> &str {
    let trimmed = field.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
}

/// Parse a price field that may carry a currency symbol and thousands
/// separators, e.g. `"$1,234.50"`.
fn parse_price(raw: &str) -> Option<f64> {
    strip_quotes(raw)
        .trim_start_matches('$')
        .replace(',', "")
        .trim()
        .parse()
        .ok()
}

impl CatalogIndex {
    /// Build the index from a textual table: one ignored header line, then
    /// comma-delimited `description, unit, price` rows where any field may
    /// be double-quote-wrapped. Rows with a blank description or an
    /// unparsable price are skipped with a warning.
    pub fn parse(table: &str) -> Self {
        let mut entries = HashMap::new();
        let mut skipped = 0usize;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(table.as_bytes());

        for (row, record) in reader.records().enumerate() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    warn!(row = row + 2, error = %e, "unreadable catalog row skipped");
                    skipped += 1;
                    continue;
                }
            };

            let description = strip_quotes(record.get(0).unwrap_or("")).to_string();
            let unit = strip_quotes(record.get(1).unwrap_or("")).to_uppercase();
            let price = record.get(2).and_then(parse_price);

            match price {
                Some(unit_price) if !description.is_empty() => {
                    entries.insert(description, CatalogEntry { unit, unit_price });
                }
                _ => {
                    warn!(row = row + 2, description = %description, "invalid catalog row skipped");
                    skipped += 1;
                }
            }
        }

        info!(entries = entries.len(), skipped, "catalog index built");
        Self { entries }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    /// Exact lookup on the normalized (trimmed, quote-stripped) description.
    pub fn lookup(&self, description: &str) -> Option<&CatalogEntry> {
        self.entries.get(strip_quotes(description))
    }

    /// Lookup with the matcher's softer tiers layered on: exact, then
    /// case-insensitive equality, then substring containment in either
    /// direction. Returns the catalog's own description alongside the entry.
    pub fn resolve(&self, description: &str) -> Option<(&str, &CatalogEntry)> {
        let wanted = strip_quotes(description);
        if let Some((key, entry)) = self.entries.get_key_value(wanted) {
            return Some((key.as_str(), entry));
        }

        let wanted_lower = wanted.to_lowercase();
        if let Some((key, entry)) = self
            .entries
            .iter()
            .find(|(key, _)| key.to_lowercase() == wanted_lower)
        {
            return Some((key.as_str(), entry));
        }

        self.entries
            .iter()
            .find(|(key, _)| {
                let key_lower = key.to_lowercase();
                key_lower.contains(&wanted_lower) || wanted_lower.contains(&key_lower)
            })
            .map(|(key, entry)| (key.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CatalogEntry)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
Description,Unit,Unit Price
\"Remove Laminated - comp. shingle rfg. - w/out felt\",SQ,$62.74
\"Laminated - comp. shingle rfg. - w/out felt\",SQ,\"$259.07\"
\"Continuous ridge vent - shingle-over style\",LF,\"$10.50\"
\"Saddle or cricket - up to 25 SF\",EA,\"$1,014.00\"
\"Saddle or cricket - 26 to 50 SF\",EA,\"$1,382.00\"
Valley metal,LF,6.21
R&R Valley metal,LF,7.02
Bad price row,SQ,not-a-number
,SQ,10.00
";

    #[test]
    fn parses_quoted_rows_and_skips_invalid() {
        let index = CatalogIndex::parse(TABLE);
        assert_eq!(index.len(), 7);

        let entry = index
            .lookup("Saddle or cricket - up to 25 SF")
            .expect("cricket entry");
        assert_eq!(entry.unit, "EA");
        assert_eq!(entry.unit_price, 1014.0);

        assert!(index.lookup("Bad price row").is_none());
    }

    #[test]
    fn round_trips_every_retained_row() {
        let index = CatalogIndex::parse(TABLE);
        for (description, entry) in index.iter() {
            let found = index.lookup(description).expect("row must round-trip");
            assert_eq!(found, entry);
        }
    }

    #[test]
    fn last_duplicate_wins() {
        let table = "Description,Unit,Unit Price\nValley metal,LF,1.00\nValley metal,LF,2.00\n";
        let index = CatalogIndex::parse(table);
        assert_eq!(index.len(), 1);
        assert_eq!(index.lookup("Valley metal").unwrap().unit_price, 2.0);
    }

    #[test]
    fn resolve_is_case_insensitive_then_contains() {
        let index = CatalogIndex::parse(TABLE);
        let (key, _) = index.resolve("valley METAL").expect("ci match");
        assert_eq!(key, "Valley metal");

        let (key, entry) = index
            .resolve("Continuous ridge vent")
            .expect("containment match");
        assert_eq!(key, "Continuous ridge vent - shingle-over style");
        assert_eq!(entry.unit_price, 10.5);
    }
}
