// src/matcher.rs
//
// Free-text item descriptions drift between carrier estimates, upstream
// extraction output, and the catalog. Matching runs in tiers: exact string
// equality, case-insensitive equality, then a keyword heuristic permissive
// enough to absorb wording drift without crossing categories.

use crate::catalog::{CatalogEntry, CatalogIndex};
use crate::estimate::LineItem;

/// Catalog wordings for the four shingle removal variants.
pub const SHINGLE_REMOVAL_OPTIONS: [&str; 4] = [
    "Remove Laminated - comp. shingle rfg. - w/out felt",
    "Remove 3 tab - 25 yr. - comp. shingle roofing - w/out felt",
    "Remove 3 tab - 25 yr. - composition shingle roofing - incl. felt",
    "Remove Laminated - comp. shingle rfg. - w/ felt",
];

/// Catalog wordings for the four shingle installation variants.
pub const SHINGLE_INSTALLATION_OPTIONS: [&str; 4] = [
    "Laminated - comp. shingle rfg. - w/out felt",
    "3 tab - 25 yr. - comp. shingle roofing - w/out felt",
    "3 tab - 25 yr. - composition shingle roofing - incl. felt",
    "Laminated - comp. shingle rfg. - w/ felt",
];

pub const RIDGE_VENT_OPTIONS: [&str; 2] = [
    "Continuous ridge vent - shingle-over style",
    "Continuous ridge vent - aluminum",
];

pub const CHIMNEY_FLASHING_SMALL: &str = "Chimney flashing - small (24\" x 24\")";
pub const CHIMNEY_FLASHING_AVERAGE: &str = "Chimney flashing - average (32\" x 36\")";
pub const CHIMNEY_FLASHING_LARGE: &str = "Chimney flashing - large (32\" x 60\")";

pub const CRICKET_UP_TO_25: &str = "Saddle or cricket - up to 25 SF";
pub const CRICKET_26_TO_50: &str = "Saddle or cricket - 26 to 50 SF";

/// Shingle material families the keyword heuristic can distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Material {
    Laminated,
    ThreeTab,
}

fn material_class(lower: &str) -> Option<Material> {
    if lower.contains("laminated") && lower.contains("comp") {
        Some(Material::Laminated)
    } else if lower.contains("3 tab") && lower.contains("25 yr") && lower.contains("comp") {
        Some(Material::ThreeTab)
    } else {
        None
    }
}

/// Keyword tier: both sides must be shingle items, agree on the presence or
/// absence of the "remove" action word, and share a material family. Felt
/// wording is intentionally not consulted, so felt-inclusive variants match
/// their category.
fn keyword_match(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    if !a.contains("shingle") || !b.contains("shingle") {
        return false;
    }
    if a.contains("remove") != b.contains("remove") {
        return false;
    }
    match (material_class(&a), material_class(&b)) {
        (Some(ma), Some(mb)) => ma == mb,
        _ => false,
    }
}

/// Does a free-text description satisfy any member of a required item set?
/// Tiers applied in order: exact, case-insensitive, keyword heuristic.
pub fn matches(description: &str, required_set: &[&str]) -> bool {
    let trimmed = description.trim();
    if required_set.iter().any(|r| *r == trimmed) {
        return true;
    }
    let lower = trimmed.to_lowercase();
    if required_set.iter().any(|r| r.to_lowercase() == lower) {
        return true;
    }
    required_set.iter().any(|r| keyword_match(trimmed, r))
}

pub fn is_shingle_removal(description: &str) -> bool {
    matches(description, &SHINGLE_REMOVAL_OPTIONS)
}

pub fn is_shingle_installation(description: &str) -> bool {
    matches(description, &SHINGLE_INSTALLATION_OPTIONS)
}

pub fn is_ridge_vent(description: &str) -> bool {
    matches(description, &RIDGE_VENT_OPTIONS)
        || description.to_lowercase().contains("continuous ridge vent")
}

pub fn is_chimney_flashing(description: &str) -> bool {
    description.to_lowercase().contains("chimney flashing")
}

pub fn is_cricket(description: &str) -> bool {
    let lower = description.to_lowercase();
    lower.contains("saddle") || lower.contains("cricket")
}

pub fn is_permit(description: &str) -> bool {
    description.to_lowercase().contains("permit")
}

/// O&P-denoting descriptions: the "O&P" shorthand, or both words spelled out.
pub fn is_overhead_and_profit(description: &str) -> bool {
    let lower = description.to_lowercase();
    lower.contains("o&p") || (lower.contains("overhead") && lower.contains("profit"))
}

/// True when any item in the estimate satisfies the predicate.
pub fn any_item(items: &[LineItem], pred: fn(&str) -> bool) -> bool {
    items.iter().any(|i| pred(&i.description))
}

/// Resolve a free-text item description to at most one priced catalog
/// entry, using the catalog's exact / case-insensitive / containment tiers.
pub fn resolve_catalog<'a>(
    catalog: &'a CatalogIndex,
    description: &str,
) -> Option<&'a CatalogEntry> {
    catalog.resolve(description).map(|(_, entry)| entry)
}
