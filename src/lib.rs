// src/lib.rs
//
// Reconciles an insurance-claim line-item estimate against a roofing price
// catalog and roof-geometry measurements, producing a corrected estimate
// with a field-level audit trail.

pub mod adjust;
pub mod audit;
pub mod catalog;
pub mod config;
pub mod estimate;
pub mod extract;
pub mod financial;
pub mod matcher;
pub mod reconcile;
pub mod rules;

pub use audit::{AuditAction, AuditEntry, AuditLog};
pub use catalog::{CatalogEntry, CatalogIndex};
pub use config::{EngineConfig, Rates};
pub use estimate::{LineItem, RoofMeasurements};
pub use extract::{Extraction, extract_line_items, extract_measurements};
pub use reconcile::merge;
pub use rules::{ChainRun, InputRequest, InvalidInput, RuleStep, StepInput, StepOutcome};
