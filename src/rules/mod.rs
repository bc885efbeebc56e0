// src/rules/mod.rs
//
// The reconciliation rule chain: a finite sequence of named checks over the
// working item set and roof measurements. The original workflow ran as
// nested UI callbacks; here it is an explicit state machine — one tagged
// step enum, one transition function per step, the working items and audit
// log threaded as owned values.

mod steps;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::audit::AuditLog;
use crate::catalog::CatalogIndex;
use crate::config::Rates;
use crate::estimate::{LineItem, RoofMeasurements};

/// Named steps of the chain, executed strictly in order. Steps never
/// revisit earlier steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStep {
    ShingleRemoval,
    InstallationShingles,
    SpcAddedItemsCheck,
    RidgeVent,
    ChimneyFlashing,
    AdditionalLayers,
    Permit,
    HiddenDamages,
    RoofAccess,
    OverheadAndProfit,
    Done,
}

impl RuleStep {
    pub fn id(self) -> &'static str {
        match self {
            RuleStep::ShingleRemoval => "shingle_removal",
            RuleStep::InstallationShingles => "installation_shingles",
            RuleStep::SpcAddedItemsCheck => "spc_added_items_check",
            RuleStep::RidgeVent => "ridge_vent",
            RuleStep::ChimneyFlashing => "chimney_flashing",
            RuleStep::AdditionalLayers => "additional_layers",
            RuleStep::Permit => "permit",
            RuleStep::HiddenDamages => "hidden_damages",
            RuleStep::RoofAccess => "roof_access",
            RuleStep::OverheadAndProfit => "overhead_and_profit",
            RuleStep::Done => "done",
        }
    }

    fn next(self) -> RuleStep {
        match self {
            RuleStep::ShingleRemoval => RuleStep::InstallationShingles,
            RuleStep::InstallationShingles => RuleStep::SpcAddedItemsCheck,
            RuleStep::SpcAddedItemsCheck => RuleStep::RidgeVent,
            RuleStep::RidgeVent => RuleStep::ChimneyFlashing,
            RuleStep::ChimneyFlashing => RuleStep::AdditionalLayers,
            RuleStep::AdditionalLayers => RuleStep::Permit,
            RuleStep::Permit => RuleStep::HiddenDamages,
            RuleStep::HiddenDamages => RuleStep::RoofAccess,
            RuleStep::RoofAccess => RuleStep::OverheadAndProfit,
            RuleStep::OverheadAndProfit => RuleStep::Done,
            RuleStep::Done => RuleStep::Done,
        }
    }
}

/// Shape of one field the human-decision collaborator must supply.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Bool,
    Number,
    Integer,
    Text,
    Choice { options: Vec<String> },
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldSpec {
    pub id: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
}

/// A suspended step's request to the human-decision collaborator: which
/// step, what to ask, and the schema of the answer.
#[derive(Debug, Clone, Serialize)]
pub struct InputRequest {
    pub step: RuleStep,
    pub prompt: String,
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChimneySize {
    Small,
    Average,
    Large,
    Custom { length: f64, width: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    ThreeTab,
    Laminated,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerCoverage {
    EntireRoof,
    Squares(f64),
}

/// One resumption supplied by the caller for the currently suspended step.
/// `Skipped` is a legal resumption for every step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepInput {
    Confirmed,
    Skipped,
    ShingleSelection {
        description: String,
        quantity: f64,
    },
    RidgeVentSelection {
        description: String,
        quantity: f64,
    },
    Chimney {
        present: bool,
        #[serde(default)]
        size: Option<ChimneySize>,
    },
    AdditionalLayers {
        present: bool,
        #[serde(default)]
        layer_kind: Option<LayerKind>,
        #[serde(default)]
        coverage: Option<LayerCoverage>,
    },
    PermitCost {
        cost: f64,
    },
    HiddenDamages {
        cost: f64,
        narrative: String,
    },
    RoofAccess {
        issues_confirmed: bool,
        delivery_blocked: bool,
        stories: u32,
    },
}

/// Rejections at the point of input entry. The step stays suspended and the
/// caller re-prompts; nothing is silently coerced.
#[derive(Debug, Error, PartialEq)]
pub enum InvalidInput {
    #[error("quantity must be positive")]
    NonPositiveQuantity,
    #[error("cost must be positive")]
    NonPositiveCost,
    #[error("a selection is required")]
    MissingSelection,
    #[error("a narrative is required")]
    MissingNarrative,
    #[error("number of stories must be at least 1")]
    InvalidStories,
    #[error("no catalog entry for '{0}'")]
    CatalogMiss(String),
    #[error("input does not fit step '{0}'")]
    WrongInput(&'static str),
}

/// What one step transition produced.
#[derive(Debug)]
pub enum StepOutcome {
    Satisfied,
    NeedsInput(InputRequest),
    ItemAdded { line_number: String },
}

/// One in-flight reconciliation run. Exclusively owns the working item
/// collection and audit log until [`ChainRun::finish`]; never persisted or
/// shared across runs.
pub struct ChainRun<'a> {
    step: RuleStep,
    items: Vec<LineItem>,
    audit: AuditLog,
    measurements: RoofMeasurements,
    catalog: &'a CatalogIndex,
    rates: &'a Rates,
}

impl<'a> ChainRun<'a> {
    pub fn new(
        items: Vec<LineItem>,
        measurements: RoofMeasurements,
        catalog: &'a CatalogIndex,
        rates: &'a Rates,
    ) -> Self {
        Self::with_audit(items, measurements, catalog, rates, AuditLog::default())
    }

    /// Start a run that appends to an audit log carried over from earlier
    /// passes (alignment, replacement).
    pub fn with_audit(
        items: Vec<LineItem>,
        measurements: RoofMeasurements,
        catalog: &'a CatalogIndex,
        rates: &'a Rates,
        audit: AuditLog,
    ) -> Self {
        ChainRun {
            step: RuleStep::ShingleRemoval,
            items,
            audit,
            measurements,
            catalog,
            rates,
        }
    }

    pub fn current_step(&self) -> RuleStep {
        self.step
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn is_done(&self) -> bool {
        self.step == RuleStep::Done
    }

    /// Advance through every step that can decide without input. Returns
    /// the first suspended step's request, or `None` once the chain is
    /// done. Re-entrant: safe to call again after each [`ChainRun::supply`].
    pub fn run_until_input(&mut self) -> Option<InputRequest> {
        while self.step != RuleStep::Done {
            let outcome = steps::transition(self, None)
                .expect("a step probed without input cannot reject input");
            match outcome {
                StepOutcome::Satisfied => {
                    info!(step = self.step.id(), "step satisfied");
                    self.step = self.step.next();
                }
                StepOutcome::ItemAdded { line_number } => {
                    info!(step = self.step.id(), line = %line_number, "step added item");
                    self.step = self.step.next();
                }
                StepOutcome::NeedsInput(request) => return Some(request),
            }
        }
        None
    }

    /// Resume the currently suspended step with the supplied input. On
    /// rejection the step stays suspended and the state is unchanged.
    pub fn supply(&mut self, input: StepInput) -> Result<(), InvalidInput> {
        if self.step == RuleStep::Done {
            return Err(InvalidInput::WrongInput(RuleStep::Done.id()));
        }
        match steps::transition(self, Some(input))? {
            StepOutcome::Satisfied => {
                info!(step = self.step.id(), "step resolved by input");
                self.step = self.step.next();
                Ok(())
            }
            StepOutcome::ItemAdded { line_number } => {
                info!(step = self.step.id(), line = %line_number, "item added from input");
                self.step = self.step.next();
                Ok(())
            }
            StepOutcome::NeedsInput(_) => Err(InvalidInput::WrongInput(self.step.id())),
        }
    }

    /// Tear down the run, yielding the final working items and audit log.
    pub fn finish(self) -> (Vec<LineItem>, AuditLog) {
        (self.items, self.audit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimate::{TOTAL_LINE_LENGTHS_RIDGES, TOTAL_ROOF_AREA};

    fn catalog() -> CatalogIndex {
        CatalogIndex::parse(
            "\
Description,Unit,Unit Price
\"Remove Laminated - comp. shingle rfg. - w/out felt\",SQ,62.74
\"Laminated - comp. shingle rfg. - w/out felt\",SQ,259.07
\"Continuous ridge vent - shingle-over style\",LF,10.50
\"Continuous ridge vent - aluminum\",LF,12.25
\"Saddle or cricket - up to 25 SF\",EA,1014.00
\"Saddle or cricket - 26 to 50 SF\",EA,1382.00
\"Remove Additional layer of 3 tab - comp. shingles (no haul off)\",SQ,38.70
\"Remove Additional layer of laminated - comp. shingles (no haul off)\",SQ,45.20
",
        )
    }

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

    fn full_estimate() -> Vec<LineItem> {
        vec![
            item("1", "Remove Laminated - comp. shingle rfg. - w/out felt", 25.0, 62.74),
            item("2", "Laminated - comp. shingle rfg. - w/out felt", 25.25, 259.07),
            item("3", "Continuous ridge vent - shingle-over style", 2.5, 10.50),
            item("4", "R&R Chimney flashing - small (24\" x 24\")", 1.0, 330.0),
            item("5", "Permit", 1.0, 450.0),
            item("6", "O&P", 1.0, 3000.0),
        ]
    }

    fn measurements() -> RoofMeasurements {
        let mut m = RoofMeasurements::default();
        m.insert(TOTAL_ROOF_AREA, 2500.0);
        m.insert(TOTAL_LINE_LENGTHS_RIDGES, 250.0);
        m
    }

    #[test]
    fn complete_estimate_needs_input_only_where_steps_always_prompt() {
        let cat = catalog();
        let rates = Rates::default();
        let mut run = ChainRun::new(full_estimate(), measurements(), &cat, &rates);

        // additional_layers always prompts.
        let request = run.run_until_input().expect("additional layers prompt");
        assert_eq!(request.step, RuleStep::AdditionalLayers);
        run.supply(StepInput::AdditionalLayers {
            present: false,
            layer_kind: None,
            coverage: None,
        })
        .unwrap();

        // hidden_damages always prompts.
        let request = run.run_until_input().expect("hidden damages prompt");
        assert_eq!(request.step, RuleStep::HiddenDamages);
        run.supply(StepInput::Skipped).unwrap();

        // roof_access always prompts.
        let request = run.run_until_input().expect("roof access prompt");
        assert_eq!(request.step, RuleStep::RoofAccess);
        run.supply(StepInput::RoofAccess {
            issues_confirmed: false,
            delivery_blocked: false,
            stories: 1,
        })
        .unwrap();

        assert!(run.run_until_input().is_none());
        assert!(run.is_done());
        let (items, _) = run.finish();
        assert_eq!(items.len(), 6);
    }

    #[test]
    fn invalid_input_leaves_step_suspended() {
        let cat = catalog();
        let rates = Rates::default();
        let mut run = ChainRun::new(Vec::new(), measurements(), &cat, &rates);

        let request = run.run_until_input().expect("shingle removal prompt");
        assert_eq!(request.step, RuleStep::ShingleRemoval);

        let err = run
            .supply(StepInput::ShingleSelection {
                description: "Remove Laminated - comp. shingle rfg. - w/out felt".to_string(),
                quantity: 0.0,
            })
            .unwrap_err();
        assert_eq!(err, InvalidInput::NonPositiveQuantity);
        assert_eq!(run.current_step(), RuleStep::ShingleRemoval);

        // Re-prompting yields the same step again.
        let request = run.run_until_input().expect("still suspended");
        assert_eq!(request.step, RuleStep::ShingleRemoval);
    }

    #[test]
    fn skip_is_a_legal_resumption_everywhere() {
        let cat = catalog();
        let rates = Rates::default();
        let mut run = ChainRun::new(Vec::new(), RoofMeasurements::default(), &cat, &rates);

        let mut guard = 0;
        while let Some(_request) = run.run_until_input() {
            run.supply(StepInput::Skipped).unwrap();
            guard += 1;
            assert!(guard < 32, "chain must terminate");
        }
        assert!(run.is_done());
        let (items, audit) = run.finish();
        assert!(items.is_empty());
        assert!(audit.is_empty());
    }

    #[test]
    fn chain_is_reentrant_across_suspensions() {
        let cat = catalog();
        let rates = Rates::default();
        let mut run = ChainRun::new(Vec::new(), measurements(), &cat, &rates);

        let first = run.run_until_input().expect("prompt");
        assert_eq!(first.step, RuleStep::ShingleRemoval);
        run.supply(StepInput::ShingleSelection {
            description: "Remove Laminated - comp. shingle rfg. - w/out felt".to_string(),
            quantity: 25.0,
        })
        .unwrap();

        // The resumed run continues from installation, not from the top.
        let second = run.run_until_input().expect("next prompt");
        assert_eq!(second.step, RuleStep::InstallationShingles);
        assert_eq!(run.items().len(), 1);
        assert_eq!(run.items()[0].added_by_rule.as_deref(), Some("shingle_removal"));
    }
}
