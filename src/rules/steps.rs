// src/rules/steps.rs
//
// One transition function per rule-chain step. Each takes the run state and
// an optional input: probing with `None` either satisfies the step, adds a
// derivable item, or produces the request the caller must answer; supplying
// input either resolves the step or is rejected with the state unchanged.

use tracing::{info, warn};

use crate::audit::{AuditAction, AuditEntry};
use crate::estimate::{self, LineItem};
use crate::financial;
use crate::matcher;

use super::{
    ChainRun, ChimneySize, FieldKind, FieldSpec, InputRequest, InvalidInput, LayerCoverage,
    LayerKind, RuleStep, StepInput, StepOutcome,
};

const ADDITIONAL_LAYER_THREE_TAB: &str =
    "Remove Additional layer of 3 tab - comp. shingles (no haul off)";
const ADDITIONAL_LAYER_LAMINATED: &str =
    "Remove Additional layer of laminated - comp. shingles (no haul off)";
const PERMIT_DESCRIPTION: &str = "Permit";
const HIDDEN_DAMAGES_DESCRIPTION: &str = "Hidden damages allowance";
const ROOF_ACCESS_DESCRIPTION: &str = "Additional labor - restricted roof access";
const OP_DESCRIPTION: &str = "O&P";

// Cricket sizing thresholds, in inches: no cricket below a 30" ridge-parallel
// run, and the small cricket covers anything under the 32" x 60" footprint.
const CRICKET_MIN_LENGTH: f64 = 30.0;
const CRICKET_SMALL_MAX_AREA: f64 = 32.0 * 60.0;

pub(super) fn transition(
    run: &mut ChainRun,
    input: Option<StepInput>,
) -> Result<StepOutcome, InvalidInput> {
    // Skipping is a valid transition for every step: advance without adding
    // an item and without failing.
    if matches!(input, Some(StepInput::Skipped)) {
        info!(step = run.step.id(), "step skipped");
        return Ok(StepOutcome::Satisfied);
    }

    match run.step {
        RuleStep::ShingleRemoval => shingle_removal(run, input),
        RuleStep::InstallationShingles => installation_shingles(run, input),
        RuleStep::SpcAddedItemsCheck => spc_added_items_check(run, input),
        RuleStep::RidgeVent => ridge_vent(run, input),
        RuleStep::ChimneyFlashing => chimney_flashing(run, input),
        RuleStep::AdditionalLayers => additional_layers(run, input),
        RuleStep::Permit => permit(run, input),
        RuleStep::HiddenDamages => hidden_damages(run, input),
        RuleStep::RoofAccess => roof_access(run, input),
        RuleStep::OverheadAndProfit => overhead_and_profit(run, input),
        RuleStep::Done => Ok(StepOutcome::Satisfied),
    }
}

/// Append a new chain-produced item. All chain additions share the same
/// depreciation-free cost shape and take the next free line number.
fn push_item(
    run: &mut ChainRun,
    description: String,
    quantity: f64,
    unit: String,
    unit_price: f64,
    location_room: &str,
    category: &str,
    narrative: Option<String>,
    explanation: String,
    human_added: bool,
) -> String {
    let quantity = financial::round2(quantity);
    let rcv = financial::rcv(quantity, unit_price);
    let line_number = estimate::next_line_number(&run.items);
    let step = run.step;

    run.items.push(LineItem {
        line_number: line_number.clone(),
        description: description.clone(),
        quantity,
        unit,
        unit_price,
        rcv,
        age_life: Some("0/NA".to_string()),
        condition: Some("Avg.".to_string()),
        dep_percent: 0.0,
        depreciation_amount: 0.0,
        acv: rcv,
        location_room: Some(location_room.to_string()),
        category: Some(category.to_string()),
        page_number: estimate::max_page_number(&run.items),
        narrative,
        added_by_rule: human_added.then(|| step.id().to_string()),
    });

    run.audit.record(AuditEntry {
        line_number: line_number.clone(),
        field: "item".to_string(),
        before: None,
        after: description,
        rule_applied: step.id().to_string(),
        explanation,
        action: AuditAction::Added,
    });

    line_number
}

/// Append an item priced from the catalog. A miss is reported, never
/// guessed around.
fn push_catalog_item(
    run: &mut ChainRun,
    description: &str,
    quantity: f64,
    location_room: &str,
    category: &str,
    explanation: String,
    human_added: bool,
) -> Result<String, InvalidInput> {
    let (canonical, entry) = run
        .catalog
        .resolve(description)
        .ok_or_else(|| InvalidInput::CatalogMiss(description.to_string()))?;
    let (canonical, unit, unit_price) =
        (canonical.to_string(), entry.unit.clone(), entry.unit_price);
    Ok(push_item(
        run,
        canonical,
        quantity,
        unit,
        unit_price,
        location_room,
        category,
        None,
        explanation,
        human_added,
    ))
}

fn choice(options: &[&str]) -> FieldKind {
    FieldKind::Choice {
        options: options.iter().map(|s| s.to_string()).collect(),
    }
}

fn shingle_removal(
    run: &mut ChainRun,
    input: Option<StepInput>,
) -> Result<StepOutcome, InvalidInput> {
    match input {
        None => {
            if matcher::any_item(&run.items, matcher::is_shingle_removal) {
                return Ok(StepOutcome::Satisfied);
            }
            Ok(StepOutcome::NeedsInput(InputRequest {
                step: run.step,
                prompt: "No shingle removal items found in the estimate. Select the removal \
                         type to add, or skip."
                    .to_string(),
                fields: vec![
                    FieldSpec {
                        id: "selected_item",
                        label: "Shingle removal type",
                        kind: choice(&matcher::SHINGLE_REMOVAL_OPTIONS),
                    },
                    FieldSpec {
                        id: "quantity",
                        label: "Quantity (SQ)",
                        kind: FieldKind::Number,
                    },
                ],
            }))
        }
        Some(StepInput::Confirmed) => Ok(StepOutcome::Satisfied),
        Some(StepInput::ShingleSelection {
            description,
            quantity,
        }) => {
            if description.trim().is_empty() {
                return Err(InvalidInput::MissingSelection);
            }
            if !(quantity > 0.0) {
                return Err(InvalidInput::NonPositiveQuantity);
            }
            let line = push_catalog_item(
                run,
                &description,
                quantity,
                "Roof",
                "Roof",
                "Added missing shingle removal item selected by the adjuster".to_string(),
                true,
            )?;
            Ok(StepOutcome::ItemAdded { line_number: line })
        }
        Some(_) => Err(InvalidInput::WrongInput(run.step.id())),
    }
}

fn installation_shingles(
    run: &mut ChainRun,
    input: Option<StepInput>,
) -> Result<StepOutcome, InvalidInput> {
    match input {
        None => {
            if matcher::any_item(&run.items, matcher::is_shingle_installation) {
                return Ok(StepOutcome::Satisfied);
            }
            Ok(StepOutcome::NeedsInput(InputRequest {
                step: run.step,
                prompt: "No shingle installation items found in the estimate. Select the \
                         installation type to add, or skip."
                    .to_string(),
                fields: vec![
                    FieldSpec {
                        id: "selected_item",
                        label: "Shingle installation type",
                        kind: choice(&matcher::SHINGLE_INSTALLATION_OPTIONS),
                    },
                    FieldSpec {
                        id: "quantity",
                        label: "Quantity (SQ)",
                        kind: FieldKind::Number,
                    },
                ],
            }))
        }
        Some(StepInput::Confirmed) => Ok(StepOutcome::Satisfied),
        Some(StepInput::ShingleSelection {
            description,
            quantity,
        }) => {
            if description.trim().is_empty() {
                return Err(InvalidInput::MissingSelection);
            }
            if !(quantity > 0.0) {
                return Err(InvalidInput::NonPositiveQuantity);
            }
            let line = push_catalog_item(
                run,
                &description,
                quantity,
                "Roof",
                "Roof",
                "Added missing shingle installation item selected by the adjuster".to_string(),
                true,
            )?;
            Ok(StepOutcome::ItemAdded { line_number: line })
        }
        Some(_) => Err(InvalidInput::WrongInput(run.step.id())),
    }
}

/// Review gate over items a human added during earlier steps.
fn spc_added_items_check(
    run: &mut ChainRun,
    input: Option<StepInput>,
) -> Result<StepOutcome, InvalidInput> {
    match input {
        None => {
            let flagged: Vec<&str> = run
                .items
                .iter()
                .filter(|i| i.added_by_rule.is_some())
                .map(|i| i.description.as_str())
                .collect();
            if flagged.is_empty() {
                return Ok(StepOutcome::Satisfied);
            }
            Ok(StepOutcome::NeedsInput(InputRequest {
                step: run.step,
                prompt: format!(
                    "Confirm the items added so far before continuing: {}",
                    flagged.join("; ")
                ),
                fields: vec![FieldSpec {
                    id: "confirmed",
                    label: "Items reviewed",
                    kind: FieldKind::Bool,
                }],
            }))
        }
        Some(StepInput::Confirmed) => Ok(StepOutcome::Satisfied),
        Some(_) => Err(InvalidInput::WrongInput(run.step.id())),
    }
}

fn ridge_vent(run: &mut ChainRun, input: Option<StepInput>) -> Result<StepOutcome, InvalidInput> {
    match input {
        None => {
            let ridge_length = run.measurements.ridge_length();
            if ridge_length <= 0.0 {
                info!("no measured ridge length - ridge vent step skipped");
                return Ok(StepOutcome::Satisfied);
            }
            if matcher::any_item(&run.items, matcher::is_ridge_vent) {
                return Ok(StepOutcome::Satisfied);
            }
            let suggested = financial::round2(ridge_length / 100.0);
            Ok(StepOutcome::NeedsInput(InputRequest {
                step: run.step,
                prompt: format!(
                    "No ridge vent is present but {ridge_length} LF of ridges were measured. \
                     Suggested quantity: {suggested} (ridge length / 100)."
                ),
                fields: vec![
                    FieldSpec {
                        id: "selected_item",
                        label: "Ridge vent type",
                        kind: choice(&matcher::RIDGE_VENT_OPTIONS),
                    },
                    FieldSpec {
                        id: "quantity",
                        label: "Quantity",
                        kind: FieldKind::Number,
                    },
                ],
            }))
        }
        Some(StepInput::RidgeVentSelection {
            description,
            quantity,
        }) => {
            if description.trim().is_empty() {
                return Err(InvalidInput::MissingSelection);
            }
            if !(quantity > 0.0) {
                return Err(InvalidInput::NonPositiveQuantity);
            }
            let explanation = format!(
                "Added ridge vent for {} LF of measured ridges",
                run.measurements.ridge_length()
            );
            let line =
                push_catalog_item(run, &description, quantity, "Roof", "Ventilation", explanation, true)?;
            Ok(StepOutcome::ItemAdded { line_number: line })
        }
        Some(_) => Err(InvalidInput::WrongInput(run.step.id())),
    }
}

/// Cricket item required for a chimney of the given size, if any.
fn cricket_description(size: ChimneySize) -> Result<Option<&'static str>, InvalidInput> {
    match size {
        ChimneySize::Small => Ok(None),
        ChimneySize::Average => Ok(Some(matcher::CRICKET_UP_TO_25)),
        ChimneySize::Large => Ok(Some(matcher::CRICKET_26_TO_50)),
        ChimneySize::Custom { length, width } => {
            if !(length > 0.0) || !(width > 0.0) {
                return Err(InvalidInput::NonPositiveQuantity);
            }
            if length < CRICKET_MIN_LENGTH {
                return Ok(None);
            }
            let area = length * width;
            if area < CRICKET_SMALL_MAX_AREA {
                Ok(Some(matcher::CRICKET_UP_TO_25))
            } else {
                Ok(Some(matcher::CRICKET_26_TO_50))
            }
        }
    }
}

/// Nominal chimney size implied by an existing flashing item's wording.
fn flashing_size(description: &str) -> Option<ChimneySize> {
    let lower = description.to_lowercase();
    if lower.contains("small") {
        Some(ChimneySize::Small)
    } else if lower.contains("average") {
        Some(ChimneySize::Average)
    } else if lower.contains("large") {
        Some(ChimneySize::Large)
    } else {
        None
    }
}

fn chimney_request(run: &ChainRun, note: Option<String>) -> InputRequest {
    let mut prompt = "No chimney flashing items found in the estimate. Is a chimney present \
                      on this roof, and if so, what size?"
        .to_string();
    if let Some(note) = note {
        prompt.push(' ');
        prompt.push_str(&note);
    }
    InputRequest {
        step: run.step,
        prompt,
        fields: vec![
            FieldSpec {
                id: "chimney_present",
                label: "Chimney present",
                kind: FieldKind::Bool,
            },
            FieldSpec {
                id: "size",
                label: "Chimney size",
                kind: choice(&["small", "average", "large", "custom"]),
            },
            FieldSpec {
                id: "dimensions",
                label: "Custom dimensions (length x width, inches)",
                kind: FieldKind::Text,
            },
        ],
    }
}

fn chimney_flashing(
    run: &mut ChainRun,
    input: Option<StepInput>,
) -> Result<StepOutcome, InvalidInput> {
    match input {
        None => {
            let flashing = run
                .items
                .iter()
                .find(|i| matcher::is_chimney_flashing(&i.description))
                .map(|i| i.description.clone());
            let Some(flashing) = flashing else {
                return Ok(StepOutcome::NeedsInput(chimney_request(run, None)));
            };

            let Some(size) = flashing_size(&flashing) else {
                info!(flashing = %flashing, "chimney flashing present, size not derivable");
                return Ok(StepOutcome::Satisfied);
            };
            let Some(cricket) = cricket_description(size)? else {
                return Ok(StepOutcome::Satisfied);
            };
            if matcher::any_item(&run.items, matcher::is_cricket) {
                return Ok(StepOutcome::Satisfied);
            }

            match push_catalog_item(
                run,
                cricket,
                1.0,
                "Roof",
                "Roof",
                format!("Chimney flashing '{flashing}' requires a matching cricket"),
                false,
            ) {
                Ok(line) => Ok(StepOutcome::ItemAdded { line_number: line }),
                Err(InvalidInput::CatalogMiss(missing)) => {
                    warn!(item = %missing, "cricket missing from catalog");
                    Ok(StepOutcome::NeedsInput(chimney_request(
                        run,
                        Some(format!("(catalog has no entry for '{missing}')")),
                    )))
                }
                Err(e) => Err(e),
            }
        }
        Some(StepInput::Chimney { present: false, .. }) => Ok(StepOutcome::Satisfied),
        Some(StepInput::Chimney {
            present: true,
            size,
        }) => {
            let size = size.ok_or(InvalidInput::MissingSelection)?;
            let Some(cricket) = cricket_description(size)? else {
                info!("chimney too small for a cricket");
                return Ok(StepOutcome::Satisfied);
            };
            if matcher::any_item(&run.items, matcher::is_cricket) {
                return Ok(StepOutcome::Satisfied);
            }
            let line = push_catalog_item(
                run,
                cricket,
                1.0,
                "Roof",
                "Roof",
                "Cricket added for the confirmed chimney".to_string(),
                true,
            )?;
            Ok(StepOutcome::ItemAdded { line_number: line })
        }
        Some(_) => Err(InvalidInput::WrongInput(run.step.id())),
    }
}

fn additional_layers(
    run: &mut ChainRun,
    input: Option<StepInput>,
) -> Result<StepOutcome, InvalidInput> {
    match input {
        None => Ok(StepOutcome::NeedsInput(InputRequest {
            step: run.step,
            prompt: "Are additional layers of shingles present under the top layer?".to_string(),
            fields: vec![
                FieldSpec {
                    id: "layers_present",
                    label: "Additional layers present",
                    kind: FieldKind::Bool,
                },
                FieldSpec {
                    id: "layer_kind",
                    label: "Shingle type",
                    kind: choice(&["three_tab", "laminated"]),
                },
                FieldSpec {
                    id: "coverage",
                    label: "Coverage (entire roof, or square count)",
                    kind: FieldKind::Text,
                },
            ],
        })),
        Some(StepInput::AdditionalLayers { present: false, .. }) => Ok(StepOutcome::Satisfied),
        Some(StepInput::AdditionalLayers {
            present: true,
            layer_kind,
            coverage,
        }) => {
            let kind = layer_kind.ok_or(InvalidInput::MissingSelection)?;
            let coverage = coverage.ok_or(InvalidInput::MissingSelection)?;
            let quantity = match coverage {
                LayerCoverage::EntireRoof => run.measurements.total_roof_area() / 100.0,
                LayerCoverage::Squares(squares) => squares,
            };
            if !(quantity > 0.0) {
                return Err(InvalidInput::NonPositiveQuantity);
            }
            let description = match kind {
                LayerKind::ThreeTab => ADDITIONAL_LAYER_THREE_TAB,
                LayerKind::Laminated => ADDITIONAL_LAYER_LAMINATED,
            };
            let line = push_catalog_item(
                run,
                description,
                quantity,
                "Roof",
                "Roof",
                "Removal of the confirmed additional shingle layer".to_string(),
                true,
            )?;
            Ok(StepOutcome::ItemAdded { line_number: line })
        }
        Some(_) => Err(InvalidInput::WrongInput(run.step.id())),
    }
}

fn permit(run: &mut ChainRun, input: Option<StepInput>) -> Result<StepOutcome, InvalidInput> {
    match input {
        None => {
            if matcher::any_item(&run.items, matcher::is_permit) {
                return Ok(StepOutcome::Satisfied);
            }
            Ok(StepOutcome::NeedsInput(InputRequest {
                step: run.step,
                prompt: "No permit item is present. Enter the permit cost to add one, or skip."
                    .to_string(),
                fields: vec![FieldSpec {
                    id: "permit_cost",
                    label: "Permit cost ($)",
                    kind: FieldKind::Number,
                }],
            }))
        }
        Some(StepInput::PermitCost { cost }) => {
            if !(cost > 0.0) {
                return Err(InvalidInput::NonPositiveCost);
            }
            let line = push_item(
                run,
                PERMIT_DESCRIPTION.to_string(),
                1.0,
                "EA".to_string(),
                cost,
                "General",
                "General",
                None,
                "Permit added at the cost supplied by the adjuster".to_string(),
                true,
            );
            Ok(StepOutcome::ItemAdded { line_number: line })
        }
        Some(_) => Err(InvalidInput::WrongInput(run.step.id())),
    }
}

fn hidden_damages(
    run: &mut ChainRun,
    input: Option<StepInput>,
) -> Result<StepOutcome, InvalidInput> {
    match input {
        // No presence check: this step always asks.
        None => Ok(StepOutcome::NeedsInput(InputRequest {
            step: run.step,
            prompt: "Are there hidden damages to account for? Enter the estimated cost and a \
                     narrative, or skip."
                .to_string(),
            fields: vec![
                FieldSpec {
                    id: "cost",
                    label: "Hidden damages cost ($)",
                    kind: FieldKind::Number,
                },
                FieldSpec {
                    id: "narrative",
                    label: "Narrative",
                    kind: FieldKind::Text,
                },
            ],
        })),
        Some(StepInput::HiddenDamages { cost, narrative }) => {
            if !(cost > 0.0) {
                return Err(InvalidInput::NonPositiveCost);
            }
            if narrative.trim().is_empty() {
                return Err(InvalidInput::MissingNarrative);
            }
            let line = push_item(
                run,
                HIDDEN_DAMAGES_DESCRIPTION.to_string(),
                1.0,
                "EA".to_string(),
                cost,
                "Roof",
                "Roof",
                Some(narrative.trim().to_string()),
                "Hidden damages allowance recorded with the adjuster's narrative".to_string(),
                true,
            );
            Ok(StepOutcome::ItemAdded { line_number: line })
        }
        Some(_) => Err(InvalidInput::WrongInput(run.step.id())),
    }
}

fn roof_access(run: &mut ChainRun, input: Option<StepInput>) -> Result<StepOutcome, InvalidInput> {
    match input {
        None => Ok(StepOutcome::NeedsInput(InputRequest {
            step: run.step,
            prompt: "Are there roof access issues, and do they prevent rooftop stocking \
                     delivery?"
                .to_string(),
            fields: vec![
                FieldSpec {
                    id: "issues_confirmed",
                    label: "Access issues present",
                    kind: FieldKind::Bool,
                },
                FieldSpec {
                    id: "delivery_blocked",
                    label: "Rooftop delivery blocked",
                    kind: FieldKind::Bool,
                },
                FieldSpec {
                    id: "stories",
                    label: "Number of stories",
                    kind: FieldKind::Integer,
                },
            ],
        })),
        Some(StepInput::RoofAccess {
            issues_confirmed,
            delivery_blocked,
            stories,
        }) => {
            if !(issues_confirmed && delivery_blocked) {
                info!("roof access labor not required");
                return Ok(StepOutcome::Satisfied);
            }
            if stories == 0 {
                return Err(InvalidInput::InvalidStories);
            }
            let area = run.measurements.total_roof_area();
            if area <= 0.0 {
                warn!("total roof area is 0 - cannot compute roof access labor");
                return Ok(StepOutcome::Satisfied);
            }

            let bundles = area * 3.0;
            let minutes_per_bundle = if stories == 1 {
                run.rates.minutes_per_bundle_single_story
            } else {
                run.rates.minutes_per_bundle_multi_story
            };
            let labor_hours = bundles * minutes_per_bundle / 60.0;
            let unit_price = financial::round2(run.rates.hourly_rate / 100.0);

            let line = push_item(
                run,
                ROOF_ACCESS_DESCRIPTION.to_string(),
                labor_hours,
                "HR".to_string(),
                unit_price,
                "Exterior",
                "Labor",
                None,
                format!(
                    "Ground-hauling labor: {bundles} bundles at {minutes_per_bundle} min/bundle \
                     over {stories} story(ies)"
                ),
                true,
            );
            Ok(StepOutcome::ItemAdded { line_number: line })
        }
        Some(_) => Err(InvalidInput::WrongInput(run.step.id())),
    }
}

fn overhead_and_profit(
    run: &mut ChainRun,
    input: Option<StepInput>,
) -> Result<StepOutcome, InvalidInput> {
    match input {
        None => {
            if matcher::any_item(&run.items, matcher::is_overhead_and_profit) {
                return Ok(StepOutcome::Satisfied);
            }
            let percent = run.rates.op_percent * 100.0;
            Ok(StepOutcome::NeedsInput(InputRequest {
                step: run.step,
                prompt: format!(
                    "Overhead & Profit is not present. Add O&P at {percent}% of the estimate \
                     total?"
                ),
                fields: vec![FieldSpec {
                    id: "confirmed",
                    label: "Add O&P",
                    kind: FieldKind::Bool,
                }],
            }))
        }
        Some(StepInput::Confirmed) => {
            let base: f64 = run
                .items
                .iter()
                .filter(|i| !matcher::is_overhead_and_profit(&i.description))
                .map(|i| i.rcv)
                .sum();
            let amount = financial::round2(base * run.rates.op_percent);
            if amount <= 0.0 {
                warn!("estimate total is 0 - nothing to apply O&P to");
                return Ok(StepOutcome::Satisfied);
            }
            let explanation = format!(
                "O&P at {}% of {base:.2} total RCV",
                run.rates.op_percent * 100.0
            );
            let line = push_item(
                run,
                OP_DESCRIPTION.to_string(),
                1.0,
                "EA".to_string(),
                amount,
                "General",
                "General",
                None,
                explanation,
                true,
            );
            Ok(StepOutcome::ItemAdded { line_number: line })
        }
        Some(_) => Err(InvalidInput::WrongInput(run.step.id())),
    }
}
