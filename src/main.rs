// src/main.rs

use std::collections::HashMap;
use std::fs;

use tracing::{info, warn};

use claim_reconciler::adjust;
use claim_reconciler::config::EngineConfig;
use claim_reconciler::extract;
use claim_reconciler::reconcile;
use claim_reconciler::rules::{ChainRun, StepInput};
use claim_reconciler::{AuditLog, CatalogIndex};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter("info")
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        eprintln!(
            "usage: {} <catalog.csv> <claim.txt> <roof.txt> [answers.json] [engine.toml]",
            args[0]
        );
        std::process::exit(2);
    }
    let catalog_path = &args[1];
    let claim_path = &args[2];
    let roof_path = &args[3];
    let answers_path = args.get(4);
    let config_path = args.get(5).map(String::as_str).unwrap_or("engine.toml");

    let config = EngineConfig::load_or_default(config_path);
    let catalog = CatalogIndex::from_file(catalog_path)?;
    info!(entries = catalog.len(), path = %catalog_path, "catalog loaded");

    // Decode the two upstream blobs; both are allowed to be partial.
    let claim_raw = fs::read_to_string(claim_path)?;
    let extraction = extract::extract_line_items(&claim_raw);
    for diag in &extraction.diagnostics {
        info!(diag = %diag, "line item extraction");
    }
    let items = extraction.value.unwrap_or_default();
    if items.is_empty() {
        warn!("no line items extracted - continuing with an empty estimate");
    }

    let roof_raw = fs::read_to_string(roof_path)?;
    let extraction = extract::extract_measurements(&roof_raw);
    for diag in &extraction.diagnostics {
        info!(diag = %diag, "measurement extraction");
    }
    let measurements = extraction.value.unwrap_or_default();
    if measurements.is_empty() {
        warn!("no roof measurements extracted - geometry-driven rules will skip");
    }

    // Answers for suspended steps, keyed by step id. Missing answers skip.
    let answers: HashMap<String, StepInput> = match answers_path {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => HashMap::new(),
    };

    let original = items.clone();
    let mut items = items;
    let mut audit = AuditLog::default();

    adjust::replace_carrier_items(&mut items, &catalog, &mut audit);
    adjust::align_shingle_quantities(&mut items, &measurements, &mut audit);

    let mut run = ChainRun::with_audit(items, measurements, &catalog, &config.rates, audit);
    while let Some(request) = run.run_until_input() {
        let step = request.step.id();
        match answers.get(step) {
            Some(input) => {
                info!(step, "answering from answers file");
                if let Err(e) = run.supply(input.clone()) {
                    warn!(step, error = %e, "answer rejected - skipping step");
                    run.supply(StepInput::Skipped)?;
                }
            }
            None => {
                info!(step, prompt = %request.prompt, "no answer provided - skipping step");
                run.supply(StepInput::Skipped)?;
            }
        }
    }

    let (adjusted, audit) = run.finish();
    let final_items = reconcile::merge(&original, &adjusted);

    info!(
        original = original.len(),
        merged = final_items.len(),
        audit_entries = audit.len(),
        "reconciliation complete"
    );

    let output = serde_json::json!({
        "line_items": final_items,
        "audit_log": audit.entries(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
