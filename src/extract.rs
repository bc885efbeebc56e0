// src/extract.rs

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::estimate::{LineItem, RoofMeasurements};
use crate::financial;

/// Result of one extraction attempt: the decoded value when any fallback
/// stage succeeded, plus every diagnostic collected along the way.
///
/// Exhausting the chain is a recoverable condition, not an error — callers
/// get `None` and decide whether to abort or continue with partial data.
#[derive(Debug)]
pub struct Extraction<T> {
    pub value: Option<T>,
    pub diagnostics: Vec<String>,
}

impl<T> Extraction<T> {
    fn found(value: T, diagnostics: Vec<String>) -> Self {
        Self {
            value: Some(value),
            diagnostics,
        }
    }

    fn empty(diagnostics: Vec<String>) -> Self {
        Self {
            value: None,
            diagnostics,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```json\s*(.*?)```").expect("static regex"))
}

fn record_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\{[^{}]*"line_number"[^{}]*\}"#).expect("static regex"))
}

/// First `open`..last `close` slice of `text`, when both are present in order.
fn bracket_slice(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end > start { Some(&text[start..=end]) } else { None }
}

/// Short sanitized excerpt for diagnostics.
fn excerpt(text: &str) -> String {
    let flat: String = text.chars().take(80).map(|c| if c == '\n' { ' ' } else { c }).collect();
    flat
}

/// Numeric field that may arrive as a JSON number or as a formatted string
/// like `"1,234.50"` or `"$40.00"`.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s
            .trim()
            .trim_start_matches('$')
            .replace(',', "")
            .parse()
            .ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Build a line item from one loosely-typed record, tolerating string-typed
/// numbers and missing optional fields. Returns `None` for records with no
/// usable description.
fn line_item_from_value(value: &Value, fallback_line: usize) -> Option<LineItem> {
    let obj = value.as_object()?;

    let description = obj
        .get("description")
        .and_then(as_text)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())?;

    let line_number = obj
        .get("line_number")
        .and_then(as_text)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| fallback_line.to_string());

    let quantity = obj.get("quantity").and_then(as_number).unwrap_or(0.0);
    let unit = obj
        .get("unit")
        .and_then(as_text)
        .unwrap_or_else(|| "EA".to_string());
    let rcv = obj.get("RCV").and_then(as_number);
    // Some report formats omit the unit price; recover it from RCV/quantity.
    let unit_price = obj
        .get("unit_price")
        .and_then(as_number)
        .or_else(|| rcv.filter(|_| quantity > 0.0).map(|r| r / quantity))
        .unwrap_or(0.0);
    let rcv = rcv.unwrap_or_else(|| financial::round2(quantity * unit_price));
    let dep_percent = obj.get("dep_percent").and_then(as_number).unwrap_or(0.0);
    let depreciation_amount = obj
        .get("depreciation_amount")
        .and_then(as_number)
        .unwrap_or(0.0);
    let acv = obj
        .get("ACV")
        .and_then(as_number)
        .unwrap_or_else(|| financial::round2(rcv - depreciation_amount));

    Some(LineItem {
        line_number,
        description,
        quantity,
        unit,
        unit_price,
        rcv,
        age_life: obj.get("age_life").and_then(as_text),
        condition: obj.get("condition").and_then(as_text),
        dep_percent,
        depreciation_amount,
        acv,
        location_room: obj.get("location_room").and_then(as_text),
        category: obj.get("category").and_then(as_text),
        page_number: obj
            .get("page_number")
            .and_then(as_number)
            .map(|n| n as u32)
            .unwrap_or(1),
        narrative: obj.get("narrative").and_then(as_text),
        added_by_rule: None,
    })
}

fn items_from_array(values: &[Value], diagnostics: &mut Vec<String>) -> Vec<LineItem> {
    let mut items = Vec::with_capacity(values.len());
    let mut discarded = 0usize;
    for (idx, value) in values.iter().enumerate() {
        match line_item_from_value(value, idx + 1) {
            Some(item) => items.push(item),
            None => discarded += 1,
        }
    }
    if discarded > 0 {
        diagnostics.push(format!("{discarded} record(s) discarded (no usable description)"));
    }
    items
}

/// Pull a line-item array out of a decoded JSON value, looking through the
/// `line_items` wrapper key when present.
fn line_item_values(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(arr) => Some(arr),
        Value::Object(map) => map.get("line_items").and_then(|v| v.as_array()),
        _ => None,
    }
}

/// Decode a sequence of line items from unreliable upstream text.
///
/// Ordered fallback, first success wins:
/// 1. whole text as JSON (arrays, `line_items` objects, `response` wrappers);
/// 2. fenced ```json code block;
/// 3. first `[...]` / `{...}` looking substring;
/// 4. individual record scan keyed on `"line_number"`.
pub fn extract_line_items(raw: &str) -> Extraction<Vec<LineItem>> {
    let mut diagnostics = Vec::new();
    let mut text = raw.to_string();

    // Stage 1: the whole blob is JSON.
    match serde_json::from_str::<Value>(&text) {
        Ok(parsed) => {
            if let Some(values) = line_item_values(&parsed) {
                let items = items_from_array(values, &mut diagnostics);
                debug!(count = items.len(), "line items decoded from direct JSON");
                return Extraction::found(items, diagnostics);
            }
            match parsed.get("response") {
                Some(Value::String(inner)) => {
                    diagnostics.push("stage 1: unwrapped nested `response` payload".to_string());
                    text = inner.clone();
                }
                Some(nested) => {
                    if let Some(values) = line_item_values(nested) {
                        let items = items_from_array(values, &mut diagnostics);
                        return Extraction::found(items, diagnostics);
                    }
                    diagnostics
                        .push("stage 1: `response` payload is not a line-item array".to_string());
                }
                None => diagnostics.push(format!(
                    "stage 1: JSON parsed but holds no line items: {}",
                    excerpt(&text)
                )),
            }
        }
        Err(e) => diagnostics.push(format!("stage 1: direct parse failed: {e}")),
    }

    // Stage 2: fenced code block.
    if let Some(cap) = fence_re().captures(&text) {
        match serde_json::from_str::<Value>(cap[1].trim()) {
            Ok(parsed) => {
                if let Some(values) = line_item_values(&parsed) {
                    let items = items_from_array(values, &mut diagnostics);
                    debug!(count = items.len(), "line items decoded from fenced block");
                    return Extraction::found(items, diagnostics);
                }
                diagnostics.push("stage 2: fenced JSON holds no line items".to_string());
            }
            Err(e) => diagnostics.push(format!(
                "stage 2: fenced block parse failed: {e}: {}",
                excerpt(&cap[1])
            )),
        }
    } else {
        diagnostics.push("stage 2: no ```json fence found".to_string());
    }

    // Stage 3: first bracketed substring.
    for (open, close) in [('[', ']'), ('{', '}')] {
        if let Some(slice) = bracket_slice(&text, open, close) {
            match serde_json::from_str::<Value>(slice) {
                Ok(parsed) => {
                    if let Some(values) = line_item_values(&parsed) {
                        if !values.is_empty() {
                            let items = items_from_array(values, &mut diagnostics);
                            debug!(count = items.len(), "line items decoded from bracket scan");
                            return Extraction::found(items, diagnostics);
                        }
                    }
                }
                Err(e) => diagnostics.push(format!(
                    "stage 3: `{open}...{close}` slice parse failed at byte {}: {e}",
                    text.find(open).unwrap_or(0)
                )),
            }
        }
    }

    // Stage 4: salvage individual records.
    let mut items = Vec::new();
    let mut discarded = 0usize;
    for m in record_re().find_iter(&text) {
        match serde_json::from_str::<Value>(m.as_str()) {
            Ok(v) => {
                if let Some(item) = line_item_from_value(&v, items.len() + 1) {
                    items.push(item);
                } else {
                    discarded += 1;
                }
            }
            Err(_) => discarded += 1,
        }
    }
    if !items.is_empty() {
        diagnostics.push(format!(
            "stage 4: recovered {} record(s), discarded {discarded}",
            items.len()
        ));
        return Extraction::found(items, diagnostics);
    }

    warn!(
        stages = diagnostics.len(),
        "all extraction stages failed for line items"
    );
    Extraction::empty(diagnostics)
}

/// Flatten one decoded object into measurements, accepting bare numbers,
/// numeric strings, and `{"value": n}` wrappers.
fn measurements_from_object(value: &Value, diagnostics: &mut Vec<String>) -> RoofMeasurements {
    let mut out = RoofMeasurements::default();
    let Some(map) = value.as_object() else {
        return out;
    };

    // Some payloads nest everything under a wrapper key.
    if let Some(nested) = map.get("roof_measurements").filter(|v| v.is_object()) {
        return measurements_from_object(nested, diagnostics);
    }

    for (name, raw) in map {
        let number = match raw {
            Value::Object(inner) => inner.get("value").and_then(as_number),
            other => as_number(other),
        };
        match number {
            Some(n) => out.insert(name.clone(), n),
            None => diagnostics.push(format!("measurement '{name}' is not numeric, skipped")),
        }
    }

    // Reports sometimes ship ridge and hip lengths separately.
    let ridge = out.get("ridgeLength");
    let hip = out.get("hipLength");
    if ridge > 0.0 && hip > 0.0 && out.get(crate::estimate::TOTAL_RIDGES_HIPS_LENGTH) == 0.0 {
        out.insert(crate::estimate::TOTAL_RIDGES_HIPS_LENGTH, ridge + hip);
    }

    out
}

/// Decode a single roof-measurements record from unreliable upstream text.
/// Same fallback chain as [`extract_line_items`], minus the per-record scan.
pub fn extract_measurements(raw: &str) -> Extraction<RoofMeasurements> {
    let mut diagnostics = Vec::new();
    let mut text = raw.to_string();

    // Stage 1: the whole blob is JSON, possibly a `response` wrapper.
    match serde_json::from_str::<Value>(&text) {
        Ok(parsed) => match parsed.get("response") {
            Some(Value::String(inner)) => {
                diagnostics.push("stage 1: unwrapped nested `response` payload".to_string());
                text = inner.clone();
            }
            Some(nested) if nested.is_object() => {
                let m = measurements_from_object(nested, &mut diagnostics);
                if !m.is_empty() {
                    return Extraction::found(m, diagnostics);
                }
                diagnostics.push("stage 1: `response` object held no measurements".to_string());
            }
            _ => {
                let m = measurements_from_object(&parsed, &mut diagnostics);
                if !m.is_empty() {
                    debug!(count = m.len(), "measurements decoded from direct JSON");
                    return Extraction::found(m, diagnostics);
                }
                diagnostics.push(format!(
                    "stage 1: JSON parsed but held no measurements: {}",
                    excerpt(&text)
                ));
            }
        },
        Err(e) => diagnostics.push(format!("stage 1: direct parse failed: {e}")),
    }

    // Stage 2: fenced code block.
    if let Some(cap) = fence_re().captures(&text) {
        match serde_json::from_str::<Value>(cap[1].trim()) {
            Ok(parsed) => {
                let m = measurements_from_object(&parsed, &mut diagnostics);
                if !m.is_empty() {
                    debug!(count = m.len(), "measurements decoded from fenced block");
                    return Extraction::found(m, diagnostics);
                }
                diagnostics.push("stage 2: fenced JSON held no measurements".to_string());
            }
            Err(e) => diagnostics.push(format!(
                "stage 2: fenced block parse failed: {e}: {}",
                excerpt(&cap[1])
            )),
        }
    } else {
        diagnostics.push("stage 2: no ```json fence found".to_string());
    }

    // Stage 3: first object-looking substring.
    if let Some(slice) = bracket_slice(&text, '{', '}') {
        match serde_json::from_str::<Value>(slice) {
            Ok(parsed) => {
                let m = measurements_from_object(&parsed, &mut diagnostics);
                if !m.is_empty() {
                    debug!(count = m.len(), "measurements decoded from bracket scan");
                    return Extraction::found(m, diagnostics);
                }
                diagnostics.push("stage 3: object slice held no measurements".to_string());
            }
            Err(e) => diagnostics.push(format!(
                "stage 3: object slice parse failed at byte {}: {e}",
                text.find('{').unwrap_or(0)
            )),
        }
    }

    warn!(
        stages = diagnostics.len(),
        "all extraction stages failed for roof measurements"
    );
    Extraction::empty(diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimate::{TOTAL_LINE_LENGTHS_RIDGES, TOTAL_RIDGES_HIPS_LENGTH, TOTAL_ROOF_AREA};

    #[test]
    fn direct_array_parses() {
        let raw = r#"[{"line_number": "1", "description": "Roofing felt - 15 lb.",
                      "quantity": 12.5, "unit": "SQ", "unit_price": 40.0, "RCV": 500.0,
                      "ACV": 500.0}]"#;
        let got = extract_line_items(raw);
        let items = got.value.expect("items");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].description, "Roofing felt - 15 lb.");
        assert_eq!(items[0].rcv, 500.0);
    }

    #[test]
    fn response_wrapper_with_fenced_block_parses_via_stage_two() {
        let raw = concat!(
            "{\"response\": \"Here is the estimate you asked for.\\n",
            "```json\\n[{\\\"line_number\\\": \\\"3\\\", \\\"description\\\": ",
            "\\\"Step flashing\\\", \\\"quantity\\\": \\\"22\\\", \\\"unit\\\": \\\"LF\\\", ",
            "\\\"unit_price\\\": \\\"8.50\\\"}]\\n```\\nLet me know if anything is off.\"}"
        );
        let got = extract_line_items(raw);
        let items = got.value.expect("items");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 22.0);
        assert_eq!(items[0].unit_price, 8.5);
        assert!(got.diagnostics.iter().any(|d| d.contains("response")));
    }

    #[test]
    fn record_scan_salvages_partial_garbage() {
        let raw = r#"item one {"line_number": "4", "description": "Valley metal",
                     "quantity": 30, "unit": "LF", "unit_price": 6.0} and then
                     {"line_number": "5", "description": "", "quantity": 1} trailing"#;
        let got = extract_line_items(raw);
        let items = got.value.expect("items");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].description, "Valley metal");
    }

    #[test]
    fn hopeless_text_yields_empty_with_diagnostics() {
        let got = extract_line_items("nothing structured here at all");
        assert!(got.is_empty());
        assert!(!got.diagnostics.is_empty());
    }

    #[test]
    fn unit_price_recovered_from_rcv() {
        let raw = r#"[{"line_number": "1", "description": "Drip edge",
                      "quantity": 120, "unit": "LF", "RCV": 360.0}]"#;
        let items = extract_line_items(raw).value.expect("items");
        assert_eq!(items[0].unit_price, 3.0);
    }

    #[test]
    fn measurements_normalize_wrapped_and_bare_values() {
        let raw = r#"{"Total Roof Area": {"value": 2500},
                      "Total Line Lengths (Ridges)": 250,
                      "Notes": "not a number"}"#;
        let got = extract_measurements(raw);
        let m = got.value.expect("measurements");
        assert_eq!(m.get(TOTAL_ROOF_AREA), 2500.0);
        assert_eq!(m.get(TOTAL_LINE_LENGTHS_RIDGES), 250.0);
        assert!(got.diagnostics.iter().any(|d| d.contains("Notes")));
    }

    #[test]
    fn measurements_fenced_in_prose_parse_via_stage_two() {
        let raw = "Sure! Here are the measurements:\n```json\n{\"Total Roof Area\": {\"value\": 1800}}\n```\nAnything else?";
        let m = extract_measurements(raw).value.expect("measurements");
        assert_eq!(m.total_roof_area(), 1800.0);
    }

    #[test]
    fn separate_ridge_and_hip_lengths_combine() {
        let raw = r#"{"ridgeLength": 120, "hipLength": 80}"#;
        let m = extract_measurements(raw).value.expect("measurements");
        assert_eq!(m.get(TOTAL_RIDGES_HIPS_LENGTH), 200.0);
    }
}
