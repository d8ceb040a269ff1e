//! Recovery interpreter for generative-model output.
//!
//! Models are asked for JSON and return something adjacent to it: fenced,
//! wrapped in prose, truncated mid-list, single-quoted, or with trailing
//! commas. This module salvages whatever structure is recoverable and never
//! fails on merely malformed input; the only hard failure is a request for a
//! shape the text cannot possibly contain.
//!
//! Attempt chain, first success wins:
//! 1. json-tagged fenced block
//! 2. any fenced block
//! 3. bracket scan from the first opener of the requested shape, with
//!    truncation repair (cut at the last complete element, synthesize the
//!    missing closers)
//!
//! Each attempt parses the candidate as-is first, then with the repair
//! pipeline applied. Repairs are standalone pure functions; their order
//! matters and is fixed.

use std::sync::OnceLock;

use capsheet_engine::rows::ColumnMapping;
use capsheet_protocol::ActionOp;
use regex::Regex;
use serde_json::Value;

/// Maximum records accepted from one recovered collection; excess is dropped.
pub const MAX_OPERATIONS: usize = 20;

/// The structural shape the caller needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    List,
    Object,
}

/// No structure of the requested shape exists in the text at all.
///
/// This is the only non-recoverable extraction outcome; everything else
/// degrades to a best-effort value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoStructure;

impl std::fmt::Display for NoStructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no structured content found in oracle output")
    }
}

impl std::error::Error for NoStructure {}

fn fence_json_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```json\s*(.*?)```").expect("static regex"))
}

fn fence_any_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```\s*(.*?)```").expect("static regex"))
}

// ============================================================================
// Repair pipeline
// ============================================================================

/// Delete commas immediately preceding a closing bracket/brace.
pub fn strip_trailing_commas(s: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r",(\s*[}\]])").expect("static regex"));
    re.replace_all(s, "${1}").into_owned()
}

/// Normalize single-quoted keys/strings to double quotes.
pub fn normalize_quotes(s: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"'([^']*)'").expect("static regex"));
    re.replace_all(s, "\"${1}\"").into_owned()
}

/// Insert a separating comma between adjacent object literals.
pub fn insert_missing_commas(s: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\}\s*\{").expect("static regex"));
    re.replace_all(s, "},{").into_owned()
}

/// The full pipeline, in its fixed order.
pub fn repair(s: &str) -> String {
    insert_missing_commas(&normalize_quotes(&strip_trailing_commas(s.trim())))
}

// ============================================================================
// Extraction
// ============================================================================

/// Extract the best-effort JSON value of the requested shape from raw model
/// output. `Err(NoStructure)` only when no opener of the shape exists.
pub fn extract_value(raw: &str, shape: Shape) -> Result<Value, NoStructure> {
    // Fenced blocks first: a tagged block is the model following
    // instructions, an untagged one is close enough.
    for re in [fence_json_re(), fence_any_re()] {
        if let Some(cap) = re.captures(raw) {
            if let Some(v) = parse_candidate(&cap[1], shape) {
                return Ok(v);
            }
        }
    }

    // Bracket scan over the whole text.
    if let Some(v) = scan_brackets(raw, shape) {
        return Ok(v);
    }

    // A list request can still be satisfied by a single bare record.
    if shape == Shape::List {
        if let Some(v) = scan_brackets(raw, Shape::Object) {
            return Ok(Value::Array(vec![v]));
        }
    }

    Err(NoStructure)
}

/// Slice from the first opener of `shape` to its last plausible closer and
/// run the candidate parse. `None` when no opener exists or nothing parsed.
fn scan_brackets(raw: &str, shape: Shape) -> Option<Value> {
    let (open, close) = match shape {
        Shape::List => ('[', ']'),
        Shape::Object => ('{', '}'),
    };
    let start = raw.find(open)?;
    let candidate = match raw[start..].rfind(close) {
        Some(rel_end) => &raw[start..=start + rel_end],
        None => &raw[start..],
    };
    parse_candidate(candidate, shape)
}

/// Parse one candidate: as-is, then repaired, then truncation-closed.
fn parse_candidate(text: &str, shape: Shape) -> Option<Value> {
    let text = text.trim();

    if let Ok(v) = serde_json::from_str::<Value>(text) {
        if let Some(v) = coerce_shape(v, shape) {
            return Some(v);
        }
    }

    let repaired = repair(text);
    if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
        if let Some(v) = coerce_shape(v, shape) {
            return Some(v);
        }
    }

    let closed = close_truncated(&repaired, shape)?;
    let v = serde_json::from_str::<Value>(&repair(&closed)).ok()?;
    coerce_shape(v, shape)
}

/// Shape coercion: a bare record satisfies a list request by wrapping.
fn coerce_shape(v: Value, shape: Shape) -> Option<Value> {
    match (shape, v) {
        (Shape::List, Value::Array(a)) => Some(Value::Array(a)),
        (Shape::List, Value::Object(o)) => Some(Value::Array(vec![Value::Object(o)])),
        (Shape::Object, Value::Object(o)) => Some(Value::Object(o)),
        _ => None,
    }
}

/// Recover a value whose closing bracket(s) were cut off by truncation.
fn close_truncated(text: &str, shape: Shape) -> Option<String> {
    let text = text.trim();
    match shape {
        Shape::List => {
            let start = text.find('[')?;
            let body = &text[start..];
            // Keep everything through the last complete element and
            // synthesize the list closer.
            let last_brace = body.rfind('}')?;
            Some(format!("{}]", &body[..=last_brace]))
        }
        Shape::Object => {
            let start = text.find('{')?;
            let body = &text[start..];
            let missing = open_brace_balance(body);
            if missing == 0 {
                return None;
            }
            let mut closed = body.to_string();
            for _ in 0..missing {
                closed.push('}');
            }
            Some(closed)
        }
    }
}

/// Count unclosed `{` in `s`, ignoring braces inside string literals.
fn open_brace_balance(s: &str) -> usize {
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escaped = false;
    for c in s.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => depth -= 1,
            _ => {}
        }
    }
    depth.max(0) as usize
}

// ============================================================================
// Record validation
// ============================================================================

/// Recover a batch of `ActionOp`s from raw model output.
///
/// Caps the batch at [`MAX_OPERATIONS`], drops elements missing the
/// mandatory id/range/kind keys individually (with a diagnostic), and treats
/// an empty surviving batch as a valid outcome.
pub fn recover_ops(raw: &str) -> Result<(Vec<ActionOp>, Vec<String>), NoStructure> {
    let value = extract_value(raw, Shape::List)?;
    let mut elements = match value {
        Value::Array(a) => a,
        _ => Vec::new(),
    };

    let mut diagnostics = Vec::new();

    if elements.len() > MAX_OPERATIONS {
        diagnostics.push(format!(
            "recovered {} operations, keeping first {}",
            elements.len(),
            MAX_OPERATIONS
        ));
        elements.truncate(MAX_OPERATIONS);
    }

    let mut ops = Vec::new();
    for (i, element) in elements.into_iter().enumerate() {
        let obj = match element.as_object() {
            Some(o) => o,
            None => {
                diagnostics.push(format!("element {}: not a record, dropped", i));
                continue;
            }
        };
        let has_kind = obj.contains_key("kind") || obj.contains_key("type");
        if !obj.contains_key("id") || !obj.contains_key("range") || !has_kind {
            diagnostics.push(format!("element {}: missing id/range/kind, dropped", i));
            continue;
        }
        match serde_json::from_value::<ActionOp>(element) {
            Ok(op) => ops.push(op),
            Err(e) => diagnostics.push(format!("element {}: {}, dropped", i, e)),
        }
    }

    Ok((ops, diagnostics))
}

/// Recover a key/value object from raw model output, total: anything
/// unrecoverable is the empty map (the model said nothing usable).
pub fn recover_object(raw: &str) -> serde_json::Map<String, Value> {
    let recovered = match extract_value(raw, Shape::Object) {
        Ok(Value::Object(map)) => map,
        _ => return serde_json::Map::new(),
    };

    // Models sometimes quote the keys twice; clean them.
    let mut cleaned = serde_json::Map::new();
    for (k, v) in recovered {
        let key = k.trim().trim_matches(|c| c == '"' || c == '\'').to_string();
        cleaned.insert(key, v);
    }
    cleaned
}

/// Read a column-mapping answer into a `ColumnMapping`.
///
/// Accepts the indices at the top level or nested under "column_mapping";
/// absent, null, negative, or non-numeric values mean "unknown". Index
/// validity against actual row widths is the row parser's concern.
pub fn recover_column_mapping(raw: &str) -> ColumnMapping {
    let map = recover_object(raw);
    let map = match map.get("column_mapping").and_then(|v| v.as_object()) {
        Some(nested) => nested.clone(),
        None => map,
    };

    let col = |key: &str| -> Option<usize> {
        match map.get(key)? {
            Value::Number(n) => n.as_u64().map(|v| v as usize),
            Value::String(s) => s.trim().parse::<usize>().ok(),
            _ => None,
        }
    };

    ColumnMapping {
        name_col: col("shareholder_name_col_idx"),
        shares_col: col("pre_round_shares_col_idx"),
        invested_col: col("pre_round_investment_col_idx"),
    }
}
