// src/extract/mod.rs

pub mod coerce;
mod scan;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::defect::{Defect, Severity};
use crate::record::{FieldEntry, FieldValue, InvoiceRecord, ParseMethod, Provenance};
use crate::schema::{SchemaField, SchemaSpec, normalize_key};
use coerce::RawValue;

pub use scan::{repair_json, scan_pairs};

/// A value found in the model output, before it is matched to a field.
#[derive(Debug, Clone)]
struct Candidate {
    value: RawValue,
    /// Top-level key of a parsed object, as opposed to a flattened or
    /// scanned one.
    direct: bool,
}

/// Turns raw model output into an `InvoiceRecord` for one schema.
///
/// Strict JSON first, then repaired JSON, then line scanning. A field that
/// cannot be found is absent; a field that cannot be coerced is malformed and
/// gets a type-mismatch defect. Neither stops the other fields.
pub struct FieldExtractor<'a> {
    schema: &'a SchemaSpec,
}

impl<'a> FieldExtractor<'a> {
    pub fn new(schema: &'a SchemaSpec) -> Self {
        Self { schema }
    }

    pub fn extract(&self, raw: &str) -> InvoiceRecord {
        let (candidates, method) = parse_candidates(raw);
        if method == ParseMethod::Unparsed {
            warn!(chars = raw.len(), "Nothing usable in model output");
        }

        let mut used = vec![false; candidates.len()];
        let mut fields = Vec::with_capacity(self.schema.fields().len());
        let mut defects = Vec::new();

        for field in self.schema.fields() {
            let found = lookup(&candidates, field, &mut used);

            let entry = match found {
                Some((idx, exact)) => {
                    let candidate = &candidates[idx].1;
                    let provenance = if exact && candidate.direct {
                        Provenance::Verbatim
                    } else {
                        Provenance::Inferred
                    };
                    match coerce::coerce(field.field_type, &candidate.value) {
                        Ok(value) => FieldEntry::present(canonical(field, value), provenance),
                        Err(e) => {
                            let severity = if field.required {
                                Severity::Error
                            } else {
                                Severity::Warning
                            };
                            defects.push(Defect::type_mismatch(
                                &field.name,
                                severity,
                                format!("expected {}: {e}", field.field_type),
                            ));
                            FieldEntry::malformed(candidate.value.display(), provenance)
                        }
                    }
                }
                None => default_entry(field),
            };
            fields.push((field.name.clone(), entry));
        }

        let dropped = used.iter().filter(|u| !**u).count();
        if dropped > 0 {
            debug!(dropped, "Ignoring keys outside the schema");
        }

        let record = InvoiceRecord::from_parts(fields, defects, method);
        let (filled, total) = record.coverage();
        debug!(filled, total, method = ?method, "Extracted candidate record");
        record
    }
}

/// Canonical spelling for formatted text. Values of the wrong shape are kept
/// as written and left to validation.
fn canonical(field: &SchemaField, value: FieldValue) -> FieldValue {
    match (field.format, value) {
        (Some(format), FieldValue::Text(text)) => {
            FieldValue::Text(format.normalize(&text).unwrap_or(text))
        }
        (_, value) => value,
    }
}

fn default_entry(field: &SchemaField) -> FieldEntry {
    match &field.default {
        Some(default) if !field.required => coerce::coerce_str(field.field_type, default)
            .map(|v| FieldEntry::present(v, Provenance::Defaulted))
            .unwrap_or_else(|_| FieldEntry::absent()),
        _ => FieldEntry::absent(),
    }
}

/// Find a field's candidate: its own name first, then its aliases.
/// Placeholder values (`null`, `""`, `N/A`) fall through to the next key.
/// Returns the candidate index and whether the name matched exactly.
fn lookup(
    candidates: &[(String, Candidate)],
    field: &SchemaField,
    used: &mut [bool],
) -> Option<(usize, bool)> {
    for (n, key) in field.keys().enumerate() {
        for (idx, (k, candidate)) in candidates.iter().enumerate() {
            if *k != key {
                continue;
            }
            used[idx] = true;
            if !candidate.value.is_placeholder() {
                return Some((idx, n == 0));
            }
        }
    }
    None
}

fn parse_candidates(raw: &str) -> (Vec<(String, Candidate)>, ParseMethod) {
    let body = strip_fences(raw);

    if let Some(object) = extract_json_object(body) {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(object) {
            return (flatten(&map), ParseMethod::Structured);
        }
        let repaired = repair_json(object);
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&repaired) {
            debug!("Model output parsed after JSON repair");
            return (flatten(&map), ParseMethod::Repaired);
        }
    }

    let scanned: Vec<(String, Candidate)> = scan_pairs(body)
        .into_iter()
        .map(|(key, value)| {
            let candidate = Candidate {
                value: RawValue::Text(value),
                direct: false,
            };
            (key, candidate)
        })
        .collect();

    if scanned.is_empty() {
        (scanned, ParseMethod::Unparsed)
    } else {
        debug!(pairs = scanned.len(), "Model output scanned line by line");
        (scanned, ParseMethod::Scanned)
    }
}

/// Strip markdown fences if the model added them despite instructions.
fn strip_fences(s: &str) -> &str {
    s.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// The outermost `{...}` in a string that may carry surrounding text
/// (e.g. reasoning tokens).
fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    (end > start).then(|| &s[start..=end])
}

/// Flatten nested objects into `parent_child` keys; arrays are skipped.
fn flatten(map: &Map<String, Value>) -> Vec<(String, Candidate)> {
    let mut out = Vec::new();
    flatten_into(map, "", &mut out);
    out
}

fn flatten_into(map: &Map<String, Value>, prefix: &str, out: &mut Vec<(String, Candidate)>) {
    for (key, value) in map {
        let key = normalize_key(key);
        let full = if prefix.is_empty() {
            key
        } else {
            format!("{prefix}_{key}")
        };
        match value {
            Value::Object(inner) => flatten_into(inner, &full, out),
            Value::Array(items) => {
                debug!(key = %full, len = items.len(), "Skipping array value");
            }
            scalar => {
                if out.iter().all(|(k, _)| *k != full) {
                    out.push((
                        full,
                        Candidate {
                            value: RawValue::Json(scalar.clone()),
                            direct: prefix.is_empty(),
                        },
                    ));
                }
            }
        }
    }
}
