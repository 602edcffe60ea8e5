// src/record.rs

use rust_decimal::Decimal;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::fmt;
use time::Date;

use crate::defect::Defect;
use crate::schema::SchemaSpec;

/// A coerced field value in canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Date(Date),
    Amount(Decimal),
    Integer(i64),
}

impl FieldValue {
    /// Numeric view used by reconciliation. Text and dates have none.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Amount(d) => Some(*d),
            Self::Integer(i) => Some(Decimal::from(*i)),
            Self::Text(_) | Self::Date(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Date(d) => write!(f, "{d}"),
            Self::Amount(d) => write!(f, "{d}"),
            Self::Integer(i) => write!(f, "{i}"),
        }
    }
}

// Scalars on the wire: dates as ISO strings, amounts as exact decimal strings.
impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Integer(i) => serializer.serialize_i64(*i),
            other => serializer.collect_str(other),
        }
    }
}

/// How a field's value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    /// Taken from a key that matches the field name exactly.
    Verbatim,
    /// Found under an alias, inside a nested object, or by line scanning.
    Inferred,
    /// Filled from the schema default.
    Defaulted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum FieldState {
    Present { value: FieldValue },
    Absent,
    /// Present in the model output but not coercible to the field type.
    Malformed { raw: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldEntry {
    #[serde(flatten)]
    pub state: FieldState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
}

impl FieldEntry {
    pub fn present(value: FieldValue, provenance: Provenance) -> Self {
        Self {
            state: FieldState::Present { value },
            provenance: Some(provenance),
        }
    }

    pub fn absent() -> Self {
        Self {
            state: FieldState::Absent,
            provenance: None,
        }
    }

    pub fn malformed(raw: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            state: FieldState::Malformed { raw: raw.into() },
            provenance: Some(provenance),
        }
    }

    pub fn value(&self) -> Option<&FieldValue> {
        match &self.state {
            FieldState::Present { value } => Some(value),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        self.state == FieldState::Absent
    }
}

/// Which parsing stage produced the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParseMethod {
    /// The output contained a well-formed JSON object.
    Structured,
    /// JSON parsed after repairing common model mistakes.
    Repaired,
    /// No JSON object; `key: value` lines were scanned instead.
    Scanned,
    /// Nothing usable was found.
    Unparsed,
}

impl ParseMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Repaired => "repaired",
            Self::Scanned => "scanned",
            Self::Unparsed => "unparsed",
        }
    }
}

/// One candidate invoice. Holds exactly the schema's fields, in declaration
/// order; never edited after extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceRecord {
    #[serde(serialize_with = "serialize_fields")]
    fields: Vec<(String, FieldEntry)>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    extraction_defects: Vec<Defect>,
    parse_method: ParseMethod,
}

fn serialize_fields<S: Serializer>(
    fields: &[(String, FieldEntry)],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(fields.len()))?;
    for (name, entry) in fields {
        map.serialize_entry(name, entry)?;
    }
    map.end()
}

impl InvoiceRecord {
    pub(crate) fn from_parts(
        fields: Vec<(String, FieldEntry)>,
        extraction_defects: Vec<Defect>,
        parse_method: ParseMethod,
    ) -> Self {
        Self {
            fields,
            extraction_defects,
            parse_method,
        }
    }

    /// Every schema field absent.
    pub fn empty(schema: &SchemaSpec) -> Self {
        let fields = schema
            .fields()
            .iter()
            .map(|f| (f.name.clone(), FieldEntry::absent()))
            .collect();
        Self::from_parts(fields, Vec::new(), ParseMethod::Unparsed)
    }

    pub fn builder(schema: &SchemaSpec) -> RecordBuilder {
        RecordBuilder {
            record: Self::empty(schema),
        }
    }

    pub fn entry(&self, name: &str) -> Option<&FieldEntry> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, e)| e)
    }

    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.entry(name).and_then(FieldEntry::value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldEntry)> {
        self.fields.iter().map(|(n, e)| (n.as_str(), e))
    }

    /// Type-mismatch defects raised while coercing fields.
    pub fn extraction_defects(&self) -> &[Defect] {
        &self.extraction_defects
    }

    pub fn parse_method(&self) -> ParseMethod {
        self.parse_method
    }

    /// (present fields, total fields)
    pub fn coverage(&self) -> (usize, usize) {
        let filled = self
            .fields
            .iter()
            .filter(|(_, e)| e.value().is_some())
            .count();
        (filled, self.fields.len())
    }

    /// A copy with one field made absent.
    pub fn without(&self, name: &str) -> Self {
        let mut copy = self.clone();
        if let Some((_, entry)) = copy.fields.iter_mut().find(|(n, _)| n == name) {
            *entry = FieldEntry::absent();
        }
        copy
    }
}

/// Builds records directly from typed values, bypassing text extraction.
/// Names outside the schema are ignored.
pub struct RecordBuilder {
    record: InvoiceRecord,
}

impl RecordBuilder {
    pub fn set(mut self, name: &str, value: FieldValue) -> Self {
        if let Some((_, entry)) = self.record.fields.iter_mut().find(|(n, _)| n == name) {
            *entry = FieldEntry::present(value, Provenance::Verbatim);
        }
        self
    }

    pub fn text(self, name: &str, value: &str) -> Self {
        self.set(name, FieldValue::Text(value.to_string()))
    }

    pub fn amount(self, name: &str, value: Decimal) -> Self {
        self.set(name, FieldValue::Amount(value))
    }

    pub fn integer(self, name: &str, value: i64) -> Self {
        self.set(name, FieldValue::Integer(value))
    }

    pub fn date(self, name: &str, value: Date) -> Self {
        self.set(name, FieldValue::Date(value))
    }

    pub fn build(mut self) -> InvoiceRecord {
        self.record.parse_method = ParseMethod::Structured;
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaSpec;
    use time::macros::date;

    #[test]
    fn test_builder_ignores_unknown_fields() {
        let schema = SchemaSpec::invoice_default();
        let record = InvoiceRecord::builder(&schema)
            .text("invoice_number", "INV-1")
            .text("purchase_order", "PO-9")
            .build();

        assert!(record.entry("purchase_order").is_none());
        assert_eq!(record.iter().count(), schema.fields().len());
        assert_eq!(record.coverage(), (1, schema.fields().len()));
    }

    #[test]
    fn test_without_marks_field_absent() {
        let schema = SchemaSpec::invoice_default();
        let record = InvoiceRecord::builder(&schema)
            .amount("total", Decimal::new(5500, 2))
            .build();
        assert!(record.value("total").is_some());
        assert!(record.without("total").entry("total").unwrap().is_absent());
    }

    #[test]
    fn test_serializes_in_schema_order() {
        let schema = SchemaSpec::invoice_default();
        let record = InvoiceRecord::builder(&schema)
            .text("invoice_number", "INV-1")
            .date("invoice_date", date!(2024 - 03 - 05))
            .amount("total", Decimal::new(5500, 2))
            .build();

        let json = serde_json::to_string(&record).unwrap();
        let number_pos = json.find("invoice_number").unwrap();
        let total_pos = json.find("\"total\"").unwrap();
        assert!(number_pos < total_pos);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["fields"]["invoice_date"]["value"], "2024-03-05");
        assert_eq!(value["fields"]["total"]["value"], "55.00");
        assert_eq!(value["fields"]["total"]["provenance"], "verbatim");
        assert_eq!(value["fields"]["tax"]["state"], "absent");
        assert_eq!(value["parse_method"], "structured");
    }
}
