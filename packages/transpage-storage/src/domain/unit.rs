//! Translation unit model and wire codec
//!
//! Units travel inside job parameters in one of two wire forms:
//!
//! - structured: `{"id": "1", "text": "...", "type": "changed", "oldText": "..."}`
//! - legacy: `["1", "...", "changed", "..."]` (positional, `oldText` optional)
//!
//! [`TranslationUnit::decode_payload`] detects the form and converts both into
//! the same internal value; [`TranslationUnit::to_payload`] always writes the
//! structured form.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::{Result, StorageError};

static TVAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<tvar\s+name\s*=\s*(?:"([^"]+)"|'([^']+)'|([^\s>]+))\s*>(.*?)</tvar>"#)
        .unwrap_or_else(|e| panic!("tvar pattern: {}", e))
});

/// Change classification of a unit at mark time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitChange {
    New,
    Changed,
    Unchanged,
    Deleted,
}

impl UnitChange {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitChange::New => "new",
            UnitChange::Changed => "changed",
            UnitChange::Unchanged => "unchanged",
            UnitChange::Deleted => "deleted",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(UnitChange::New),
            "changed" => Ok(UnitChange::Changed),
            "unchanged" => Ok(UnitChange::Unchanged),
            "deleted" => Ok(UnitChange::Deleted),
            _ => Err(StorageError::malformed_payload(format!(
                "Unknown unit change type: {:?}",
                s
            ))),
        }
    }
}

impl fmt::Display for UnitChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detected wire form of a unit payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Structured,
    Legacy,
}

impl PayloadFormat {
    pub fn detect(payload: &Value) -> Result<Self> {
        match payload {
            Value::Object(_) => Ok(PayloadFormat::Structured),
            Value::Array(_) => Ok(PayloadFormat::Legacy),
            other => Err(StorageError::malformed_payload(format!(
                "Unit payload must be an object or an array, got {}",
                json_type_name(other)
            ))),
        }
    }
}

/// Variable declared inline with `<tvar name="x">value</tvar>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitVariable {
    pub name: String,
    pub value: String,
}

/// One translatable fragment of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationUnit {
    /// Stable within the page
    pub id: String,
    /// Source text, possibly with `<tvar>` markup
    pub text: String,
    pub change: UnitChange,
    /// Previous source text of a changed unit
    pub old_text: Option<String>,
}

impl TranslationUnit {
    pub fn new(id: impl Into<String>, text: impl Into<String>, change: UnitChange) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            change,
            old_text: None,
        }
    }

    pub fn with_old_text(mut self, old_text: impl Into<String>) -> Self {
        self.old_text = Some(old_text.into());
        self
    }

    /// A changed unit invalidates existing translations.
    pub fn marks_fuzzy(&self) -> bool {
        self.change == UnitChange::Changed
    }

    /// Variables in order of appearance.
    pub fn variables(&self) -> Vec<UnitVariable> {
        TVAR.captures_iter(&self.text)
            .filter_map(|caps| {
                let name = caps.get(1).or(caps.get(2)).or(caps.get(3))?;
                let value = caps.get(4)?;
                Some(UnitVariable {
                    name: name.as_str().to_string(),
                    value: value.as_str().to_string(),
                })
            })
            .collect()
    }

    /// Text stored on the unit page: each variable becomes `$name`.
    pub fn text_with_variables(&self) -> String {
        TVAR.replace_all(&self.text, |caps: &regex::Captures<'_>| {
            let name = caps
                .get(1)
                .or(caps.get(2))
                .or(caps.get(3))
                .map_or("", |m| m.as_str());
            format!("${}", name)
        })
        .into_owned()
    }

    /// Text shown on the source page: each variable becomes its value.
    pub fn text_for_rendering(&self) -> String {
        TVAR.replace_all(&self.text, "$4").into_owned()
    }

    /// Substitute `$name` references in a translation with the variable values.
    pub fn substitute_variables(&self, translation: &str) -> String {
        let mut variables = self.variables();
        // Longest name first so `$ab` is not consumed by `$a`
        variables.sort_by(|a, b| b.name.len().cmp(&a.name.len()));
        variables.iter().fold(translation.to_string(), |acc, var| {
            acc.replace(&format!("${}", var.name), &var.value)
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Wire codec
    // ═══════════════════════════════════════════════════════════════════════

    /// Structured wire form.
    pub fn to_payload(&self) -> Value {
        let mut payload = json!({
            "id": self.id,
            "text": self.text,
            "type": self.change.as_str(),
        });
        if let (Some(old), Value::Object(map)) = (&self.old_text, &mut payload) {
            map.insert("oldText".to_string(), Value::String(old.clone()));
        }
        payload
    }

    /// Decode either wire form.
    pub fn decode_payload(payload: &Value) -> Result<Self> {
        match PayloadFormat::detect(payload)? {
            PayloadFormat::Structured => Self::decode_structured(payload),
            PayloadFormat::Legacy => Self::decode_legacy(payload),
        }
    }

    /// Decode a batch; the first malformed entry fails the whole batch.
    pub fn decode_all(payloads: &[Value]) -> Result<Vec<Self>> {
        payloads
            .iter()
            .enumerate()
            .map(|(index, payload)| {
                Self::decode_payload(payload).map_err(|e| {
                    StorageError::malformed_payload(format!("Unit #{}: {}", index, e.message))
                })
            })
            .collect()
    }

    fn decode_structured(payload: &Value) -> Result<Self> {
        let id = required_string(payload.get("id"), "id", true)?;
        let text = required_string(payload.get("text"), "text", false)?;
        let change = UnitChange::from_str(&required_string(payload.get("type"), "type", false)?)?;
        let old_text = optional_string(payload.get("oldText"), "oldText")?;

        Self::build(id, text, change, old_text)
    }

    fn decode_legacy(payload: &Value) -> Result<Self> {
        let items = payload.as_array().map(Vec::as_slice).unwrap_or_default();
        if !(3..=4).contains(&items.len()) {
            return Err(StorageError::malformed_payload(format!(
                "Legacy unit payload must have 3 or 4 elements, got {}",
                items.len()
            )));
        }

        let id = required_string(items.first(), "[0] id", true)?;
        let text = required_string(items.get(1), "[1] text", false)?;
        let change = UnitChange::from_str(&required_string(items.get(2), "[2] type", false)?)?;
        let old_text = optional_string(items.get(3), "[3] oldText")?;

        Self::build(id, text, change, old_text)
    }

    fn build(
        id: String,
        text: String,
        change: UnitChange,
        old_text: Option<String>,
    ) -> Result<Self> {
        if id.is_empty() || id.contains('/') {
            return Err(StorageError::malformed_payload(format!(
                "Invalid unit id: {:?}",
                id
            )));
        }
        Ok(Self {
            id,
            text,
            change,
            old_text,
        })
    }
}

/// `accept_number` lets a JSON number stand in for the string; older
/// producers wrote numeric unit ids.
fn required_string(value: Option<&Value>, field: &str, accept_number: bool) -> Result<String> {
    match value {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) if accept_number => Ok(n.to_string()),
        Some(other) => Err(StorageError::malformed_payload(format!(
            "Field {} must be a string, got {}",
            field,
            json_type_name(other)
        ))),
        None => Err(StorageError::malformed_payload(format!(
            "Missing field {}",
            field
        ))),
    }
}

fn optional_string(value: Option<&Value>, field: &str) -> Result<Option<String>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(StorageError::malformed_payload(format!(
            "Field {} must be a string or null, got {}",
            field,
            json_type_name(other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
