use crate::error::FillError;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One instruction to draw one value at one spot on a template page.
///
/// Coordinates are PDF points with the origin at the page's bottom-left
/// corner and Y increasing upward. For text, `(x, y)` is the baseline
/// start; for images it is the top-left corner of the image region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementDescriptor {
    #[serde(default)]
    pub field_name: String,
    #[serde(default, alias = "page")]
    pub page_index: usize,
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default = "default_font_size")]
    pub font_size: f32,
    #[serde(default)]
    pub font_name: Option<String>,
    #[serde(default)]
    pub is_constant: bool,
    #[serde(default)]
    pub constant_value: Option<String>,
    #[serde(default)]
    pub is_signature: bool,
    #[serde(default)]
    pub is_extra: bool,
}

fn default_font_size() -> f32 {
    12.0
}

impl PlacementDescriptor {
    pub fn text(field_name: impl Into<String>, page_index: usize, x: f32, y: f32) -> Self {
        Self {
            field_name: field_name.into(),
            page_index,
            x,
            y,
            font_size: default_font_size(),
            font_name: None,
            is_constant: false,
            constant_value: None,
            is_signature: false,
            is_extra: false,
        }
    }

    pub fn constant(value: impl Into<String>, page_index: usize, x: f32, y: f32) -> Self {
        Self {
            field_name: String::new(),
            page_index,
            x,
            y,
            font_size: default_font_size(),
            font_name: None,
            is_constant: true,
            constant_value: Some(value.into()),
            is_signature: false,
            is_extra: false,
        }
    }
}

/// Parse the placement list as persisted by a template store.
pub fn placements_from_json(json: &str) -> Result<Vec<PlacementDescriptor>, FillError> {
    serde_json::from_str(json)
        .map_err(|e| FillError::InvalidConfiguration(format!("invalid placement list: {e}")))
}

/// Per-record field data: canonical fields plus free-form dynamic fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordData {
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub dynamic_fields: BTreeMap<String, String>,
}

impl RecordData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn set_dynamic(&mut self, field: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.dynamic_fields.insert(field.into(), value.into());
        self
    }

    /// Canonical fields win, but an empty canonical value falls through to
    /// the dynamic map. A miss is the empty string, never an error.
    pub fn lookup(&self, field: &str) -> &str {
        match self.fields.get(field) {
            Some(value) if !value.is_empty() => value,
            _ => self
                .dynamic_fields
                .get(field)
                .map(String::as_str)
                .unwrap_or(""),
        }
    }
}

/// The value a placement resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderedValue {
    Text(String),
    Image { bytes: Vec<u8>, mime: String },
}

/// Resolve a placement against a record. Constants bypass the record
/// entirely; everything else goes through [`RecordData::lookup`]. No side
/// effects.
pub fn bind(placement: &PlacementDescriptor, record: &RecordData) -> RenderedValue {
    if placement.is_constant {
        if let Some(value) = placement.constant_value.as_deref() {
            if !value.is_empty() {
                return RenderedValue::Text(value.to_string());
            }
        }
    }
    let value = record.lookup(&placement.field_name);
    let rendered = classify(value);
    if placement.is_signature && matches!(rendered, RenderedValue::Text(_)) && !value.is_empty() {
        log::debug!(
            "signature field {} did not carry an image payload",
            placement.field_name
        );
    }
    rendered
}

/// A `data:image/...;base64,...` value is an image; anything else,
/// including a data URI whose payload fails to decode, stays text so a
/// malformed signature never aborts the record.
fn classify(value: &str) -> RenderedValue {
    if let Some(rest) = value.strip_prefix("data:image/") {
        if let Some((subtype, payload)) = rest.split_once(";base64,") {
            match base64::engine::general_purpose::STANDARD.decode(payload.trim()) {
                Ok(bytes) => {
                    return RenderedValue::Image {
                        bytes,
                        mime: format!("image/{subtype}"),
                    };
                }
                Err(err) => {
                    log::warn!("data URI with undecodable base64 payload, keeping as text: {err}");
                }
            }
        }
    }
    RenderedValue::Text(value.to_string())
}
