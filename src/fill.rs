use crate::error::FillError;
use crate::font::FontSource;
use crate::overlay;
use crate::placement::{PlacementDescriptor, RecordData};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::path::Path;

/// Container kinds the engine can fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    /// Positional overlay fill; requires a placement list.
    Pdf,
    /// Plain textual container filled by `{{field}}` substitution.
    Text,
}

const TEXT_EXTENSIONS: &[&str] = &["txt", "csv", "md", "html", "htm", "xml", "svg"];

impl TemplateKind {
    pub fn from_path(path: &Path) -> Result<Self, FillError> {
        let ext = path
            .extension()
            .and_then(|v| v.to_str())
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(TemplateKind::Pdf),
            ext if TEXT_EXTENSIONS.contains(&ext) => Ok(TemplateKind::Text),
            "" => Err(FillError::UnsupportedTemplate(
                "(no file extension)".to_string(),
            )),
            other => Err(FillError::UnsupportedTemplate(format!(".{other}"))),
        }
    }
}

/// Fill one template for one record. The output is either a complete
/// document or an error, never truncated bytes.
pub fn fill_template(
    template: &[u8],
    kind: TemplateKind,
    record: &RecordData,
    placements: &[PlacementDescriptor],
    fonts: &dyn FontSource,
) -> Result<Vec<u8>, FillError> {
    match kind {
        TemplateKind::Pdf => {
            if placements.is_empty() {
                return Err(FillError::MissingPlacements);
            }
            overlay::fill_pdf(template, record, placements, fonts)
        }
        TemplateKind::Text => {
            let text = std::str::from_utf8(template).map_err(|_| {
                FillError::InvalidConfiguration(
                    "textual template is not valid UTF-8".to_string(),
                )
            })?;
            Ok(substitute_tokens(text, record).into_bytes())
        }
    }
}

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("token pattern"));

/// Replace every `{{field}}` token with the record's value for that
/// field; a missing field substitutes the empty string.
fn substitute_tokens(text: &str, record: &RecordData) -> String {
    TOKEN_RE
        .replace_all(text, |caps: &Captures<'_>| {
            record.lookup(&caps[1]).to_string()
        })
        .into_owned()
}
