//! PDF object emission for the overlay compositor: font dictionaries,
//! image XObjects, and content-stream string encodings.

use crate::error::FillError;
use crate::font::{EmbeddedFont, FontHandle};
use crate::raster::EmbeddedImage;
use crate::types::fmt_f32;
use lopdf::{Document, Object, ObjectId, Stream, dictionary};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Fonts used by a document's overlays, accumulated across pages.
///
/// A slot reserves its top-level font object id up front so page
/// resources can reference it while text is still being emitted; the
/// actual objects (font program, descriptor, /W array, ToUnicode) are
/// written once at `finish`, when the full glyph usage is known.
pub(crate) struct DocFonts {
    entries: Vec<FontSlot>,
    by_key: HashMap<String, usize>,
}

struct FontSlot {
    resource: String,
    object_id: ObjectId,
    handle: FontHandle,
    glyphs: BTreeMap<u16, String>,
}

impl DocFonts {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_key: HashMap::new(),
        }
    }

    pub(crate) fn slot(&mut self, doc: &mut Document, handle: &FontHandle) -> usize {
        let key = handle_key(handle);
        if let Some(&index) = self.by_key.get(&key) {
            return index;
        }
        let index = self.entries.len();
        self.entries.push(FontSlot {
            resource: format!("FS_F{}", index + 1),
            object_id: doc.new_object_id(),
            handle: handle.clone(),
            glyphs: BTreeMap::new(),
        });
        self.by_key.insert(key, index);
        index
    }

    pub(crate) fn resource(&self, index: usize) -> &str {
        &self.entries[index].resource
    }

    pub(crate) fn object_id(&self, index: usize) -> ObjectId {
        self.entries[index].object_id
    }

    /// Encode `text` as the Tj operand for the slot's font, recording
    /// glyph usage for embedded fonts.
    pub(crate) fn encode_text(&mut self, index: usize, text: &str) -> String {
        let slot = &mut self.entries[index];
        match &slot.handle {
            FontHandle::Embedded(font) => {
                let mut hex = String::with_capacity(text.chars().count() * 4 + 2);
                hex.push('<');
                for ch in text.chars() {
                    let gid = font.glyph_id(ch);
                    if gid != 0 {
                        slot.glyphs.entry(gid).or_insert_with(|| ch.to_string());
                    }
                    hex.push_str(&format!("{:04X}", gid));
                }
                hex.push('>');
                hex
            }
            FontHandle::BuiltinCid(_) => encode_utf16be_hex(text),
            FontHandle::Base(_) => encode_literal(text),
        }
    }

    /// Write every accumulated font's object graph into the document.
    pub(crate) fn finish(self, doc: &mut Document) -> Result<(), FillError> {
        for slot in self.entries {
            match &slot.handle {
                FontHandle::Embedded(font) => {
                    write_embedded_font(doc, slot.object_id, font, &slot.glyphs);
                }
                FontHandle::BuiltinCid(name) => {
                    write_builtin_cid_font(doc, slot.object_id, name);
                }
                FontHandle::Base(name) => {
                    doc.objects.insert(
                        slot.object_id,
                        Object::Dictionary(dictionary! {
                            "Type" => "Font",
                            "Subtype" => "Type1",
                            "BaseFont" => *name,
                            "Encoding" => "WinAnsiEncoding",
                        }),
                    );
                }
            }
        }
        Ok(())
    }
}

fn handle_key(handle: &FontHandle) -> String {
    match handle {
        FontHandle::Embedded(font) => format!("embed:{}", font.name),
        FontHandle::BuiltinCid(name) => format!("cid:{name}"),
        FontHandle::Base(name) => format!("base:{name}"),
    }
}

/// Type0 / CIDFontType2 / Identity-H with the font program embedded as
/// FontFile2 and a /W array covering exactly the glyphs this document
/// shows.
fn write_embedded_font(
    doc: &mut Document,
    type0_id: ObjectId,
    font: &Arc<EmbeddedFont>,
    glyphs: &BTreeMap<u16, String>,
) {
    let base = sanitize_font_name(&font.name);
    let metrics = &font.metrics;

    let mut glyphs = glyphs.clone();
    if glyphs.is_empty() {
        // At least cover space so the W array and CMap are never empty.
        let gid = font.glyph_id(' ');
        if gid != 0 {
            glyphs.insert(gid, " ".to_string());
        }
    }

    let font_file_id = doc.add_object(Stream::new(
        dictionary! { "Length1" => font.data.len() as i64 },
        font.data.clone(),
    ));

    let descriptor_id = doc.add_object(dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => base.as_str(),
        "Flags" => metrics.flags(),
        "FontBBox" => vec![
            Object::Integer(metrics.bbox.0 as i64),
            Object::Integer(metrics.bbox.1 as i64),
            Object::Integer(metrics.bbox.2 as i64),
            Object::Integer(metrics.bbox.3 as i64),
        ],
        "ItalicAngle" => metrics.italic_angle as i64,
        "Ascent" => metrics.ascent as i64,
        "Descent" => metrics.descent as i64,
        "CapHeight" => metrics.cap_height as i64,
        "StemV" => 80,
        "MissingWidth" => metrics.missing_width as i64,
        "FontFile2" => font_file_id,
    });

    let mut w_array: Vec<Object> = Vec::with_capacity(glyphs.len() * 2);
    for &gid in glyphs.keys() {
        let advance = font.glyph_advance(gid);
        let advance = if advance > 0 {
            advance
        } else {
            metrics.missing_width
        };
        w_array.push(Object::Integer(gid as i64));
        w_array.push(Object::Array(vec![Object::Integer(advance as i64)]));
    }

    let cid_font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "CIDFontType2",
        "BaseFont" => base.as_str(),
        "CIDSystemInfo" => dictionary! {
            "Registry" => Object::string_literal("Adobe"),
            "Ordering" => Object::string_literal("Identity"),
            "Supplement" => 0,
        },
        "FontDescriptor" => descriptor_id,
        "DW" => 1000,
        "W" => w_array,
        "CIDToGIDMap" => "Identity",
    });

    let to_unicode_id = doc.add_object(Stream::new(
        dictionary! {},
        to_unicode_cmap(&glyphs).into_bytes(),
    ));

    doc.objects.insert(
        type0_id,
        Object::Dictionary(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => base.as_str(),
            "Encoding" => "Identity-H",
            "DescendantFonts" => vec![Object::Reference(cid_font_id)],
            "ToUnicode" => to_unicode_id,
        }),
    );
}

/// A standard CJK CID font supplied by the viewer (no embedded program),
/// addressed through the Adobe-GB1 UniGB-UCS2-H CMap.
fn write_builtin_cid_font(doc: &mut Document, type0_id: ObjectId, name: &str) {
    let descriptor_id = doc.add_object(dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => name,
        "Flags" => 4,
        "FontBBox" => vec![
            Object::Integer(-25),
            Object::Integer(-254),
            Object::Integer(1000),
            Object::Integer(880),
        ],
        "ItalicAngle" => 0,
        "Ascent" => 880,
        "Descent" => -120,
        "CapHeight" => 880,
        "StemV" => 93,
    });

    let cid_font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "CIDFontType0",
        "BaseFont" => name,
        "CIDSystemInfo" => dictionary! {
            "Registry" => Object::string_literal("Adobe"),
            "Ordering" => Object::string_literal("GB1"),
            "Supplement" => 2,
        },
        "FontDescriptor" => descriptor_id,
        "DW" => 1000,
    });

    doc.objects.insert(
        type0_id,
        Object::Dictionary(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => name,
            "Encoding" => "UniGB-UCS2-H",
            "DescendantFonts" => vec![Object::Reference(cid_font_id)],
        }),
    );
}

/// Image XObject (DeviceRGB, 8 bpc) with the alpha plane as an SMask.
pub(crate) fn add_image_xobject(doc: &mut Document, image: &EmbeddedImage) -> ObjectId {
    let smask_id = image.alpha.as_ref().map(|alpha| {
        doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => image.px_width as i64,
                "Height" => image.px_height as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            alpha.clone(),
        ))
    });

    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => image.px_width as i64,
        "Height" => image.px_height as i64,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
    };
    if let Some(id) = smask_id {
        dict.set("SMask", Object::Reference(id));
    }
    doc.add_object(Stream::new(dict, image.rgb.clone()))
}

/// Text-showing operations with the baseline at `(x, y)`. Placement
/// coordinates are already in PDF space (bottom-left origin), so no flip.
pub(crate) fn text_ops(resource: &str, font_size: f32, x: f32, y: f32, operand: &str) -> String {
    format!(
        "BT\n/{} {} Tf\n{} {} Td\n{} Tj\nET\n",
        resource,
        fmt_f32(font_size),
        fmt_f32(x),
        fmt_f32(y),
        operand
    )
}

/// Image-drawing operations; `(x, y)` is the top-left reference point, so
/// the rectangle's bottom-left corner lands at `(x, y - height)`.
pub(crate) fn image_ops(resource: &str, image: &EmbeddedImage, x: f32, y: f32) -> String {
    format!(
        "q\n{} 0 0 {} {} {} cm\n/{} Do\nQ\n",
        fmt_f32(image.width_pt),
        fmt_f32(image.height_pt),
        fmt_f32(x),
        fmt_f32(y - image.height_pt),
        resource
    )
}

fn encode_utf16be_hex(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 4 + 2);
    out.push('<');
    for unit in text.encode_utf16() {
        out.push_str(&format!("{:04X}", unit));
    }
    out.push('>');
    out
}

/// Literal string for a base-14 font: Latin-1 range passes through (with
/// the PDF delimiter escapes), anything beyond becomes `?`. Degraded
/// output, not an error.
fn encode_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('(');
    for ch in text.chars() {
        let code = ch as u32;
        let byte = if code <= 0xFF { code as u8 } else { b'?' };
        match byte {
            b'(' | b')' | b'\\' => {
                out.push('\\');
                out.push(byte as char);
            }
            0x20..=0x7E => out.push(byte as char),
            _ => out.push_str(&format!("\\{:03o}", byte)),
        }
    }
    out.push(')');
    out
}

fn to_unicode_cmap(glyphs: &BTreeMap<u16, String>) -> String {
    let mut out = String::new();
    out.push_str("/CIDInit /ProcSet findresource begin\n");
    out.push_str("12 dict begin\n");
    out.push_str("begincmap\n");
    out.push_str("/CIDSystemInfo << /Registry (Adobe) /Ordering (Identity) /Supplement 0 >> def\n");
    out.push_str("/CMapName /Adobe-Identity-UCS def\n");
    out.push_str("/CMapType 2 def\n");
    out.push_str("1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n");

    let entries: Vec<(u16, &String)> = glyphs.iter().map(|(g, s)| (*g, s)).collect();
    let mut idx = 0usize;
    while idx < entries.len() {
        let end = (idx + 100).min(entries.len());
        out.push_str(&format!("{} beginbfchar\n", end - idx));
        for (gid, s) in &entries[idx..end] {
            let mut uni = String::new();
            for unit in s.encode_utf16() {
                uni.push_str(&format!("{:04X}", unit));
            }
            out.push_str(&format!("<{:04X}> <{}>\n", gid, uni));
        }
        out.push_str("endbfchar\n");
        idx = end;
    }

    out.push_str("endcmap\n");
    out.push_str("CMapName currentdict /CMap defineresource pop\n");
    out.push_str("end\nend\n");
    out
}

fn sanitize_font_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '_') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "EmbeddedFont".to_string()
    } else {
        cleaned
    }
}
