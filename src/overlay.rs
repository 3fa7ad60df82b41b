//! Page overlay composition: render every placement for a page into a
//! Form XObject sized to that page's box, then stamp it over the page's
//! existing content with a single `Do`.

use crate::error::{FillError, pdf_err};
use crate::font::FontSource;
use crate::pdf::{DocFonts, add_image_xobject, image_ops, text_ops};
use crate::placement::{PlacementDescriptor, RecordData, RenderedValue, bind};
use crate::raster;
use crate::types::Size;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};
use std::collections::BTreeMap;

/// Fill a PDF template in memory: one overlay per page that has
/// placements, every other page passes through untouched.
pub(crate) fn fill_pdf(
    template: &[u8],
    record: &RecordData,
    placements: &[PlacementDescriptor],
    fonts: &dyn FontSource,
) -> Result<Vec<u8>, FillError> {
    let mut doc = Document::load_mem(template).map_err(pdf_err)?;
    if doc.is_encrypted() {
        return Err(FillError::InvalidConfiguration(
            "template PDF is encrypted".to_string(),
        ));
    }

    let page_ids: Vec<ObjectId> = doc.get_pages().values().copied().collect();

    // Group by page index only; same-page order stays input order, so a
    // later placement draws over an earlier one at the same spot.
    let mut by_page: BTreeMap<usize, Vec<&PlacementDescriptor>> = BTreeMap::new();
    for placement in placements {
        by_page.entry(placement.page_index).or_default().push(placement);
    }

    let mut doc_fonts = DocFonts::new();
    let mut image_counter = 0usize;

    for (&page_index, group) in &by_page {
        let Some(&page_id) = page_ids.get(page_index) else {
            log::warn!(
                "skipping {} placement(s) on page {} of a {}-page template",
                group.len(),
                page_index,
                page_ids.len()
            );
            continue;
        };
        compose_page(
            &mut doc,
            page_id,
            page_index,
            group,
            record,
            fonts,
            &mut doc_fonts,
            &mut image_counter,
        )?;
    }

    doc_fonts.finish(&mut doc)?;
    doc.prune_objects();
    doc.renumber_objects();
    doc.compress();

    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    Ok(out)
}

/// Render one page's placements into an overlay form and merge it onto
/// the page. A failed placement is skipped; the page is never aborted.
fn compose_page(
    doc: &mut Document,
    page_id: ObjectId,
    page_index: usize,
    group: &[&PlacementDescriptor],
    record: &RecordData,
    fonts: &dyn FontSource,
    doc_fonts: &mut DocFonts,
    image_counter: &mut usize,
) -> Result<(), FillError> {
    let page_dict = doc
        .get_object(page_id)
        .and_then(Object::as_dict)
        .map_err(pdf_err)?
        .clone();
    let bbox = page_box(doc, &page_dict);

    let mut ops = String::new();
    let mut form_fonts: Vec<(String, ObjectId)> = Vec::new();
    let mut form_images: Vec<(String, ObjectId)> = Vec::new();

    for placement in group {
        match bind(placement, record) {
            RenderedValue::Text(text) => {
                if text.is_empty() {
                    continue;
                }
                let handle = fonts.resolve(placement.font_name.as_deref());
                let slot = doc_fonts.slot(doc, &handle);
                let operand = doc_fonts.encode_text(slot, &text);
                let resource = doc_fonts.resource(slot).to_string();
                if !form_fonts.iter().any(|(name, _)| *name == resource) {
                    form_fonts.push((resource.clone(), doc_fonts.object_id(slot)));
                }
                ops.push_str(&text_ops(
                    &resource,
                    placement.font_size,
                    placement.x,
                    placement.y,
                    &operand,
                ));
            }
            RenderedValue::Image { bytes, .. } => {
                let image = match raster::prepare(&bytes, placement.font_size) {
                    Ok(image) => image,
                    Err(err) => {
                        log::warn!(
                            "skipping placement {} on page {}: {err}",
                            placement.field_name,
                            page_index
                        );
                        continue;
                    }
                };
                *image_counter += 1;
                let resource = format!("FS_Im{}", *image_counter);
                let image_id = add_image_xobject(doc, &image);
                form_images.push((resource.clone(), image_id));
                ops.push_str(&image_ops(&resource, &image, placement.x, placement.y));
            }
        }
    }

    if ops.is_empty() {
        return Ok(());
    }

    let mut resources = Dictionary::new();
    if !form_fonts.is_empty() {
        let mut font_dict = Dictionary::new();
        for (name, id) in &form_fonts {
            font_dict.set(name.as_bytes().to_vec(), Object::Reference(*id));
        }
        resources.set("Font", Object::Dictionary(font_dict));
    }
    if !form_images.is_empty() {
        let mut xobject_dict = Dictionary::new();
        for (name, id) in &form_images {
            xobject_dict.set(name.as_bytes().to_vec(), Object::Reference(*id));
        }
        resources.set("XObject", Object::Dictionary(xobject_dict));
    }

    let content = format!("q\n{ops}Q\n").into_bytes();
    let form_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "FormType" => 1,
            "BBox" => bbox.iter().map(|v| Object::Real(*v)).collect::<Vec<_>>(),
            "Resources" => resources,
        },
        content,
    ));
    let form_name = format!("FS_OVL_{}", page_index + 1);

    let mut page_resources = page_resources_dict(&page_dict, doc);
    let mut xobjects = page_xobject_dict(&page_resources, doc);
    xobjects.set(form_name.as_bytes().to_vec(), Object::Reference(form_id));
    page_resources.set("XObject", Object::Dictionary(xobjects));

    {
        let page_mut = doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .map_err(pdf_err)?;
        page_mut.set("Resources", Object::Dictionary(page_resources));
    }

    let stamp = format!("q /{} Do Q\n", form_name).into_bytes();
    doc.add_page_contents(page_id, stamp).map_err(pdf_err)?;

    Ok(())
}

/// The page's box in points: CropBox, else MediaBox, resolving indirect
/// references and walking up the Pages tree with a bounded depth; A4 as
/// the final fallback.
fn page_box(doc: &Document, page: &Dictionary) -> [f32; 4] {
    page_box_recursive(doc, page, 10).unwrap_or_else(|| {
        let a4 = Size::a4();
        [0.0, 0.0, a4.width.to_f32(), a4.height.to_f32()]
    })
}

fn page_box_recursive(doc: &Document, node: &Dictionary, depth: usize) -> Option<[f32; 4]> {
    if depth == 0 {
        return None;
    }
    for key in [b"CropBox".as_slice(), b"MediaBox".as_slice()] {
        if let Some(rect) = rect_entry(doc, node, key) {
            return Some(rect);
        }
    }
    if let Ok(Object::Reference(parent_id)) = node.get(b"Parent") {
        if let Ok(parent) = doc.get_object(*parent_id).and_then(Object::as_dict) {
            return page_box_recursive(doc, parent, depth - 1);
        }
    }
    None
}

fn rect_entry(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<[f32; 4]> {
    let arr = match dict.get(key).ok()? {
        Object::Array(arr) => arr.clone(),
        Object::Reference(id) => match doc.get_object(*id).ok()? {
            Object::Array(arr) => arr.clone(),
            _ => return None,
        },
        _ => return None,
    };
    if arr.len() != 4 {
        return None;
    }
    let mut out = [0.0f32; 4];
    for (slot, value) in out.iter_mut().zip(arr.iter()) {
        *slot = match value {
            Object::Integer(i) => *i as f32,
            Object::Real(r) => *r,
            _ => return None,
        };
    }
    Some(out)
}

fn page_resources_dict(page: &Dictionary, doc: &Document) -> Dictionary {
    match page.get(b"Resources") {
        Ok(Object::Dictionary(d)) => d.clone(),
        Ok(Object::Reference(id)) => doc
            .get_object(*id)
            .ok()
            .and_then(|o| o.as_dict().ok())
            .cloned()
            .unwrap_or_default(),
        _ => Dictionary::new(),
    }
}

fn page_xobject_dict(resources: &Dictionary, doc: &Document) -> Dictionary {
    match resources.get(b"XObject") {
        Ok(Object::Dictionary(d)) => d.clone(),
        Ok(Object::Reference(id)) => doc
            .get_object(*id)
            .ok()
            .and_then(|o| o.as_dict().ok())
            .cloned()
            .unwrap_or_default(),
        _ => Dictionary::new(),
    }
}
