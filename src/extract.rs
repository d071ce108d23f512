//! PDF extraction: page text and embedded raster images.
//!
//! For each source document the [`Extractor`] writes
//!
//! ```text
//! {output}/extracted_text/{doc_stem}.txt
//! {output}/extracted_images/{doc_stem}/page{N}_img{M}.{ext}
//! ```
//!
//! and exactly one `pdf_processing` ledger row. Text and image extraction
//! succeed or fail independently; a failure in one is recorded next to the
//! other's result and never aborts the batch.
//!
//! Image encodings:
//!
//! | Stream filter | Color space | Output |
//! |---------------|-------------|--------|
//! | `DCTDecode` | any | `.jpg`, recompressed at `jpeg_quality` |
//! | `JPXDecode` | any | `.jp2`, bytes unchanged |
//! | none, `FlateDecode`, `LZWDecode`, `ASCII85Decode` | Gray, RGB, CMYK, ICCBased, Indexed; 1/2/4/8/16 bits | `.png` |
//!
//! Stencil masks (`/ImageMask true`) decode as 1-bit gray. An image that
//! cannot be decoded (JBIG2, CCITT, Lab, Separation, truncated samples) is
//! named in the record's `error_message` and leaves `images_extracted`
//! false. The images that did decode are still written and listed.

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::xobject::PdfImage;
use lopdf::{Document, Object, ObjectId};
use std::io::Cursor;
use std::path::Path;

use crate::error::{LedgerError, PipelineError};
use crate::hasher;
use crate::layout::OutputLayout;
use crate::ledger::Ledger;
use crate::models::{document_id_for, now_rfc3339, ExtractedImage, ExtractionRecord};

/// What [`Extractor::process`] did with one path.
#[derive(Debug, Clone)]
pub enum ExtractionOutcome {
    /// A record already existed; nothing was written.
    AlreadyProcessed(ExtractionRecord),
    /// Same bytes as an earlier document. The file was removed.
    Duplicate(ExtractionRecord),
    Processed(ExtractionRecord),
}

impl ExtractionOutcome {
    pub fn record(&self) -> &ExtractionRecord {
        match self {
            ExtractionOutcome::AlreadyProcessed(r)
            | ExtractionOutcome::Duplicate(r)
            | ExtractionOutcome::Processed(r) => r,
        }
    }
}

pub struct Extractor {
    ledger: Ledger,
    layout: OutputLayout,
    jpeg_quality: u8,
}

impl Extractor {
    pub fn new(ledger: Ledger, layout: OutputLayout, jpeg_quality: u8) -> Self {
        Self {
            ledger,
            layout,
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    pub async fn process(&self, pdf_path: &Path) -> Result<ExtractionOutcome, PipelineError> {
        let key = pdf_path.to_string_lossy().to_string();

        if let Some(existing) = self.ledger.lookup_extraction(&key).await? {
            tracing::debug!(path = %key, "already processed");
            return Ok(ExtractionOutcome::AlreadyProcessed(existing));
        }

        let fingerprint =
            hasher::fingerprint_file(pdf_path).map_err(|e| PipelineError::io(pdf_path, e))?;

        if let Some(original) = self.ledger.find_duplicate(&fingerprint, &key).await? {
            let record = ExtractionRecord {
                id: 0,
                pdf_path: key.clone(),
                pdf_hash: fingerprint,
                timestamp: now_rfc3339(),
                text_extracted: false,
                images_extracted: false,
                image_info: Vec::new(),
                error_message: None,
                is_duplicate: true,
                original_path: Some(original.clone()),
            };
            return match self.insert(record).await? {
                Inserted::New(record) => {
                    if let Err(e) = std::fs::remove_file(pdf_path) {
                        tracing::warn!(path = %key, error = %e, "could not remove duplicate file");
                    }
                    tracing::info!(path = %key, original = %original, "duplicate removed");
                    Ok(ExtractionOutcome::Duplicate(record))
                }
                Inserted::Existing(record) => Ok(ExtractionOutcome::AlreadyProcessed(record)),
            };
        }

        let stem = document_id_for(pdf_path);
        let (text_result, image_result) = match Document::load(pdf_path) {
            Ok(doc) => (
                self.extract_text(&doc, &stem),
                self.extract_images(&doc, &stem),
            ),
            Err(e) => {
                let msg = e.to_string();
                (Err(msg.clone()), Err(msg))
            }
        };

        let mut errors = Vec::new();
        let text_extracted = match text_result {
            Ok(()) => true,
            Err(e) => {
                errors.push(format!("Text extraction failed: {}", e));
                false
            }
        };
        let (images_extracted, image_info) = match image_result {
            Ok(harvest) if harvest.failures.is_empty() => (true, harvest.images),
            Ok(harvest) => {
                errors.push(format!(
                    "Image extraction failed: {}",
                    harvest.failures.join("; ")
                ));
                (false, harvest.images)
            }
            Err(e) => {
                errors.push(format!("Image extraction failed: {}", e));
                (false, Vec::new())
            }
        };

        let record = ExtractionRecord {
            id: 0,
            pdf_path: key.clone(),
            pdf_hash: fingerprint,
            timestamp: now_rfc3339(),
            text_extracted,
            images_extracted,
            image_info,
            error_message: if errors.is_empty() {
                None
            } else {
                Some(errors.join("; "))
            },
            is_duplicate: false,
            original_path: None,
        };

        match self.insert(record).await? {
            Inserted::New(record) => {
                if let Some(ref err) = record.error_message {
                    tracing::warn!(path = %key, error = %err, "extraction incomplete");
                } else {
                    tracing::info!(path = %key, images = record.image_info.len(), "extracted");
                }
                Ok(ExtractionOutcome::Processed(record))
            }
            Inserted::Existing(record) => Ok(ExtractionOutcome::AlreadyProcessed(record)),
        }
    }

    async fn insert(&self, mut record: ExtractionRecord) -> Result<Inserted, PipelineError> {
        match self.ledger.upsert_extraction(&record).await {
            Ok(id) => {
                record.id = id;
                Ok(Inserted::New(record))
            }
            Err(LedgerError::Conflict { path }) => {
                let existing = self.ledger.lookup_extraction(&path).await?.ok_or_else(|| {
                    LedgerError::Decode(format!("conflicting row for '{}' not found", path))
                })?;
                Ok(Inserted::Existing(existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn extract_text(&self, doc: &Document, stem: &str) -> Result<(), String> {
        let mut pieces = Vec::new();
        for (page_num, _) in doc.get_pages() {
            let text = match doc.extract_text(&[page_num]) {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!(page = page_num, error = %e, "no text on page");
                    String::new()
                }
            };
            pieces.push(format!("--- Page {} ---\n", page_num));
            pieces.push(text);
            pieces.push("\n\n".to_string());
        }

        let path = self.layout.text_path(stem);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        std::fs::write(&path, pieces.join("\n")).map_err(|e| e.to_string())
    }

    fn extract_images(&self, doc: &Document, stem: &str) -> Result<ImageHarvest, String> {
        let dir = self.layout.images_dir(stem);
        std::fs::create_dir_all(&dir).map_err(|e| e.to_string())?;

        let mut harvest = ImageHarvest::default();
        for (page_num, page_id) in doc.get_pages() {
            // Pages without an XObject dictionary carry no images.
            let images = match doc.get_page_images(page_id) {
                Ok(images) => images,
                Err(e) => {
                    tracing::debug!(page = page_num, error = %e, "no page images");
                    continue;
                }
            };

            for (idx, img) in images.iter().enumerate() {
                let label = format!("page {} image {}", page_num, idx + 1);
                let (ext, bytes) = match self.encode_image(doc, page_id, img) {
                    Ok(encoded) => encoded,
                    Err(reason) => {
                        tracing::warn!(
                            page = page_num,
                            image = idx + 1,
                            reason = %reason,
                            "image not extracted"
                        );
                        harvest.failures.push(format!("{}: {}", label, reason));
                        continue;
                    }
                };

                let filename = OutputLayout::image_filename(page_num, idx + 1, ext);
                let path = dir.join(&filename);
                if let Err(e) = std::fs::write(&path, &bytes) {
                    harvest
                        .failures
                        .push(format!("{}: cannot write {}: {}", label, path.display(), e));
                    continue;
                }

                let relative = path
                    .strip_prefix(self.layout.root())
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .to_string();
                harvest.images.push(ExtractedImage {
                    filename,
                    path: relative,
                });
            }
        }

        Ok(harvest)
    }

    /// File extension and bytes for one image XObject.
    fn encode_image(
        &self,
        doc: &Document,
        page_id: ObjectId,
        img: &PdfImage,
    ) -> Result<(&'static str, Vec<u8>), String> {
        let filters = img.filters.clone().unwrap_or_default();
        match filters.as_slice() {
            [only] if only == "DCTDecode" => {
                return Ok(("jpg", recompress_jpeg(img.content, self.jpeg_quality)));
            }
            [only] if only == "JPXDecode" => return Ok(("jp2", img.content.to_vec())),
            _ => {}
        }
        if let Some(other) = filters
            .iter()
            .find(|f| !SAMPLE_FILTERS.contains(&f.as_str()))
        {
            return Err(format!("unsupported filter {}", other));
        }

        let samples = if filters.is_empty() {
            img.content.to_vec()
        } else {
            doc.get_object(img.id)
                .and_then(|o| o.as_stream())
                .and_then(|s| s.decompressed_content())
                .map_err(|e| format!("cannot decode {}: {}", filters.join("+"), e))?
        };

        RawImage::describe(doc, page_id, img)?
            .to_png(&samples)
            .map(|png| ("png", png))
    }
}

/// Filters whose output is plain samples, decoded by lopdf.
const SAMPLE_FILTERS: &[&str] = &["FlateDecode", "LZWDecode", "ASCII85Decode"];

#[derive(Default)]
struct ImageHarvest {
    images: Vec<ExtractedImage>,
    failures: Vec<String>,
}

enum Inserted {
    New(ExtractionRecord),
    Existing(ExtractionRecord),
}

/// How decoded samples map to colors.
#[derive(Debug, Clone, PartialEq)]
enum ColorModel {
    Gray,
    Rgb,
    Cmyk,
    /// One index per pixel into `palette`, whose entries are `base` colors.
    Indexed {
        base: Box<ColorModel>,
        palette: Vec<u8>,
    },
}

impl ColorModel {
    fn components(&self) -> usize {
        match self {
            ColorModel::Gray | ColorModel::Indexed { .. } => 1,
            ColorModel::Rgb => 3,
            ColorModel::Cmyk => 4,
        }
    }

    fn from_components(n: i64) -> Result<Self, String> {
        match n {
            1 => Ok(ColorModel::Gray),
            3 => Ok(ColorModel::Rgb),
            4 => Ok(ColorModel::Cmyk),
            other => Err(format!("{} color components", other)),
        }
    }
}

/// Named color spaces can chain through page resources; cap the lookups.
const MAX_COLOR_SPACE_DEPTH: usize = 4;

fn color_model(
    doc: &Document,
    page_id: ObjectId,
    space: &Object,
    depth: usize,
) -> Result<ColorModel, String> {
    if depth > MAX_COLOR_SPACE_DEPTH {
        return Err("color space nests too deeply".to_string());
    }
    let (_, space) = doc.dereference(space).map_err(|e| e.to_string())?;

    match space {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"CalGray" | b"G" => Ok(ColorModel::Gray),
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Ok(ColorModel::Rgb),
            b"DeviceCMYK" | b"CMYK" => Ok(ColorModel::Cmyk),
            other => {
                let named = page_color_space(doc, page_id, other).ok_or_else(|| {
                    format!("unknown color space {}", String::from_utf8_lossy(other))
                })?;
                color_model(doc, page_id, named, depth + 1)
            }
        },
        Object::Array(items) => {
            let family = items
                .first()
                .and_then(|o| o.as_name().ok())
                .ok_or("empty color space array")?;
            match family {
                b"CalGray" => Ok(ColorModel::Gray),
                b"CalRGB" => Ok(ColorModel::Rgb),
                b"ICCBased" => {
                    let n = items
                        .get(1)
                        .and_then(|o| doc.dereference(o).ok())
                        .and_then(|(_, o)| o.as_stream().ok())
                        .and_then(|s| s.dict.get(b"N").ok())
                        .and_then(|n| n.as_i64().ok())
                        .ok_or("ICCBased profile without /N")?;
                    ColorModel::from_components(n)
                }
                b"Indexed" | b"I" => indexed_model(doc, page_id, items, depth),
                other => Err(format!(
                    "unsupported color space {}",
                    String::from_utf8_lossy(other)
                )),
            }
        }
        _ => Err("malformed color space".to_string()),
    }
}

/// `[/Indexed base hival lookup]`, lookup being a string or a stream.
fn indexed_model(
    doc: &Document,
    page_id: ObjectId,
    items: &[Object],
    depth: usize,
) -> Result<ColorModel, String> {
    let [_, base, hival, lookup] = items else {
        return Err("Indexed color space needs four entries".to_string());
    };
    let base = color_model(doc, page_id, base, depth + 1)?;
    if matches!(base, ColorModel::Indexed { .. }) {
        return Err("Indexed over Indexed".to_string());
    }
    let hival = doc
        .dereference(hival)
        .ok()
        .and_then(|(_, o)| o.as_i64().ok())
        .ok_or("Indexed without hival")?;

    let table = match doc.dereference(lookup).map_err(|e| e.to_string())?.1 {
        Object::String(bytes, _) => bytes.clone(),
        Object::Stream(s) if s.is_compressed() => s
            .decompressed_content()
            .map_err(|e| format!("Indexed lookup stream: {}", e))?,
        Object::Stream(s) => s.content.clone(),
        _ => return Err("Indexed without lookup table".to_string()),
    };

    let entries = hival.clamp(0, 255) as usize + 1;
    let needed = entries * base.components();
    if table.len() < needed {
        return Err(format!(
            "Indexed lookup has {} bytes, needs {}",
            table.len(),
            needed
        ));
    }
    Ok(ColorModel::Indexed {
        base: Box::new(base),
        palette: table[..needed].to_vec(),
    })
}

fn page_color_space<'a>(doc: &'a Document, page_id: ObjectId, name: &[u8]) -> Option<&'a Object> {
    let page = doc.get_dictionary(page_id).ok()?;
    let resources = doc.get_dict_in_dict(page, b"Resources").ok()?;
    let spaces = doc.get_dict_in_dict(resources, b"ColorSpace").ok()?;
    spaces.get(name).ok()
}

struct RawImage {
    width: u32,
    height: u32,
    bits: u8,
    /// `None` when the stream names no color space; inferred from the
    /// sample count for 8-bit data.
    model: Option<ColorModel>,
}

impl RawImage {
    fn describe(doc: &Document, page_id: ObjectId, img: &PdfImage) -> Result<Self, String> {
        let dict = img.origin_dict;
        let is_mask = dict
            .get(b"ImageMask")
            .and_then(Object::as_bool)
            .unwrap_or(false);

        let (bits, model) = if is_mask {
            (1, Some(ColorModel::Gray))
        } else {
            let model = match dict.get(b"ColorSpace") {
                Ok(space) => Some(color_model(doc, page_id, space, 0)?),
                Err(_) => None,
            };
            (img.bits_per_component.unwrap_or(8), model)
        };

        Ok(Self {
            width: u32::try_from(img.width).map_err(|_| "negative width".to_string())?,
            height: u32::try_from(img.height).map_err(|_| "negative height".to_string())?,
            bits: match bits {
                1 | 2 | 4 | 8 | 16 => bits as u8,
                other => return Err(format!("{} bits per component", other)),
            },
            model,
        })
    }

    /// Encode decoded samples as PNG.
    fn to_png(&self, data: &[u8]) -> Result<Vec<u8>, String> {
        if self.width == 0 || self.height == 0 {
            return Err("empty image".to_string());
        }
        let area = self.width as usize * self.height as usize;
        let model = match &self.model {
            Some(model) => model.clone(),
            None if self.bits == 8 => ColorModel::from_components((data.len() / area) as i64)?,
            None => return Err("no color space".to_string()),
        };

        let values = unpack_samples(data, self.width, self.height, model.components(), self.bits)?;
        let (base, samples) = match model {
            ColorModel::Indexed { base, palette } => {
                let width = base.components();
                let last = palette.len() / width - 1;
                let mut colors = Vec::with_capacity(values.len() * width);
                for &index in &values {
                    let at = (index as usize).min(last) * width;
                    colors.extend_from_slice(&palette[at..at + width]);
                }
                (*base, colors)
            }
            other => (other, scale_to_8bit(values, self.bits)),
        };

        let image = match base {
            ColorModel::Gray => GrayImage::from_raw(self.width, self.height, samples)
                .map(DynamicImage::ImageLuma8),
            ColorModel::Rgb => RgbImage::from_raw(self.width, self.height, samples)
                .map(DynamicImage::ImageRgb8),
            _ => RgbImage::from_raw(self.width, self.height, cmyk_to_rgb(&samples))
                .map(DynamicImage::ImageRgb8),
        }
        .ok_or("sample buffer does not match dimensions")?;

        let mut out = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .map_err(|e| e.to_string())?;
        Ok(out)
    }
}

/// Split packed rows into one value per sample. Rows start on a byte
/// boundary; 16-bit samples keep their high byte.
fn unpack_samples(
    data: &[u8],
    width: u32,
    height: u32,
    components: usize,
    bits: u8,
) -> Result<Vec<u8>, String> {
    let per_row = width as usize * components;
    let row_bytes = (per_row * bits as usize).div_ceil(8);
    let needed = row_bytes * height as usize;
    if data.len() < needed {
        return Err(format!(
            "{} bytes of samples, needs {}",
            data.len(),
            needed
        ));
    }

    let mut values = Vec::with_capacity(per_row * height as usize);
    for row in data[..needed].chunks_exact(row_bytes) {
        match bits {
            8 => values.extend_from_slice(&row[..per_row]),
            16 => values.extend(row.chunks_exact(2).map(|pair| pair[0])),
            _ => {
                let mask = (1u8 << bits) - 1;
                for i in 0..per_row {
                    let offset = i * bits as usize;
                    let shift = 8 - bits as usize - offset % 8;
                    values.push((row[offset / 8] >> shift) & mask);
                }
            }
        }
    }
    Ok(values)
}

/// Stretch 1/2/4-bit values over 0..=255.
fn scale_to_8bit(mut values: Vec<u8>, bits: u8) -> Vec<u8> {
    if bits < 8 {
        let max = (1u16 << bits) - 1;
        for v in &mut values {
            *v = (*v as u16 * 255 / max) as u8;
        }
    }
    values
}

fn cmyk_to_rgb(cmyk: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(cmyk.len() / 4 * 3);
    for px in cmyk.chunks_exact(4) {
        let k = 255 - px[3] as u32;
        for &c in &px[..3] {
            rgb.push(((255 - c as u32) * k / 255) as u8);
        }
    }
    rgb
}

/// Re-encode a JPEG as RGB at the given quality. Falls back to the original
/// bytes when decoding fails, so the figure is still kept.
fn recompress_jpeg(bytes: &[u8], quality: u8) -> Vec<u8> {
    let decoded = match image::load_from_memory_with_format(bytes, ImageFormat::Jpeg) {
        Ok(img) => img,
        Err(e) => {
            tracing::warn!(error = %e, "could not optimize jpeg, keeping original bytes");
            return bytes.to_vec();
        }
    };

    let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());
    let mut out = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
    match rgb.write_with_encoder(encoder) {
        Ok(()) => out,
        Err(e) => {
            tracing::warn!(error = %e, "could not optimize jpeg, keeping original bytes");
            bytes.to_vec()
        }
    }
}
