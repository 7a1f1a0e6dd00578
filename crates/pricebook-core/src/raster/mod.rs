//! Document rasterization: PDF or image bytes into ordered page frames.
//!
//! PDF pages are walked with lopdf; each page's largest embedded image
//! XObject becomes the page frame. Pages without a decodable image get a
//! blank frame carrying the page's embedded text layer, so every page
//! keeps its slot and order downstream. Intermediate frames pass through a
//! scoped temp directory that is removed on all paths, including errors.

use image::{DynamicImage, GenericImageView, ImageBuffer, Rgba};
use lopdf::{Document, Object, ObjectId};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::error::RasterError;
use crate::models::config::RasterConfig;

/// One rendered page frame, ordered by page number.
#[derive(Debug, Clone)]
pub struct PageFrame {
    /// Page number (1-indexed).
    pub page: u32,
    /// Encoded image bytes.
    pub data: Vec<u8>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Image format (png, jpeg, ...).
    pub format: String,
    /// Embedded text for this page, when the PDF carries a text layer.
    pub text_layer: Option<String>,
}

/// Sniff a raster image signature from leading magic bytes.
pub fn sniff_image_format(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]) {
        Some("png")
    } else if data.starts_with(&[0xff, 0xd8, 0xff]) {
        Some("jpeg")
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        Some("gif")
    } else if data.starts_with(b"BM") {
        Some("bmp")
    } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        Some("webp")
    } else {
        None
    }
}

/// Whether the bytes open like a PDF.
pub fn looks_like_pdf(data: &[u8]) -> bool {
    data.starts_with(b"%PDF")
}

/// Converts an uploaded document into ordered page frames.
pub struct Rasterizer {
    config: RasterConfig,
}

impl Rasterizer {
    /// Create a rasterizer with the given configuration.
    pub fn new(config: RasterConfig) -> Self {
        Self { config }
    }

    /// Rasterize a document into one frame per page.
    ///
    /// A recognized raster image yields a single frame wrapping the
    /// original bytes. A PDF yields one frame per page, capped by
    /// `max_pages`. Anything else fails with
    /// [`RasterError::UnsupportedFormat`].
    pub fn rasterize(&self, data: &[u8]) -> Result<Vec<PageFrame>, RasterError> {
        if let Some(format) = sniff_image_format(data) {
            let img = image::load_from_memory(data)
                .map_err(|_| RasterError::UnsupportedFormat)?;
            let (width, height) = img.dimensions();
            debug!(format, width, height, "input is a raster image");
            return Ok(vec![PageFrame {
                page: 1,
                data: data.to_vec(),
                width,
                height,
                format: format.to_string(),
                text_layer: None,
            }]);
        }

        if !looks_like_pdf(data) {
            return Err(RasterError::UnsupportedFormat);
        }

        self.rasterize_pdf(data)
    }

    fn rasterize_pdf(&self, data: &[u8]) -> Result<Vec<PageFrame>, RasterError> {
        let mut doc =
            Document::load_mem(data).map_err(|e| RasterError::Parse(e.to_string()))?;

        // PDFs encrypted with an empty password are common enough to retry.
        if doc.is_encrypted() {
            if doc.decrypt("").is_err() {
                return Err(RasterError::Encrypted);
            }
            debug!("decrypted PDF with empty password");
        }

        let pages = doc.get_pages();
        if pages.is_empty() {
            return Err(RasterError::NoPages);
        }

        let page_count = pages.len();
        let limit = if self.config.max_pages == 0 {
            page_count
        } else {
            page_count.min(self.config.max_pages)
        };
        if limit < page_count {
            warn!(page_count, limit, "page cap applied");
        }

        let page_texts = self.extract_page_texts(data, page_count);

        // Frames are staged on disk; the TempDir guard removes them on
        // every exit path.
        let staging = TempDir::new().map_err(|e| RasterError::Parse(e.to_string()))?;

        let mut frames = Vec::with_capacity(limit);
        for (page_num, object_id) in pages.into_iter().take(limit) {
            let text = page_texts
                .get(page_num as usize - 1)
                .filter(|t| !t.trim().is_empty())
                .cloned();

            let img = match self.largest_page_image(&doc, object_id) {
                Some(img) => self.scale_to_density(&doc, object_id, img),
                None => {
                    debug!(page = page_num, "no decodable page image, blank frame");
                    self.blank_frame(&doc, object_id)
                }
            };

            let (width, height) = img.dimensions();
            let path = staging.path().join(format!("page-{page_num}.png"));
            img.save_with_format(&path, image::ImageFormat::Png)
                .map_err(|e| RasterError::PageRender {
                    page: page_num,
                    reason: e.to_string(),
                })?;
            let png = std::fs::read(&path).map_err(|e| RasterError::PageRender {
                page: page_num,
                reason: e.to_string(),
            })?;

            frames.push(PageFrame {
                page: page_num,
                data: png,
                width,
                height,
                format: "png".to_string(),
                text_layer: text,
            });
        }

        info!(pages = frames.len(), "rasterized document");
        Ok(frames)
    }

    /// Split the whole-document text layer into per-page chunks. pdf-extract
    /// gives no page boundaries, so pages get equal line shares.
    fn extract_page_texts(&self, data: &[u8], page_count: usize) -> Vec<String> {
        let full_text = match pdf_extract::extract_text_from_mem(data) {
            Ok(text) => text,
            Err(e) => {
                debug!(error = %e, "no embedded text layer");
                return vec![String::new(); page_count];
            }
        };

        let lines: Vec<&str> = full_text.lines().collect();
        let per_page = (lines.len() / page_count.max(1)).max(1);

        (0..page_count)
            .map(|i| {
                let start = (i * per_page).min(lines.len());
                let end = if i == page_count - 1 {
                    lines.len()
                } else {
                    ((i + 1) * per_page).min(lines.len())
                };
                lines[start..end].join("\n")
            })
            .collect()
    }

    /// Decode the largest image XObject on a page, if any.
    fn largest_page_image(&self, doc: &Document, page_id: ObjectId) -> Option<DynamicImage> {
        let resources = page_resources(doc, page_id)?;
        let xobjects = resources.get(b"XObject").ok()?;
        let (_, resolved) = doc.dereference(xobjects).ok()?;
        let xobj_dict = resolved.as_dict().ok()?;

        let mut best: Option<DynamicImage> = None;
        for (_name, obj_ref) in xobj_dict.iter() {
            let Ok((_, obj)) = doc.dereference(obj_ref) else {
                continue;
            };
            if let Some(img) = decode_image_object(obj) {
                let replace = match &best {
                    Some(current) => {
                        img.width() * img.height() > current.width() * current.height()
                    }
                    None => true,
                };
                if replace {
                    best = Some(img);
                }
            }
        }
        best
    }

    /// Upscale a decoded frame when it falls below the target density for
    /// the page's physical size.
    fn scale_to_density(
        &self,
        doc: &Document,
        page_id: ObjectId,
        img: DynamicImage,
    ) -> DynamicImage {
        let Some((width_pts, height_pts)) = media_box(doc, page_id) else {
            return img;
        };

        let target_w = (width_pts / 72.0 * self.config.target_dpi as f64) as u32;
        let target_h = (height_pts / 72.0 * self.config.target_dpi as f64) as u32;

        if img.width() >= target_w || target_w == 0 || target_h == 0 {
            return img;
        }

        debug!(
            from = img.width(),
            to = target_w,
            "upscaling page frame to target density"
        );
        img.resize(target_w, target_h, image::imageops::FilterType::Lanczos3)
    }

    /// A white frame sized to the page at target density.
    fn blank_frame(&self, doc: &Document, page_id: ObjectId) -> DynamicImage {
        let (width_pts, height_pts) = media_box(doc, page_id).unwrap_or((595.0, 842.0));
        let w = ((width_pts / 72.0 * self.config.target_dpi as f64) as u32).max(1);
        let h = ((height_pts / 72.0 * self.config.target_dpi as f64) as u32).max(1);

        let buf = ImageBuffer::from_pixel(w, h, Rgba([255u8, 255, 255, 255]));
        DynamicImage::ImageRgba8(buf)
    }
}

/// Page media box in points, following /Parent inheritance.
fn media_box(doc: &Document, page_id: ObjectId) -> Option<(f64, f64)> {
    let mut node_id = page_id;
    for _ in 0..8 {
        let dict = doc.get_object(node_id).ok()?.as_dict().ok()?;
        if let Ok(mb) = dict.get(b"MediaBox") {
            let (_, resolved) = doc.dereference(mb).ok()?;
            let arr = resolved.as_array().ok()?;
            if arr.len() == 4 {
                let nums: Vec<f64> = arr
                    .iter()
                    .filter_map(|o| match o {
                        Object::Integer(i) => Some(*i as f64),
                        Object::Real(r) => Some(*r as f64),
                        _ => None,
                    })
                    .collect();
                if nums.len() == 4 {
                    return Some((nums[2] - nums[0], nums[3] - nums[1]));
                }
            }
            return None;
        }
        match dict.get(b"Parent") {
            Ok(Object::Reference(parent)) => node_id = *parent,
            _ => return None,
        }
    }
    None
}

/// Resources dictionary for a page, following /Parent inheritance.
fn page_resources(doc: &Document, page_id: ObjectId) -> Option<lopdf::Dictionary> {
    let mut node_id = page_id;
    for _ in 0..8 {
        let dict = doc.get_object(node_id).ok()?.as_dict().ok()?;
        if let Ok(resources) = dict.get(b"Resources") {
            if let Ok((_, Object::Dictionary(res))) = doc.dereference(resources) {
                return Some(res.clone());
            }
        }
        match dict.get(b"Parent") {
            Ok(Object::Reference(parent)) => node_id = *parent,
            _ => return None,
        }
    }
    None
}

/// Decode an image XObject stream into a DynamicImage.
fn decode_image_object(obj: &Object) -> Option<DynamicImage> {
    let Object::Stream(stream) = obj else {
        return None;
    };
    let dict = &stream.dict;

    let subtype = dict.get(b"Subtype").ok()?;
    if subtype.as_name().ok()? != b"Image" {
        return None;
    }

    let width = dict.get(b"Width").ok()?.as_i64().ok()? as u32;
    let height = dict.get(b"Height").ok()?.as_i64().ok()? as u32;

    if let Ok(filter) = dict.get(b"Filter") {
        let filter_name = match filter {
            Object::Name(name) => Some(name.as_slice()),
            Object::Array(arr) if !arr.is_empty() => arr.first().and_then(|o| o.as_name().ok()),
            _ => None,
        };

        match filter_name {
            Some(b"DCTDecode") => {
                // JPEG stream, decode directly from the compressed content.
                return image::load_from_memory_with_format(
                    &stream.content,
                    image::ImageFormat::Jpeg,
                )
                .ok();
            }
            Some(b"JPXDecode") | Some(b"CCITTFaxDecode") | Some(b"JBIG2Decode") => {
                // Exotic scan codecs; skip and let the blank-frame path run.
                return None;
            }
            _ => {}
        }
    }

    let data = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());

    let color_space = dict
        .get(b"ColorSpace")
        .ok()
        .and_then(|o| match o {
            Object::Name(name) => Some(name.as_slice()),
            Object::Array(arr) => arr.first().and_then(|o| o.as_name().ok()),
            _ => None,
        })
        .unwrap_or(b"DeviceRGB");

    let bits = dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(8);
    if bits != 8 {
        return None;
    }

    raw_to_image(&data, width, height, color_space)
}

fn raw_to_image(data: &[u8], width: u32, height: u32, color_space: &[u8]) -> Option<DynamicImage> {
    let expected_rgb = (width * height * 3) as usize;
    let expected_gray = (width * height) as usize;

    if (color_space == b"DeviceRGB" || color_space == b"RGB") && data.len() >= expected_rgb {
        let mut rgba = Vec::with_capacity((width * height * 4) as usize);
        for chunk in data[..expected_rgb].chunks(3) {
            rgba.extend_from_slice(chunk);
            rgba.push(255);
        }
        return ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, rgba)
            .map(DynamicImage::ImageRgba8);
    }

    if (color_space == b"DeviceGray" || color_space == b"G") && data.len() >= expected_gray {
        let mut rgba = Vec::with_capacity((width * height * 4) as usize);
        for &gray in &data[..expected_gray] {
            rgba.extend_from_slice(&[gray, gray, gray, 255]);
        }
        return ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, rgba)
            .map(DynamicImage::ImageRgba8);
    }

    None
}
