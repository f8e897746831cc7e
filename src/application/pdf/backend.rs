//! Default layout backend writing PDF through `printpdf`.

use std::{
    collections::HashMap,
    io::{BufWriter, Cursor, Write},
    path::{Path, PathBuf},
};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use printpdf::{
    BuiltinFont, Image, ImageTransform, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference,
    image_crate::{
        self, DynamicImage, GenericImageView, ImageOutputFormat, Rgba, RgbaImage, imageops,
    },
};
use tracing::{debug, warn};
use url::Url;

use super::{
    layout::{self, DocumentLayout, FontRole},
    renderer::{BackendError, FontFamily, LayoutBackend, RendererConfig},
};

const LAYER_NAME: &str = "Layer 1";
const UNTITLED: &str = "Document";
/// At 72 dpi one image pixel spans one point before scaling.
const IMAGE_DPI: f32 = 72.0;

/// Backend on the standard PDF fonts. Fonts are referenced rather than
/// embedded, so there are no glyph programs to subset. Images from `data:`
/// URIs and local files are embedded; remote images are set as their alt
/// text.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrintPdfBackend;

impl LayoutBackend for PrintPdfBackend {
    fn layout(&self, markup: &str, config: &RendererConfig) -> Result<Vec<u8>, BackendError> {
        let extracted = layout::extract(markup)?;
        let images = load_images(extracted.image_sources(), config.image_quality);
        let document = layout::paginate_with_images(&extracted, config, |source| {
            images.get(source).map(GenericImageView::dimensions)
        });
        debug!(
            target = "folio::pdf::backend",
            blocks = extracted.blocks.len(),
            images = images.len(),
            pages = document.pages.len(),
            header_block = config.header_block,
            "Markup laid out"
        );
        write_document(&document, &images, config)
    }
}

fn load_images<'a>(
    sources: impl Iterator<Item = &'a str>,
    quality: u8,
) -> HashMap<String, DynamicImage> {
    let mut images = HashMap::new();
    for source in sources {
        if images.contains_key(source) {
            continue;
        }
        match load_image(source, quality) {
            Ok(image) => {
                images.insert(source.to_string(), image);
            }
            Err(err) => debug!(
                target = "folio::pdf::backend",
                source = source_label(source),
                error = %err,
                "Image set as alt text"
            ),
        }
    }
    images
}

/// Decode an image reference and prepare it for embedding.
pub fn load_image(source: &str, quality: u8) -> Result<DynamicImage, BackendError> {
    let bytes = read_source(source)?;
    let image = image_crate::load_from_memory(&bytes)
        .map_err(|err| BackendError::new(format!("image could not be decoded: {err}")))?;
    prepare_image(image, quality)
}

fn read_source(source: &str) -> Result<Vec<u8>, BackendError> {
    if let Some(data) = source.strip_prefix("data:") {
        let (meta, payload) = data
            .split_once(',')
            .ok_or_else(|| BackendError::new("data URI has no payload"))?;
        if !meta.ends_with(";base64") {
            return Err(BackendError::new("only base64 data URIs are embedded"));
        }
        let payload: String = payload.split_whitespace().collect();
        return STANDARD
            .decode(payload)
            .map_err(|err| BackendError::new(format!("data URI is not valid base64: {err}")));
    }

    let path = local_path(source)
        .ok_or_else(|| BackendError::new("image is neither a data URI nor a local file"))?;
    std::fs::read(&path).map_err(|err| {
        BackendError::new(format!("image `{}` could not be read: {err}", path.display()))
    })
}

fn local_path(source: &str) -> Option<PathBuf> {
    if source.starts_with("file:") {
        return Url::parse(source).ok()?.to_file_path().ok();
    }
    let path = Path::new(source);
    (path.is_absolute() && path.is_file()).then(|| path.to_path_buf())
}

/// Flatten transparency onto white, then apply the JPEG quality. Quality 100
/// keeps the pixels as decoded.
fn prepare_image(image: DynamicImage, quality: u8) -> Result<DynamicImage, BackendError> {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut background = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    imageops::overlay(&mut background, &rgba, 0, 0);
    let flattened = DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(background).to_rgb8());

    if quality >= 100 {
        return Ok(flattened);
    }

    let mut encoded = Cursor::new(Vec::new());
    flattened
        .write_to(&mut encoded, ImageOutputFormat::Jpeg(quality))
        .map_err(|err| BackendError::new(format!("image could not be compressed: {err}")))?;
    image_crate::load_from_memory(encoded.get_ref())
        .map_err(|err| BackendError::new(format!("compressed image could not be read: {err}")))
}

fn source_label(source: &str) -> &str {
    if source.starts_with("data:") {
        "data:"
    } else {
        source
    }
}

struct Fonts {
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    monospace: IndirectFontRef,
}

impl Fonts {
    fn load(doc: &PdfDocumentReference, config: &RendererConfig) -> Result<Self, BackendError> {
        let add = |font: BuiltinFont| {
            doc.add_builtin_font(font)
                .map_err(|err| BackendError::new(format!("builtin font unavailable: {err}")))
        };
        Ok(Self {
            regular: add(builtin(config.body_font, false))?,
            bold: add(builtin(config.body_font, true))?,
            monospace: add(builtin(config.monospace_font, false))?,
        })
    }

    fn for_role(&self, role: FontRole) -> &IndirectFontRef {
        match role {
            FontRole::Regular => &self.regular,
            FontRole::Bold => &self.bold,
            FontRole::Monospace => &self.monospace,
        }
    }
}

fn builtin(family: FontFamily, bold: bool) -> BuiltinFont {
    match (family, bold) {
        (FontFamily::Helvetica, false) => BuiltinFont::Helvetica,
        (FontFamily::Helvetica, true) => BuiltinFont::HelveticaBold,
        (FontFamily::Times, false) => BuiltinFont::TimesRoman,
        (FontFamily::Times, true) => BuiltinFont::TimesBold,
        (FontFamily::Courier, false) => BuiltinFont::Courier,
        (FontFamily::Courier, true) => BuiltinFont::CourierBold,
    }
}

fn points(value: f32) -> Mm {
    Mm(value * 25.4 / 72.0)
}

fn write_document(
    document: &DocumentLayout,
    images: &HashMap<String, DynamicImage>,
    config: &RendererConfig,
) -> Result<Vec<u8>, BackendError> {
    let (width, height) = config.page_dimensions();
    let title = document
        .title
        .clone()
        .unwrap_or_else(|| UNTITLED.to_string());
    let (doc, first_page, first_layer) =
        PdfDocument::new(title, points(width), points(height), LAYER_NAME);
    let fonts = Fonts::load(&doc, config)?;

    let mut first = Some((first_page, first_layer));
    for page in &document.pages {
        let (page_index, layer_index) = match first.take() {
            Some(indices) => indices,
            None => doc.add_page(points(width), points(height), LAYER_NAME),
        };
        let layer = doc.get_page(page_index).get_layer(layer_index);
        for placed in &page.images {
            let Some(image) = images.get(&placed.source) else {
                warn!(
                    target = "folio::pdf::backend",
                    source = source_label(&placed.source),
                    "Placed image missing from the loaded set"
                );
                continue;
            };
            let (px_width, px_height) = image.dimensions();
            Image::from_dynamic_image(image).add_to_layer(
                layer.clone(),
                ImageTransform {
                    translate_x: Some(points(placed.x)),
                    translate_y: Some(points(placed.y)),
                    scale_x: Some(placed.width / px_width.max(1) as f32),
                    scale_y: Some(placed.height / px_height.max(1) as f32),
                    dpi: Some(IMAGE_DPI),
                    ..ImageTransform::default()
                },
            );
        }
        for item in page.items().filter(|item| !item.text.is_empty()) {
            layer.use_text(
                item.text.as_str(),
                item.size,
                points(item.x),
                points(item.y),
                fonts.for_role(item.role),
            );
        }
    }

    let mut bytes = Vec::new();
    {
        let mut writer = BufWriter::new(&mut bytes);
        doc.save(&mut writer)
            .map_err(|err| BackendError::new(format!("PDF serialization failed: {err}")))?;
        writer
            .flush()
            .map_err(|err| BackendError::new(format!("PDF buffer flush failed: {err}")))?;
    }
    Ok(bytes)
}
