//! Image-to-PDF conversion
//!
//! Every image becomes one full-bleed page. Pages share the A4 width and take
//! their height from the image's aspect ratio, so nothing is cropped or
//! letterboxed.

use crate::errors::IngestionError;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, info};

/// Page width in points
pub const A4_WIDTH_PT: f32 = 595.28;

/// Longest allowed edge after downscaling
pub const MAX_DIMENSION_PX: u32 = 2000;

pub const JPEG_QUALITY: u8 = 60;

const FALLBACK_FILE_NAME: &str = "converted.pdf";

/// Result of a conversion
#[derive(Debug, Clone)]
pub struct ConvertedDocument {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub page_count: usize,
}

/// A decoded, downscaled and JPEG-encoded page image
struct PageImage {
    width: u32,
    height: u32,
    jpeg: Vec<u8>,
}

impl PageImage {
    fn height_pt(&self) -> f32 {
        self.height as f32 * A4_WIDTH_PT / self.width as f32
    }
}

/// File name for a converted document
pub fn document_name(subject: &str) -> String {
    let subject = subject.trim();
    if subject.is_empty() {
        FALLBACK_FILE_NAME.to_string()
    } else {
        format!("{}.pdf", subject)
    }
}

/// Convert images, in order, into one PDF named after `subject`
pub fn images_to_pdf<I: AsRef<[u8]>>(images: &[I], subject: &str) -> Result<ConvertedDocument, IngestionError> {
    if images.is_empty() {
        return Err(IngestionError::NoImages);
    }

    let pages = images
        .iter()
        .enumerate()
        .map(|(index, bytes)| prepare_page(index, bytes.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    let bytes = build_document(&pages)?;
    let file_name = document_name(subject);

    info!(
        file_name = %file_name,
        pages = pages.len(),
        size = bytes.len(),
        "Images converted to PDF"
    );

    Ok(ConvertedDocument {
        file_name,
        bytes,
        page_count: pages.len(),
    })
}

fn prepare_page(index: usize, bytes: &[u8]) -> Result<PageImage, IngestionError> {
    let decoded = image::load_from_memory(bytes).map_err(|e| IngestionError::DecodeError {
        index,
        message: e.to_string(),
    })?;

    let scaled = downscale(decoded);
    let rgb = scaled.to_rgb8();

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| IngestionError::EncodeError {
            index,
            message: e.to_string(),
        })?;

    debug!(
        index,
        width = rgb.width(),
        height = rgb.height(),
        jpeg_bytes = jpeg.len(),
        "Page image prepared"
    );

    Ok(PageImage {
        width: rgb.width(),
        height: rgb.height(),
        jpeg,
    })
}

/// Shrink so neither edge exceeds the cap; smaller images are left alone
fn downscale(image: DynamicImage) -> DynamicImage {
    if image.width() <= MAX_DIMENSION_PX && image.height() <= MAX_DIMENSION_PX {
        return image;
    }
    image.resize(MAX_DIMENSION_PX, MAX_DIMENSION_PX, FilterType::Triangle)
}

fn build_document(pages: &[PageImage]) -> Result<Vec<u8>, IngestionError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for page in pages {
        let page_id = add_page(&mut doc, pages_id, page)?;
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| IngestionError::PdfBuildError(e.to_string()))?;
    Ok(bytes)
}

fn add_page(doc: &mut Document, pages_id: ObjectId, page: &PageImage) -> Result<ObjectId, IngestionError> {
    let width = A4_WIDTH_PT;
    let height = page.height_pt();

    // JPEG data is already compressed; DCTDecode must stay the only filter
    let image = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => page.width as i64,
            "Height" => page.height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        },
        page.jpeg.clone(),
    )
    .with_compression(false);
    let image_id = doc.add_object(image);

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Real(width),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(height),
                    Object::Integer(0),
                    Object::Integer(0),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode()?));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(width),
            Object::Real(height),
        ],
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! {
                "Im0" => image_id,
            },
        },
    });

    Ok(page_id)
}
