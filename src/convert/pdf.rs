use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbImage};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, Stream, dictionary};
use std::io::{self, Write};
use tracing::warn;

use super::{ConversionError, Result, decode_page};
use crate::model::{PageFailure, PageFile};

const JPEG_QUALITY: u8 = 90;

/// One PDF page per decodable image, each page sized to its pixels
pub(super) fn write<W: Write>(pages: &[PageFile], title: &str, target: &mut W) -> Result<Vec<PageFailure>> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    let mut skipped = Vec::new();

    for page in pages {
        let image = match decode_page(page).and_then(|img| encode_jpeg(page.position, &img)) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(position = page.position, error = %e, "Skipping undecodable page");
                skipped.push(e.into_page_failure(page.position));
                continue;
            }
        };

        let (width, height) = (image.width as i64, image.height as i64);

        let mut image_stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => Object::Integer(width),
                "Height" => Object::Integer(height),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => Object::Integer(8),
                "Filter" => "DCTDecode",
            },
            image.data,
        );
        image_stream.allows_compression = false;
        let image_id = doc.add_object(image_stream);

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Integer(width),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Integer(height),
                        Object::Integer(0),
                        Object::Integer(0),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let encoded = content.encode().map_err(pdf_error)?;
        let content_id = doc.add_object(Stream::new(Dictionary::new(), encoded));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(width),
                Object::Integer(height),
            ],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! {
                    "Im0" => image_id,
                },
            },
        });
        kids.push(page_id.into());
    }

    if kids.is_empty() {
        return Err(ConversionError::NoUsablePages);
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(count),
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(title),
        "Producer" => Object::string_literal(concat!("inkfetch ", env!("CARGO_PKG_VERSION"))),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    doc.save_to(target).map_err(pdf_error)?;
    Ok(skipped)
}

struct EncodedImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

fn encode_jpeg(position: usize, image: &DynamicImage) -> Result<EncodedImage> {
    let rgb = flatten(image);
    let mut data = Vec::new();
    JpegEncoder::new_with_quality(&mut data, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| ConversionError::CorruptSource {
            position,
            reason: e.to_string(),
        })?;

    Ok(EncodedImage {
        width: rgb.width(),
        height: rgb.height(),
        data,
    })
}

/// Drop alpha by compositing over white
fn flatten(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    let mut rgb = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as u16;
        let blend = |c: u8| ((c as u16 * alpha + 255 * (255 - alpha)) / 255) as u8;
        rgb.put_pixel(x, y, image::Rgb([blend(r), blend(g), blend(b)]));
    }
    rgb
}

fn pdf_error(e: impl std::fmt::Display) -> ConversionError {
    ConversionError::WriteFailure {
        path: "<pdf document>".into(),
        source: io::Error::other(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::test_support::{png_bytes, write_page};

    fn page_count(bytes: &[u8]) -> usize {
        Document::load_mem(bytes).unwrap().get_pages().len()
    }

    #[test]
    fn test_one_page_per_image() {
        let tmp = tempfile::tempdir().unwrap();
        let pages: Vec<PageFile> = (0..3)
            .map(|i| write_page(tmp.path(), i, &png_bytes(8, 12, i as u8 * 50), "png"))
            .collect();

        let mut out = Vec::new();
        let skipped = write(&pages, "Chapter_1", &mut out).unwrap();

        assert!(skipped.is_empty());
        assert!(out.starts_with(b"%PDF-1.5"));
        assert_eq!(page_count(&out), 3);
    }

    #[test]
    fn test_corrupt_page_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let pages = vec![
            write_page(tmp.path(), 0, &png_bytes(8, 8, 0), "png"),
            write_page(tmp.path(), 1, b"definitely not an image", "jpg"),
            write_page(tmp.path(), 2, &png_bytes(8, 8, 200), "png"),
        ];

        let mut out = Vec::new();
        let skipped = write(&pages, "Chapter_2", &mut out).unwrap();

        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].position, 1);
        assert_eq!(page_count(&out), 2);
    }

    #[test]
    fn test_all_corrupt_is_no_usable_pages() {
        let tmp = tempfile::tempdir().unwrap();
        let pages = vec![write_page(tmp.path(), 0, b"garbage", "webp")];

        let mut out = Vec::new();
        let result = write(&pages, "Chapter_3", &mut out);
        assert!(matches!(result, Err(ConversionError::NoUsablePages)));
    }

    #[test]
    fn test_flatten_composites_on_white() {
        let rgba = image::RgbaImage::from_pixel(1, 1, image::Rgba([0, 0, 0, 0]));
        let flat = flatten(&DynamicImage::ImageRgba8(rgba));
        assert_eq!(flat.get_pixel(0, 0).0, [255, 255, 255]);
    }
}
