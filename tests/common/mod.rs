//! Fixture builders shared by the integration tests.
#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;

use image::{ImageFormat, Rgb, RgbImage};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, Stream, StringFormat};

/// Image XObject flavours the fixture PDF can carry.
#[derive(Clone, Copy)]
pub enum FixtureImage {
    None,
    /// Uncompressed 8-bit RGB samples.
    Raw,
    /// A baseline JPEG (`DCTDecode`).
    Jpeg,
    /// 32x32 RGB, `FlateDecode` with PNG predictor 15. Pixel (x, y) is
    /// `[x * 8, 100, 200]`.
    Flate,
    /// 2x2 `[/Indexed /DeviceRGB 1 <ff00000000ff>]`, red on the diagonal.
    Indexed,
    /// A `JBIG2Decode` stream, which extraction cannot decode.
    Jbig2,
}

fn raw_pixels(width: u32, height: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            pixels.extend_from_slice(&[(x * 40) as u8, (y * 40) as u8, 128]);
        }
    }
    pixels
}

fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x * 20) as u8, (y * 20) as u8, 90]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Jpeg).unwrap();
    buf.into_inner()
}

fn image_dict(width: i64, height: i64) -> Dictionary {
    dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width,
        "Height" => height,
        "BitsPerComponent" => 8,
    }
}

/// Rows prefixed with PNG filter type 0, then deflated by lopdf.
fn predictor_stream(width: u32, height: u32) -> Stream {
    let mut rows = Vec::new();
    for _ in 0..height {
        rows.push(0u8);
        for x in 0..width {
            rows.extend_from_slice(&[(x * 8) as u8, 100, 200]);
        }
    }
    let mut dict = image_dict(width as i64, height as i64);
    dict.set("ColorSpace", "DeviceRGB");
    let mut stream = Stream::new(dict, rows);
    stream.compress().unwrap();
    assert!(stream.is_compressed(), "fixture rows did not deflate");
    stream.dict.set(
        "DecodeParms",
        dictionary! {
            "Predictor" => 15,
            "Colors" => 3,
            "BitsPerComponent" => 8,
            "Columns" => width as i64,
        },
    );
    stream
}

fn image_stream(image: FixtureImage) -> Option<Stream> {
    match image {
        FixtureImage::None => None,
        FixtureImage::Raw => {
            let mut dict = image_dict(4, 4);
            dict.set("ColorSpace", "DeviceRGB");
            Some(Stream::new(dict, raw_pixels(4, 4)))
        }
        FixtureImage::Jpeg => {
            let mut dict = image_dict(8, 8);
            dict.set("ColorSpace", "DeviceRGB");
            dict.set("Filter", "DCTDecode");
            Some(Stream::new(dict, jpeg_bytes(8, 8)))
        }
        FixtureImage::Flate => Some(predictor_stream(32, 32)),
        FixtureImage::Indexed => {
            let mut dict = image_dict(2, 2);
            dict.set(
                "ColorSpace",
                vec![
                    "Indexed".into(),
                    "DeviceRGB".into(),
                    1.into(),
                    Object::String(vec![0xff, 0, 0, 0, 0, 0xff], StringFormat::Hexadecimal),
                ],
            );
            Some(Stream::new(dict, vec![0, 1, 1, 0]))
        }
        FixtureImage::Jbig2 => {
            let mut dict = image_dict(8, 8);
            dict.set("ColorSpace", "DeviceGray");
            dict.set("BitsPerComponent", 1);
            dict.set("Filter", "JBIG2Decode");
            Some(Stream::new(dict, vec![0x97, 0x4a, 0x42, 0x32]))
        }
    }
}

/// Write a one-page PDF with `text` and, optionally, one image.
pub fn write_pdf(path: &Path, text: &str, image: FixtureImage) {
    write_pdf_with_images(path, text, &[image]);
}

/// Write a one-page PDF with `text` and one XObject per image, named
/// `Im1`, `Im2`, ... in order.
pub fn write_pdf_with_images(path: &Path, text: &str, images: &[FixtureImage]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });

    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 18.into()]),
        Operation::new("Td", vec![72.into(), 700.into()]),
        Operation::new("Tj", vec![Object::string_literal(text)]),
        Operation::new("ET", vec![]),
    ];

    let mut xobjects = Dictionary::new();
    for (n, stream) in images.iter().filter_map(|i| image_stream(*i)).enumerate() {
        let name = format!("Im{}", n + 1);
        let image_id = doc.add_object(stream);
        xobjects.set(name.as_str(), image_id);
        operations.extend([
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![100.into(), 0.into(), 0.into(), 100.into(), 72.into(), (500 - 110 * n as i64).into()],
            ),
            Operation::new("Do", vec![name.as_str().into()]),
            Operation::new("Q", vec![]),
        ]);
    }

    let content = Content { operations };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));

    let resources = dictionary! {
        "Font" => dictionary! { "F1" => font_id },
        "XObject" => xobjects,
    };
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    });

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    doc.save(path).unwrap();
}

/// A small valid PNG the vision stage will accept.
pub fn write_png(path: &Path) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    RgbImage::from_pixel(6, 6, Rgb([10, 200, 30]))
        .save_with_format(path, ImageFormat::Png)
        .unwrap();
}

/// A well-formed model reply carrying every required field.
pub fn valid_reply(title: &str) -> String {
    serde_json::json!({
        "title": title,
        "image_type": "chart",
        "description": format!("A chart about {}", title),
        "data_points": [{"label": "Jan", "value": 12}],
        "insights": ["values rise over time"],
        "text_content": "Jan Feb Mar",
    })
    .to_string()
}
