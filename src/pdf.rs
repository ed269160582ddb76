use anyhow::Context as _;
use base64::Engine as _;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};

use crate::model::Page;

const PAGE_WIDTH: f32 = 595.28;
const PAGE_HEIGHT: f32 = 841.89;
const PT_PER_MM: f32 = 2.834_646;

const TITLE_SIZE: f32 = 22.0;
const AUTHOR_SIZE: f32 = 12.0;
const BODY_SIZE: f32 = 14.0;
const FOOTER_SIZE: f32 = 10.0;
const BODY_LINE_FACTOR: f32 = 1.15;

/// Characters per body line for 170mm at 14pt Helvetica.
pub const BODY_WRAP_CHARS: usize = 68;

const TITLE_COLOR: [u8; 3] = [147, 51, 234];
const AUTHOR_COLOR: [u8; 3] = [100, 116, 139];
const BODY_COLOR: [u8; 3] = [30, 41, 59];
const FOOTER_COLOR: [u8; 3] = [180, 180, 180];

/// A rendered book ready to be saved or sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookArtifact {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// `"The Big  Loch"` becomes `The_Big_Loch_CryptidCreators.pdf`.
pub fn artifact_filename(title: &str) -> String {
    let mut out = String::new();
    let mut in_space = false;
    for ch in title.chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        match ch {
            '/' | '\\' | ':' | '"' | '*' | '?' | '<' | '>' | '|' => out.push('-'),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    format!("{out}_CryptidCreators.pdf")
}

/// Greedy word wrap. Words longer than `max_chars` are split.
pub fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut line = String::new();
        let mut line_len = 0usize;
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > max_chars {
                if line_len > 0 {
                    lines.push(std::mem::take(&mut line));
                    line_len = 0;
                }
                let rest = word.split_off(max_chars);
                lines.push(word.into_iter().collect());
                word = rest;
            }
            let word_len = word.len();
            if line_len > 0 && line_len + 1 + word_len > max_chars {
                lines.push(std::mem::take(&mut line));
                line_len = 0;
            }
            if line_len > 0 {
                line.push(' ');
                line_len += 1;
            }
            line.extend(word);
            line_len += word_len;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

/// Renders one PDF page per book page: title and author centered at the top,
/// the page picture when it is an embedded data URI, the wrapped text, and a
/// page number footer.
pub fn render_book(title: &str, author_name: &str, pages: &[Page]) -> anyhow::Result<BookArtifact> {
    anyhow::ensure!(!pages.is_empty(), "book has no pages");

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let regular = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });

    let mut kids = Vec::with_capacity(pages.len());
    for (idx, page) in pages.iter().enumerate() {
        let image = page
            .image_url
            .as_deref()
            .and_then(|url| embed_image(&mut doc, url, idx));

        let mut ops = Vec::new();
        centered_text(&mut ops, "F2", TITLE_SIZE, TITLE_COLOR, mm_to_y(20.0), title, 0.56);
        centered_text(
            &mut ops,
            "F1",
            AUTHOR_SIZE,
            AUTHOR_COLOR,
            mm_to_y(30.0),
            &format!("By Author: {author_name}"),
            0.5,
        );
        if let Some((_, placed)) = &image {
            ops.extend([
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        placed.width.into(),
                        0.into(),
                        0.into(),
                        placed.height.into(),
                        placed.x.into(),
                        placed.y.into(),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im1".to_vec())]),
                Operation::new("Q", vec![]),
            ]);
        }

        let body = if page.text.trim().is_empty() {
            "..."
        } else {
            page.text.as_str()
        };
        let line_height = BODY_SIZE * BODY_LINE_FACTOR;
        let mut y = mm_to_y(175.0);
        for line in wrap_text(body, BODY_WRAP_CHARS) {
            text_at(&mut ops, "F1", BODY_SIZE, BODY_COLOR, mm(20.0), y, &line);
            y -= line_height;
        }

        centered_text(
            &mut ops,
            "F1",
            FOOTER_SIZE,
            FOOTER_COLOR,
            mm_to_y(285.0),
            &format!("Page {}", idx + 1),
            0.5,
        );

        let content = Content { operations: ops }
            .encode()
            .with_context(|| format!("encode page {}", idx + 1))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));

        let mut resources = dictionary! {
            "Font" => dictionary! { "F1" => regular, "F2" => bold },
        };
        if let Some((image_id, _)) = image {
            resources.set("XObject", dictionary! { "Im1" => image_id });
        }
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    let pages_dict: Dictionary = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => count,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(PAGE_WIDTH),
            Object::Real(PAGE_HEIGHT),
        ],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).context("write pdf")?;
    tracing::info!(title, pages = pages.len(), bytes = bytes.len(), "book rendered");

    Ok(BookArtifact {
        filename: artifact_filename(title),
        bytes,
    })
}

struct Placement {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

/// Decodes a data URI picture into an RGB image XObject fitted to the 180x120mm
/// box at (15mm, 40mm). Anything else is skipped.
fn embed_image(doc: &mut Document, url: &str, page_idx: usize) -> Option<(ObjectId, Placement)> {
    let Some(encoded) = data_uri_payload(url) else {
        tracing::debug!(page = page_idx + 1, "page image is not a data uri; skipping");
        return None;
    };
    let bytes = match base64::engine::general_purpose::STANDARD.decode(encoded) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(page = page_idx + 1, error = %err, "page image is not valid base64");
            return None;
        }
    };
    let rgb = match image::load_from_memory(&bytes) {
        Ok(img) => img.to_rgb8(),
        Err(err) => {
            tracing::warn!(page = page_idx + 1, error = %err, "page image could not be decoded");
            return None;
        }
    };
    let (width_px, height_px) = rgb.dimensions();
    if width_px == 0 || height_px == 0 {
        return None;
    }

    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width_px,
            "Height" => height_px,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        },
        rgb.into_raw(),
    ));

    let (box_x, box_top, box_w, box_h) = (mm(15.0), mm(40.0), mm(180.0), mm(120.0));
    let scale = (box_w / width_px as f32).min(box_h / height_px as f32);
    let width = width_px as f32 * scale;
    let height = height_px as f32 * scale;
    let x = box_x + (box_w - width) / 2.0;
    let top = box_top + (box_h - height) / 2.0;
    Some((
        image_id,
        Placement {
            x,
            y: PAGE_HEIGHT - top - height,
            width,
            height,
        },
    ))
}

fn data_uri_payload(url: &str) -> Option<&str> {
    let rest = url.trim().strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    meta.ends_with(";base64").then_some(payload)
}

fn mm(value: f32) -> f32 {
    value * PT_PER_MM
}

/// Distance from the top edge in millimetres to a PDF baseline.
fn mm_to_y(from_top: f32) -> f32 {
    PAGE_HEIGHT - mm(from_top)
}

fn centered_text(
    ops: &mut Vec<Operation>,
    font: &str,
    size: f32,
    color: [u8; 3],
    y: f32,
    text: &str,
    avg_em: f32,
) {
    let width = text.chars().count() as f32 * size * avg_em;
    let x = ((PAGE_WIDTH - width) / 2.0).max(mm(5.0));
    text_at(ops, font, size, color, x, y, text);
}

fn text_at(
    ops: &mut Vec<Operation>,
    font: &str,
    size: f32,
    color: [u8; 3],
    x: f32,
    y: f32,
    text: &str,
) {
    let [r, g, b] = color.map(|c| Object::Real(f32::from(c) / 255.0));
    ops.extend([
        Operation::new("BT", vec![]),
        Operation::new("rg", vec![r, g, b]),
        Operation::new("Tf", vec![Object::Name(font.as_bytes().to_vec()), size.into()]),
        Operation::new("Td", vec![x.into(), y.into()]),
        Operation::new("Tj", vec![Object::string_literal(win_ansi(text))]),
        Operation::new("ET", vec![]),
    ]);
}

/// Standard fonts only cover WinAnsi; everything else prints as `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|ch| match ch {
            ' '..='~' => ch as u8,
            '\u{a0}'..='\u{ff}' => ch as u32 as u8,
            '€' => 0x80,
            '…' => 0x85,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            _ => b'?',
        })
        .collect()
}
