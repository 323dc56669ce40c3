use crate::database::models::ChunkType;
use serde_json::{json, Value as Json};
use std::io::Read;
use tracing::{debug, warn};

/// One unit of extracted content, prior to cleaning and chunking (§4.1).
#[derive(Debug, Clone)]
pub struct ContentBlock {
    pub kind: ChunkType,
    pub content: String,
    pub section_name: Option<String>,
    pub page: Option<i32>,
    pub sheet_name: Option<String>,
    pub sub_index: Option<i32>,
    pub metadata: Json,
}

impl ContentBlock {
    fn text(content: String) -> Self {
        Self {
            kind: ChunkType::Text,
            content,
            section_name: None,
            page: None,
            sheet_name: None,
            sub_index: None,
            metadata: Json::Null,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            kind: ChunkType::Error,
            content: message.into(),
            section_name: None,
            page: None,
            sheet_name: None,
            sub_index: None,
            metadata: Json::Null,
        }
    }
}

#[derive(Debug)]
pub struct ParsedDocument {
    pub blocks: Vec<ContentBlock>,
    pub detected_content_kind: String,
    pub detection_method: &'static str,
    pub has_images: bool,
}

pub struct DocumentParser;

const LEGACY_SALVAGE_MAX_BLOCKS: usize = 50;
const LEGACY_SALVAGE_MIN_RUN: usize = 40;

impl DocumentParser {
    /// Dispatches by declared kind, then magic bytes, then filename extension.
    pub fn parse(data: &[u8], declared_kind: &str, filename: &str) -> ParsedDocument {
        let (detected, method) = Self::detect_kind(data, declared_kind, filename);
        debug!(detected = %detected, method, "parser dispatch");

        let blocks = match detected.as_str() {
            "pdf" => Self::parse_pdf(data),
            "docx" => Self::parse_docx(data),
            "xlsx" => Self::parse_xlsx(data),
            "pptx" => Self::parse_pptx(data),
            "doc" | "xls" | "ppt" => Self::salvage_legacy_office(data),
            "rtf" => Self::parse_rtf(data),
            "md" | "markdown" => Self::parse_markdown(data),
            "csv" => Self::parse_csv(data),
            _ => Self::parse_plain_text(data),
        };

        let has_images = blocks.iter().any(|b| b.kind == ChunkType::ImageText);

        ParsedDocument {
            blocks,
            detected_content_kind: detected,
            detection_method: method,
            has_images,
        }
    }

    fn detect_kind(data: &[u8], declared_kind: &str, filename: &str) -> (String, &'static str) {
        let declared = declared_kind.to_lowercase();
        if KNOWN_KINDS.contains(&declared.as_str()) {
            return (declared, "declared");
        }

        if let Some(kind) = infer::get(data) {
            let mapped = match kind.mime_type() {
                "application/pdf" => Some("pdf"),
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                    Some("docx")
                }
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
                    Some("xlsx")
                }
                "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
                    Some("pptx")
                }
                "application/msword" => Some("doc"),
                "application/vnd.ms-excel" => Some("xls"),
                "application/vnd.ms-powerpoint" => Some("ppt"),
                "application/rtf" | "text/rtf" => Some("rtf"),
                m if m.starts_with("text/") => Some("txt"),
                _ => None,
            };
            if let Some(kind) = mapped {
                return (kind.to_string(), "magic_bytes");
            }
        }

        let extension = std::path::Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        (extension, "extension")
    }

    fn parse_pdf(data: &[u8]) -> Vec<ContentBlock> {
        let doc = match lopdf::Document::load_mem(data) {
            Ok(doc) => doc,
            Err(e) => return vec![ContentBlock::error(format!("pdf load failed: {e}"))],
        };

        let pages = doc.get_pages();
        if pages.is_empty() {
            return vec![ContentBlock::error("pdf has no pages")];
        }

        let mut blocks = Vec::new();
        for (page_num, _) in pages.iter() {
            match doc.extract_text(&[*page_num]) {
                Ok(text) if !text.trim().is_empty() => {
                    blocks.push(ContentBlock {
                        kind: ChunkType::Text,
                        content: text,
                        section_name: None,
                        page: Some(*page_num as i32),
                        sheet_name: None,
                        sub_index: None,
                        metadata: Json::Null,
                    });
                }
                Ok(_) => {
                    // No extractable text. No OCR backend is wired up, so the
                    // image branch is recorded and skipped rather than failed.
                    blocks.push(ContentBlock {
                        kind: ChunkType::ImageText,
                        content: String::new(),
                        section_name: None,
                        page: Some(*page_num as i32),
                        sheet_name: None,
                        sub_index: None,
                        metadata: json!({"ocr_skipped": true}),
                    });
                }
                Err(e) => {
                    warn!(page = page_num, error = %e, "pdf page extraction failed");
                    blocks.push(ContentBlock::error(format!(
                        "page {page_num} extraction failed: {e}"
                    )));
                }
            }
        }

        blocks
    }

    fn parse_docx(data: &[u8]) -> Vec<ContentBlock> {
        let docx = match docx_rs::read_docx(data) {
            Ok(docx) => docx,
            Err(e) => return vec![ContentBlock::error(format!("docx parse failed: {e:?}"))],
        };

        let mut blocks = Vec::new();
        for (idx, child) in docx.document.children.into_iter().enumerate() {
            if let docx_rs::DocumentChild::Paragraph(para) = child {
                let mut text = String::new();
                for child in para.children {
                    if let docx_rs::ParagraphChild::Run(run) = child {
                        for run_child in run.children {
                            if let docx_rs::RunChild::Text(t) = run_child {
                                text.push_str(&t.text);
                            }
                        }
                    }
                }
                if !text.trim().is_empty() {
                    blocks.push(ContentBlock {
                        kind: ChunkType::Text,
                        content: text,
                        section_name: None,
                        page: None,
                        sheet_name: None,
                        sub_index: Some(idx as i32),
                        metadata: Json::Null,
                    });
                }
            }
        }

        if blocks.is_empty() {
            blocks.push(ContentBlock::error("docx contained no extractable paragraphs"));
        }
        blocks
    }

    fn parse_xlsx(data: &[u8]) -> Vec<ContentBlock> {
        use calamine::Reader;

        let cursor = std::io::Cursor::new(data);
        let mut workbook = match calamine::open_workbook_auto_from_rs(cursor) {
            Ok(wb) => wb,
            Err(e) => return vec![ContentBlock::error(format!("xlsx open failed: {e}"))],
        };

        let sheet_names = workbook.sheet_names().to_owned();
        let mut blocks = Vec::new();

        for sheet_name in sheet_names {
            let range = match workbook.worksheet_range(&sheet_name) {
                Ok(range) => range,
                Err(e) => {
                    blocks.push(ContentBlock::error(format!(
                        "sheet '{sheet_name}' unreadable: {e}"
                    )));
                    continue;
                }
            };

            let rows: Vec<Vec<String>> = range
                .rows()
                .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                .collect();
            if rows.is_empty() {
                continue;
            }

            // Probable header row: the densest row among the first few.
            let header_idx = rows
                .iter()
                .take(5)
                .enumerate()
                .max_by_key(|(_, row)| row.iter().filter(|c| !c.is_empty()).count())
                .map(|(i, _)| i)
                .unwrap_or(0);

            let header = &rows[header_idx];
            let mut text = header.join(" | ");
            text.push('\n');
            for row in rows.iter().skip(header_idx + 1) {
                if row.iter().all(|c| c.is_empty()) {
                    continue;
                }
                text.push_str(&row.join(" | "));
                text.push('\n');
            }

            blocks.push(ContentBlock {
                kind: ChunkType::Table,
                content: text,
                section_name: None,
                page: None,
                sheet_name: Some(sheet_name),
                sub_index: None,
                metadata: Json::Null,
            });
        }

        if blocks.is_empty() {
            blocks.push(ContentBlock::error("workbook had no readable sheets"));
        }
        blocks
    }

    fn parse_pptx(data: &[u8]) -> Vec<ContentBlock> {
        let reader = std::io::Cursor::new(data);
        let mut archive = match zip::ZipArchive::new(reader) {
            Ok(a) => a,
            Err(e) => return vec![ContentBlock::error(format!("pptx open failed: {e}"))],
        };

        let mut slide_indices: Vec<usize> = (0..archive.len())
            .filter_map(|i| {
                let name = archive.by_index(i).ok()?.name().to_string();
                extract_slide_number(&name, "ppt/slides/slide", ".xml")
            })
            .collect();
        slide_indices.sort_unstable();
        slide_indices.dedup();

        let mut blocks = Vec::new();
        for slide_num in slide_indices {
            let slide_path = format!("ppt/slides/slide{slide_num}.xml");
            if let Ok(text) = read_zip_entry_text(&mut archive, &slide_path) {
                let content = extract_xml_runs(&text, "a:t");
                if !content.trim().is_empty() {
                    blocks.push(ContentBlock {
                        kind: ChunkType::Slide,
                        content,
                        section_name: Some(format!("Slide {slide_num}")),
                        page: Some(slide_num as i32),
                        sheet_name: None,
                        sub_index: None,
                        metadata: Json::Null,
                    });
                }
            }

            let notes_path = format!("ppt/notesSlides/notesSlide{slide_num}.xml");
            if let Ok(text) = read_zip_entry_text(&mut archive, &notes_path) {
                let content = extract_xml_runs(&text, "a:t");
                if !content.trim().is_empty() {
                    blocks.push(ContentBlock {
                        kind: ChunkType::Notes,
                        content,
                        section_name: Some(format!("Slide {slide_num} notes")),
                        page: Some(slide_num as i32),
                        sheet_name: None,
                        sub_index: None,
                        metadata: Json::Null,
                    });
                }
            }
        }

        if blocks.is_empty() {
            blocks.push(ContentBlock::error("presentation had no readable slides"));
        }
        blocks
    }

    fn parse_rtf(data: &[u8]) -> Vec<ContentBlock> {
        let (text, _, had_errors) = encoding_rs::WINDOWS_1252.decode(data);
        if had_errors {
            debug!("rtf decode used lossy windows-1252 fallback");
        }
        match rtf_parser::document::RtfDocument::try_from(text.as_ref()) {
            Ok(doc) => {
                let plain = doc.get_text();
                if plain.trim().is_empty() {
                    vec![ContentBlock::error("rtf contained no text")]
                } else {
                    vec![ContentBlock::text(plain)]
                }
            }
            Err(e) => vec![ContentBlock::error(format!("rtf parse failed: {e}"))],
        }
    }

    fn parse_markdown(data: &[u8]) -> Vec<ContentBlock> {
        let text = decode_text(data);
        use pulldown_cmark::{Event, Parser};
        let mut plain = String::new();
        for event in Parser::new(&text) {
            match event {
                Event::Text(t) | Event::Code(t) => plain.push_str(&t),
                Event::SoftBreak | Event::HardBreak | Event::End(_) => plain.push('\n'),
                _ => {}
            }
        }
        if plain.trim().is_empty() {
            vec![ContentBlock::error("markdown contained no text")]
        } else {
            vec![ContentBlock::text(plain)]
        }
    }

    fn parse_csv(data: &[u8]) -> Vec<ContentBlock> {
        let text = decode_text(data);
        if text.trim().is_empty() {
            vec![ContentBlock::error("csv file was empty")]
        } else {
            vec![ContentBlock {
                kind: ChunkType::Table,
                content: text,
                section_name: None,
                page: None,
                sheet_name: None,
                sub_index: None,
                metadata: Json::Null,
            }]
        }
    }

    fn parse_plain_text(data: &[u8]) -> Vec<ContentBlock> {
        let text = decode_text(data);
        if text.trim().is_empty() {
            vec![ContentBlock::error("file contained no decodable text")]
        } else {
            vec![ContentBlock::text(text)]
        }
    }

    /// Last-resort salvage for legacy binary Office formats (§4.1): scan for
    /// contiguous printable runs and keep only the ones that look like prose.
    fn salvage_legacy_office(data: &[u8]) -> Vec<ContentBlock> {
        let mut blocks = Vec::new();
        let mut run: Vec<u8> = Vec::new();

        let mut flush = |run: &mut Vec<u8>, blocks: &mut Vec<ContentBlock>| {
            if run.len() >= LEGACY_SALVAGE_MIN_RUN && blocks.len() < LEGACY_SALVAGE_MAX_BLOCKS {
                if let Ok(text) = String::from_utf8(run.clone()) {
                    if looks_like_prose(&text) {
                        blocks.push(ContentBlock {
                            kind: ChunkType::Text,
                            content: text,
                            section_name: None,
                            page: None,
                            sheet_name: None,
                            sub_index: Some(blocks.len() as i32),
                            metadata: json!({"salvaged": true}),
                        });
                    }
                }
            }
            run.clear();
        };

        for &byte in data {
            if byte.is_ascii_graphic() || byte == b' ' {
                run.push(byte);
            } else {
                flush(&mut run, &mut blocks);
            }
        }
        flush(&mut run, &mut blocks);

        if blocks.is_empty() {
            blocks.push(ContentBlock::error(
                "legacy office salvage found no prose-like text",
            ));
        }
        blocks
    }
}

pub const KNOWN_KINDS: &[&str] = &[
    "pdf", "docx", "doc", "xlsx", "xls", "pptx", "ppt", "rtf", "md", "markdown", "csv", "txt",
];

fn looks_like_prose(text: &str) -> bool {
    let letters = text.chars().filter(|c| c.is_alphabetic()).count();
    if text.is_empty() {
        return false;
    }
    let letter_ratio = letters as f32 / text.len() as f32;
    let multi_word = text.split_whitespace().count() >= 2;
    let mixed_case = text.chars().any(|c| c.is_uppercase()) && text.chars().any(|c| c.is_lowercase());
    letter_ratio >= 0.30 && multi_word && mixed_case
}

/// Encoding autodetection (§4.1): UTF-8 first, falling back to a Windows-1252
/// lossy decode for legacy text exports that carry no BOM.
fn decode_text(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(data);
            text.into_owned()
        }
    }
}

fn extract_slide_number(entry_name: &str, prefix: &str, suffix: &str) -> Option<usize> {
    entry_name
        .strip_prefix(prefix)
        .and_then(|s| s.strip_suffix(suffix))
        .and_then(|s| s.parse().ok())
}

fn read_zip_entry_text<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    path: &str,
) -> std::io::Result<String> {
    let mut file = archive
        .by_name(path)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::NotFound, e))?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;
    Ok(buf)
}

fn extract_xml_runs(xml: &str, tag: &str) -> String {
    use quick_xml::events::Event;
    use quick_xml::reader::Reader;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_tag = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == tag.as_bytes() => in_tag = true,
            Ok(Event::End(e)) if e.name().as_ref() == tag.as_bytes() => {
                in_tag = false;
                out.push(' ');
            }
            Ok(Event::Text(t)) if in_tag => {
                if let Ok(decoded) = t.decode() {
                    if let Ok(text) = quick_xml::escape::unescape(&decoded) {
                        out.push_str(&text);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    out
}
