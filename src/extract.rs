//! Multi-format text extraction with parser selection and fallback.
//!
//! Classifies a PDF as searchable-text, scanned-image, or mixed; selects a
//! parser from the content class's preference list; falls back to the next
//! parser on exception. Non-PDF formats use a single format-specific parser
//! with no fallback.

use std::io::Read;

use crate::models::{ExtractedImage, Page};
use crate::ocr::OcrProvider;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_PLAIN_TEXT: &str = "text/plain";

const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Minimum characters of fast-extracted text per estimated page below which a
/// PDF is classified scanned-image rather than searchable-text.
const SCANNED_TEXT_DENSITY_THRESHOLD: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("OCR extraction failed: {0}")]
    Ocr(String),
    #[error("parser '{0}' is not available")]
    ParserUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentClass {
    SearchableText,
    ScannedImage,
    NonPdf,
}

/// Classify a PDF by how much text the fast-extract parser can pull from it.
/// Non-PDF content types are always `NonPdf`.
pub fn classify(bytes: &[u8], content_type: &str) -> ContentClass {
    if content_type != MIME_PDF {
        return ContentClass::NonPdf;
    }
    match pdf_extract::extract_text_from_mem(bytes) {
        Ok(text) => {
            let pages = estimate_page_count(&text).max(1);
            if text.trim().len() / pages < SCANNED_TEXT_DENSITY_THRESHOLD {
                ContentClass::ScannedImage
            } else {
                ContentClass::SearchableText
            }
        }
        Err(_) => ContentClass::ScannedImage,
    }
}

fn estimate_page_count(text: &str) -> usize {
    text.matches('\x0c').count() + 1
}

/// One named parser adapter in the fallback chain.
pub trait DocumentParser: Send + Sync {
    fn name(&self) -> &str;
    fn parse(&self, bytes: &[u8]) -> Result<Vec<Page>, ExtractError>;
}

/// `pdf-fast`: direct text layer extraction via `pdf-extract`, no OCR.
pub struct FastExtractParser;

impl DocumentParser for FastExtractParser {
    fn name(&self) -> &str {
        "pdf-fast"
    }

    fn parse(&self, bytes: &[u8]) -> Result<Vec<Page>, ExtractError> {
        let text =
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
        Ok(split_form_feeds_into_pages(&text))
    }
}

fn split_form_feeds_into_pages(text: &str) -> Vec<Page> {
    let raw_pages: Vec<&str> = text.split('\x0c').collect();
    raw_pages
        .into_iter()
        .enumerate()
        .filter(|(_, t)| !t.trim().is_empty())
        .map(|(i, t)| Page {
            page_number: (i + 1) as u32,
            text: t.trim().to_string(),
            extracted_images: Vec::new(),
        })
        .collect::<Vec<_>>()
        .tap_nonempty(text)
}

/// Small extension so a doc with no form-feeds still yields exactly one page.
trait TapNonEmpty {
    fn tap_nonempty(self, original: &str) -> Self;
}

impl TapNonEmpty for Vec<Page> {
    fn tap_nonempty(self, original: &str) -> Self {
        if self.is_empty() && !original.trim().is_empty() {
            vec![Page {
                page_number: 1,
                text: original.trim().to_string(),
                extracted_images: Vec::new(),
            }]
        } else {
            self
        }
    }
}

/// `pdf-ocr`: fast-extract for the text layer plus Tesseract OCR over
/// embedded raster images (located by scanning for JPEG/PNG signatures,
/// since this crate does not carry a PDF object-graph renderer).
pub struct OcrCapableParser<'a> {
    pub provider: &'a dyn OcrProvider,
}

impl<'a> DocumentParser for OcrCapableParser<'a> {
    fn name(&self) -> &str {
        "pdf-ocr"
    }

    fn parse(&self, bytes: &[u8]) -> Result<Vec<Page>, ExtractError> {
        let text = pdf_extract::extract_text_from_mem(bytes).unwrap_or_default();
        let mut pages = split_form_feeds_into_pages(&text);
        if pages.is_empty() {
            pages.push(Page {
                page_number: 1,
                text: String::new(),
                extracted_images: Vec::new(),
            });
        }

        let embedded_images = scan_embedded_jpegs(bytes);
        let mut image_number = 0u32;
        for image_bytes in embedded_images {
            let ocr_text = match self.provider.ocr_image(&image_bytes) {
                Ok(out) => out.text,
                Err(_) => String::new(),
            };
            pages[0].extracted_images.push(ExtractedImage {
                image_number,
                ocr_text,
                confidence: None,
            });
            image_number += 1;
        }

        Ok(pages)
    }
}

/// Locate embedded JPEG streams by scanning for SOI/EOI markers. A crude
/// substitute for parsing the PDF object graph, adequate for pulling
/// raster images out for OCR without a full PDF renderer dependency.
fn scan_embedded_jpegs(bytes: &[u8]) -> Vec<Vec<u8>> {
    const SOI: [u8; 2] = [0xFF, 0xD8];
    const EOI: [u8; 2] = [0xFF, 0xD9];
    let mut images = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i..i + 2] == SOI {
            if let Some(end_offset) = bytes[i..]
                .windows(2)
                .position(|w| w == EOI)
                .map(|p| p + 2)
            {
                images.push(bytes[i..i + end_offset].to_vec());
                i += end_offset;
                continue;
            }
        }
        i += 1;
    }
    images
}

/// `pdf-image-model`: vision-capable generator parser seam. LLM providers
/// are an external collaborator this crate only specifies the interface
/// for; this always reports unavailable so the fallback chain moves on to
/// the next parser.
pub struct ImageModelParser;

impl DocumentParser for ImageModelParser {
    fn name(&self) -> &str {
        "pdf-image-model"
    }

    fn parse(&self, _bytes: &[u8]) -> Result<Vec<Page>, ExtractError> {
        Err(ExtractError::ParserUnavailable(self.name().to_string()))
    }
}

pub struct OfficeParser {
    pub content_type: String,
}

impl DocumentParser for OfficeParser {
    fn name(&self) -> &str {
        "office"
    }

    fn parse(&self, bytes: &[u8]) -> Result<Vec<Page>, ExtractError> {
        let text = match self.content_type.as_str() {
            MIME_DOCX => extract_docx(bytes)?,
            MIME_PPTX => extract_pptx(bytes)?,
            MIME_XLSX => extract_xlsx(bytes)?,
            other => return Err(ExtractError::UnsupportedContentType(other.to_string())),
        };
        Ok(vec![Page {
            page_number: 1,
            text,
            extracted_images: Vec::new(),
        }])
    }
}

pub struct PlainTextParser;

impl DocumentParser for PlainTextParser {
    fn name(&self) -> &str {
        "plain-text"
    }

    fn parse(&self, bytes: &[u8]) -> Result<Vec<Page>, ExtractError> {
        let text = String::from_utf8_lossy(bytes).to_string();
        Ok(vec![Page {
            page_number: 1,
            text,
            extracted_images: Vec::new(),
        }])
    }
}

/// Build the ordered parser fallback chain for a content class.
/// `manual_override`, when set, disables fallback and returns a
/// single-parser chain.
pub fn parser_chain<'a>(
    content_type: &str,
    class: ContentClass,
    ocr_provider: &'a dyn OcrProvider,
    manual_override: Option<&str>,
) -> Vec<Box<dyn DocumentParser + 'a>> {
    if content_type != MIME_PDF {
        return match content_type {
            MIME_DOCX | MIME_PPTX | MIME_XLSX => vec![Box::new(OfficeParser {
                content_type: content_type.to_string(),
            })],
            MIME_PLAIN_TEXT => vec![Box::new(PlainTextParser)],
            _ => vec![],
        };
    }

    if let Some(name) = manual_override {
        return match name {
            "fast" => vec![Box::new(FastExtractParser)],
            "ocr" => vec![Box::new(OcrCapableParser {
                provider: ocr_provider,
            })],
            "image_model" => vec![Box::new(ImageModelParser)],
            _ => vec![Box::new(FastExtractParser)],
        };
    }

    match class {
        ContentClass::SearchableText => vec![
            Box::new(FastExtractParser),
            Box::new(OcrCapableParser {
                provider: ocr_provider,
            }),
            Box::new(ImageModelParser),
        ],
        ContentClass::ScannedImage => vec![
            Box::new(OcrCapableParser {
                provider: ocr_provider,
            }),
            Box::new(ImageModelParser),
            Box::new(FastExtractParser),
        ],
        ContentClass::NonPdf => vec![],
    }
}

// ============ OOXML extraction (docx/pptx/xlsx) ============

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    extract_w_t_elements(&doc_xml)
}

fn extract_w_t_elements(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    let mut out = String::new();
    for name in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let text = extract_a_t_elements(&xml)?;
        if !out.is_empty() && !text.is_empty() {
            out.push(' ');
        }
        out.push_str(&text);
    }
    Ok(out)
}

fn extract_a_t_elements(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let sheet_names = list_worksheet_names(&mut archive)?;
    let mut out = String::new();
    for (idx, name) in sheet_names.into_iter().take(XLSX_MAX_SHEETS).enumerate() {
        let sheet_xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let cell_texts = extract_xlsx_sheet_cells(&sheet_xml, &shared_strings)?;
        if idx > 0 && !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&cell_texts);
    }
    Ok(out)
}

fn read_shared_strings(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, ExtractError> {
    let xml = match read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES) {
        Ok(x) => x,
        Err(_) => return Ok(Vec::new()),
    };
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_si = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = true;
                } else if in_si && e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        strings.push(te.unescape().unwrap_or_default().into_owned());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = false;
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn list_worksheet_names(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, ExtractError> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    Ok(names)
}

fn extract_xlsx_sheet_cells(xml: &[u8], shared_strings: &[String]) -> Result<String, ExtractError> {
    let mut cells: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_v = false;
    let mut cell_is_shared_str = false;
    let mut cell_count = 0usize;
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"c" {
                    cell_is_shared_str = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                } else if e.local_name().as_ref() == b"v" {
                    in_v = true;
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_v => {
                let v = te.unescape().unwrap_or_default();
                let s = v.trim();
                if !s.is_empty() && cell_is_shared_str {
                    if let Ok(i) = s.parse::<usize>() {
                        if i < shared_strings.len() {
                            cells.push(shared_strings[i].clone());
                            cell_count += 1;
                        }
                    }
                }
                in_v = false;
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"v" {
                    in_v = false;
                } else if e.local_name().as_ref() == b"c" {
                    cell_is_shared_str = false;
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::UnavailableProvider;

    #[test]
    fn unsupported_content_type_returns_error() {
        let parsers = parser_chain("application/octet-stream", ContentClass::NonPdf, &UnavailableProvider, None);
        assert!(parsers.is_empty());
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = FastExtractParser.parse(b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let parser = OfficeParser {
            content_type: MIME_DOCX.to_string(),
        };
        let err = parser.parse(b"not a zip").unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn classify_non_pdf_is_non_pdf() {
        assert_eq!(classify(b"plain text", MIME_PLAIN_TEXT), ContentClass::NonPdf);
    }

    #[test]
    fn manual_override_disables_fallback() {
        let parsers = parser_chain(MIME_PDF, ContentClass::SearchableText, &UnavailableProvider, Some("fast"));
        assert_eq!(parsers.len(), 1);
        assert_eq!(parsers[0].name(), "pdf-fast");
    }

    #[test]
    fn searchable_text_preference_order() {
        let parsers = parser_chain(MIME_PDF, ContentClass::SearchableText, &UnavailableProvider, None);
        let names: Vec<&str> = parsers.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["pdf-fast", "pdf-ocr", "pdf-image-model"]);
    }

    #[test]
    fn scanned_image_preference_order() {
        let parsers = parser_chain(MIME_PDF, ContentClass::ScannedImage, &UnavailableProvider, None);
        let names: Vec<&str> = parsers.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["pdf-ocr", "pdf-image-model", "pdf-fast"]);
    }
}
