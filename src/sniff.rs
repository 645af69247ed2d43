//! Content sniffing for members and sequential datasets.
//!
//! Container metadata says nothing about what a member holds, so the media
//! type is derived from the bytes: magic numbers first, then zip entry names,
//! then a printable-ratio test for EBCDIC and ASCII text. EBCDIC text is
//! converted to UTF-8 lines here so every later stage sees decoded text.

use std::io::Cursor;

use crate::ebcdic;
use crate::xmit;

pub const MIME_XMIT: &str = "application/xmit";
pub const MIME_ZIP: &str = "application/zip";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOC: &str = "application/msword";
pub const MIME_RTF: &str = "application/rtf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_EPUB: &str = "application/epub+zip";
pub const MIME_MOBI: &str = "application/x-mobipocket-ebook";
pub const MIME_JAR: &str = "application/java-archive";
pub const MIME_MAIL: &str = "message/rfc822";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_OCTET: &str = "application/octet-stream";

/// Share of printable bytes above which a member counts as text.
const TEXT_THRESHOLD: f64 = 0.95;

/// `(offset, magic, media type, extension)`.
const MAGIC: &[(usize, &[u8], &str, &str)] = &[
    (0, b"%PDF", MIME_PDF, ".pdf"),
    (0, &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1], MIME_DOC, ".doc"),
    (0, b"{\\rtf", MIME_RTF, ".rtf"),
    (60, b"BOOKMOBI", MIME_MOBI, ".mobi"),
    (0, &[0x1F, 0x8B], "application/gzip", ".gz"),
    (0, &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C], "application/x-7z-compressed", ".7z"),
    (0, b"\x89PNG", "image/png", ".png"),
    (0, b"GIF8", "image/gif", ".gif"),
    (0, &[0xFF, 0xD8, 0xFF], "image/jpeg", ".jpg"),
];

const MAIL_HEADERS: &[&str] = &[
    "From ",
    "Return-Path:",
    "Received:",
    "Message-ID:",
    "MIME-Version:",
];

/// Classification of one member's bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sniffed {
    pub media_type: &'static str,
    pub extension: &'static str,
    /// UTF-8 lines for EBCDIC text, the raw bytes otherwise.
    pub data: Vec<u8>,
}

impl Sniffed {
    fn raw(media_type: &'static str, extension: &'static str, data: Vec<u8>) -> Self {
        Self {
            media_type,
            extension,
            data,
        }
    }
}

/// Sniff the logical records of a member or sequential dataset.
///
/// `line_oriented` is false for RECFM=U data, whose blocks are never split
/// into text lines.
pub fn sniff(records: &[Vec<u8>], line_oriented: bool) -> Sniffed {
    let raw: Vec<u8> = records.concat();

    if xmit::is_container(&raw) {
        return Sniffed::raw(MIME_XMIT, ".xmi", raw);
    }
    if let Some((media_type, extension)) = magic(&raw) {
        return Sniffed::raw(media_type, extension, raw);
    }
    if raw.starts_with(b"PK\x03\x04") {
        let (media_type, extension) = refine_zip(&raw);
        return Sniffed::raw(media_type, extension, raw);
    }
    if is_mail(&raw) {
        return Sniffed::raw(MIME_MAIL, ".eml", raw);
    }
    if line_oriented && printable_ratio(&raw, ebcdic::is_printable) >= TEXT_THRESHOLD {
        return Sniffed::raw(MIME_TEXT, ".txt", ebcdic_lines(records));
    }
    if printable_ratio(&raw, is_ascii_text) >= TEXT_THRESHOLD {
        return Sniffed::raw(MIME_TEXT, ".txt", raw);
    }
    Sniffed::raw(MIME_OCTET, ".bin", raw)
}

fn magic(bytes: &[u8]) -> Option<(&'static str, &'static str)> {
    MAGIC
        .iter()
        .find(|(offset, magic, _, _)| bytes.get(*offset..offset + magic.len()) == Some(*magic))
        .map(|&(_, _, media_type, extension)| (media_type, extension))
}

/// Zip containers share one signature; entry names tell them apart.
fn refine_zip(bytes: &[u8]) -> (&'static str, &'static str) {
    let archive = match zip::ZipArchive::new(Cursor::new(bytes)) {
        Ok(a) => a,
        Err(_) => return (MIME_ZIP, ".zip"),
    };
    let names: Vec<&str> = archive.file_names().collect();
    let has = |prefix: &str| names.iter().any(|n| n.starts_with(prefix));

    if has("mimetype") && has("META-INF/container.xml") {
        (MIME_EPUB, ".epub")
    } else if has("word/") {
        (MIME_DOCX, ".docx")
    } else if has("xl/") {
        (MIME_XLSX, ".xlsx")
    } else if has("ppt/") {
        (MIME_PPTX, ".pptx")
    } else if has("META-INF/MANIFEST.MF") || names.iter().any(|n| n.ends_with(".class")) {
        (MIME_JAR, ".jar")
    } else {
        (MIME_ZIP, ".zip")
    }
}

fn is_mail(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(512)];
    match std::str::from_utf8(head) {
        Ok(text) => MAIL_HEADERS.iter().any(|h| text.starts_with(h)),
        Err(_) => false,
    }
}

fn is_ascii_text(byte: u8) -> bool {
    matches!(byte, 0x20..=0x7E | b'\t' | b'\n' | b'\r' | 0x0C)
}

fn printable_ratio(bytes: &[u8], printable: fn(u8) -> bool) -> f64 {
    if bytes.is_empty() {
        return 1.0;
    }
    bytes.iter().filter(|&&b| printable(b)).count() as f64 / bytes.len() as f64
}

/// One UTF-8 line per record, trailing blanks removed.
fn ebcdic_lines(records: &[Vec<u8>]) -> Vec<u8> {
    let mut out = String::new();
    for record in records {
        out.push_str(ebcdic::decode(record).trim_end_matches(' '));
        out.push('\n');
    }
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(names: &[&str]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for name in names {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"x").unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn ebcdic_text_becomes_utf8_lines() {
        let records = vec![
            ebcdic::encode("         TITLE 'HELLO'                                  "),
            ebcdic::encode("         END"),
        ];
        let s = sniff(&records, true);
        assert_eq!(s.media_type, MIME_TEXT);
        assert_eq!(
            String::from_utf8(s.data).unwrap(),
            "         TITLE 'HELLO'\n         END\n"
        );
    }

    #[test]
    fn undefined_records_are_not_decoded_as_text() {
        let records = vec![ebcdic::encode("LOAD MODULE TEXT")];
        let s = sniff(&records, false);
        assert_ne!(s.media_type, MIME_TEXT);
        assert_eq!(s.data, records[0]);
    }

    #[test]
    fn magic_numbers_win_over_text() {
        let s = sniff(&[b"%PDF-1.4 plain looking".to_vec()], true);
        assert_eq!((s.media_type, s.extension), (MIME_PDF, ".pdf"));
    }

    #[test]
    fn zip_entries_refine_the_media_type() {
        let docx = zip_with(&["[Content_Types].xml", "word/document.xml"]);
        assert_eq!(sniff(&[docx], true).media_type, MIME_DOCX);
        let jar = zip_with(&["META-INF/MANIFEST.MF", "a/B.class"]);
        assert_eq!(sniff(&[jar], true).media_type, MIME_JAR);
        let plain = zip_with(&["README.TXT"]);
        assert_eq!(sniff(&[plain], true).extension, ".zip");
    }

    #[test]
    fn truncated_zip_is_still_a_zip() {
        let s = sniff(&[b"PK\x03\x04garbage".to_vec()], true);
        assert_eq!(s.media_type, MIME_ZIP);
    }

    #[test]
    fn ascii_mail_and_text() {
        let mail = b"Received: from mvs\r\nSubject: hi\r\n\r\nbody".to_vec();
        assert_eq!(sniff(&[mail], false).media_type, MIME_MAIL);
        let text = b"plain ascii readme\n".to_vec();
        let s = sniff(&[text.clone()], false);
        assert_eq!((s.media_type, s.data), (MIME_TEXT, text));
    }

    #[test]
    fn binary_falls_back_to_octet_stream() {
        let s = sniff(&[vec![0x00, 0x01, 0x02, 0x03, 0xFE]], true);
        assert_eq!((s.media_type, s.extension), (MIME_OCTET, ".bin"));
    }
}
