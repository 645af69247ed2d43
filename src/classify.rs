//! Destination policy for a member, decided from its media type alone.

use std::fmt;

use crate::sniff::{
    MIME_DOC, MIME_DOCX, MIME_EPUB, MIME_JAR, MIME_MAIL, MIME_MOBI, MIME_PDF, MIME_PPTX,
    MIME_RTF, MIME_XLSX, MIME_XMIT, MIME_ZIP,
};

/// Where a member ends up in the output tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Policy {
    PlainText,
    NestedContainer,
    Document,
    PlainZip,
    ArchiveMember,
    OpaqueBinary,
}

impl Policy {
    pub fn as_str(self) -> &'static str {
        match self {
            Policy::PlainText => "plain-text",
            Policy::NestedContainer => "nested-container",
            Policy::Document => "document",
            Policy::PlainZip => "plain-zip",
            Policy::ArchiveMember => "archive-member",
            Policy::OpaqueBinary => "opaque-binary",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Word processor, spreadsheet, presentation, PDF and e-book formats.
pub const DOCUMENT_TYPES: &[&str] = &[
    MIME_DOC,
    MIME_DOCX,
    "application/vnd.ms-excel",
    MIME_XLSX,
    "application/vnd.ms-powerpoint",
    MIME_PPTX,
    MIME_PDF,
    MIME_EPUB,
    MIME_MOBI,
    MIME_RTF,
];

pub const ARCHIVE_MEMBER_TYPES: &[&str] = &[MIME_JAR, MIME_MAIL];

/// Rules in priority order; the first match wins.
const RULES: &[(fn(&str) -> bool, Policy)] = &[
    (|m| m.starts_with("text/"), Policy::PlainText),
    (|m| m == MIME_XMIT, Policy::NestedContainer),
    (|m| DOCUMENT_TYPES.iter().any(|t| *t == m), Policy::Document),
    (|m| m == MIME_ZIP, Policy::PlainZip),
    (|m| ARCHIVE_MEMBER_TYPES.iter().any(|t| *t == m), Policy::ArchiveMember),
];

pub fn classify(media_type: &str) -> Policy {
    RULES
        .iter()
        .find(|(matches, _)| matches(media_type))
        .map(|&(_, policy)| policy)
        .unwrap_or(Policy::OpaqueBinary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_of_known_types() {
        let cases = [
            ("text/plain", Policy::PlainText),
            ("text/x-asm", Policy::PlainText),
            (MIME_XMIT, Policy::NestedContainer),
            (MIME_PDF, Policy::Document),
            (MIME_EPUB, Policy::Document),
            ("application/vnd.ms-excel", Policy::Document),
            (MIME_ZIP, Policy::PlainZip),
            (MIME_JAR, Policy::ArchiveMember),
            (MIME_MAIL, Policy::ArchiveMember),
            ("application/octet-stream", Policy::OpaqueBinary),
            ("image/png", Policy::OpaqueBinary),
            ("", Policy::OpaqueBinary),
        ];
        for (media_type, expected) in cases {
            assert_eq!(classify(media_type), expected, "{}", media_type);
        }
    }

    #[test]
    fn classify_is_idempotent() {
        for media_type in DOCUMENT_TYPES
            .iter()
            .chain(ARCHIVE_MEMBER_TYPES)
            .chain(&["text/plain", MIME_XMIT, MIME_ZIP, "application/x-unknown"])
        {
            assert_eq!(classify(media_type), classify(media_type));
        }
    }

    #[test]
    fn text_prefix_beats_every_other_rule() {
        // a text/ type is never reclassified even if listed elsewhere
        assert_eq!(classify("text/rtf"), Policy::PlainText);
    }
}
