//! Content-type detection by magic bytes.
//!
//! The allow-list gate must not trust file extensions: print spoolers drop
//! jobs with arbitrary names (`job-4711`, `print.tmp`). We read the head of
//! the file and match it against a small table of signatures, the same way
//! libmagic would for the formats a print-to-PDF drop folder realistically
//! receives.

use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Bytes read from the head of a file for sniffing.
const SNIFF_LEN: usize = 512;

/// Detects a file's MIME type from its contents.
///
/// `None` is the negative result (unreadable file); it never passes the
/// allow-list.
pub trait ContentSniffer: Send + Sync {
    fn sniff(&self, path: &Path) -> Option<String>;
}

/// Signature-table sniffer used by default.
#[derive(Debug, Default, Clone, Copy)]
pub struct MagicSniffer;

/// (prefix, MIME type). First match wins; PJL-wrapped PostScript is
/// handled before this table is consulted.
const SIGNATURES: &[(&[u8], &str)] = &[
    (b"%!PS", "application/postscript"),
    (b"\x04%!PS", "application/postscript"),
    (b"\xC5\xD0\xD3\xC6", "application/postscript"),
    (b"%PDF-", "application/pdf"),
    (b"\x1B%-12345X@PJL", "application/vnd.hp-pjl"),
    (b"\x1BE", "application/vnd.hp-pcl"),
    (b"\x89PNG\r\n\x1A\n", "image/png"),
    (b"\xFF\xD8\xFF", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"II*\x00", "image/tiff"),
    (b"MM\x00*", "image/tiff"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1F\x8B", "application/gzip"),
];

impl ContentSniffer for MagicSniffer {
    fn sniff(&self, path: &Path) -> Option<String> {
        let mut file = std::fs::File::open(path).ok()?;
        let mut head = Vec::with_capacity(SNIFF_LEN);
        file.by_ref()
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut head)
            .ok()?;
        let mime = sniff_bytes(&head);
        debug!("{} sniffed as {}", path.display(), mime);
        Some(mime.to_string())
    }
}

/// Classify the head of a file.
pub fn sniff_bytes(head: &[u8]) -> &'static str {
    if head.is_empty() {
        return "inode/x-empty";
    }
    // Spool files occasionally carry a UTF-8 BOM before the PostScript header.
    let body = head.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(head);

    if body.starts_with(b"\x1B%-12345X") && contains(body, b"%!PS") {
        return "application/postscript";
    }
    if let Some(&(_, mime)) = SIGNATURES.iter().find(|(sig, _)| body.starts_with(sig)) {
        return mime;
    }
    if looks_like_text(body) {
        return "text/plain";
    }
    "application/octet-stream"
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn looks_like_text(bytes: &[u8]) -> bool {
    if bytes.contains(&0) {
        return false;
    }
    // The head may cut a multi-byte character in half.
    match std::str::from_utf8(bytes) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    }
}
