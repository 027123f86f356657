//! Content type sniffing.
//!
//! Looks at no more than the first [`SNIFF_LEN`] bytes and returns a MIME
//! type, following the WHATWG MIME sniffing signatures that HTTP servers use.
//! Unknown data is `application/octet-stream`; data without binary control
//! bytes is `text/plain; charset=utf-8`.

/// Number of leading bytes considered.
pub const SNIFF_LEN: usize = 512;

pub const OCTET_STREAM: &str = "application/octet-stream";
const TEXT_UTF8: &str = "text/plain; charset=utf-8";

enum Sig {
    /// Case-insensitive HTML tag after optional whitespace, followed by a
    /// space or `>`.
    Html(&'static [u8]),
    /// Exact prefix after optional whitespace.
    AfterSpace(&'static [u8], &'static str),
    /// Exact prefix.
    Exact(&'static [u8], &'static str),
    /// Prefix with `?` bytes matching anything.
    Masked(&'static [u8], &'static str),
    Mp4,
}

const SIGNATURES: &[Sig] = &[
    Sig::Html(b"<!DOCTYPE HTML"),
    Sig::Html(b"<HTML"),
    Sig::Html(b"<HEAD"),
    Sig::Html(b"<SCRIPT"),
    Sig::Html(b"<IFRAME"),
    Sig::Html(b"<H1"),
    Sig::Html(b"<DIV"),
    Sig::Html(b"<FONT"),
    Sig::Html(b"<TABLE"),
    Sig::Html(b"<A"),
    Sig::Html(b"<STYLE"),
    Sig::Html(b"<TITLE"),
    Sig::Html(b"<B"),
    Sig::Html(b"<BODY"),
    Sig::Html(b"<BR"),
    Sig::Html(b"<P"),
    Sig::Html(b"<!--"),
    Sig::AfterSpace(b"<?xml", "text/xml; charset=utf-8"),
    Sig::Exact(b"%PDF-", "application/pdf"),
    Sig::Exact(b"%!PS-Adobe-", "application/postscript"),
    Sig::Exact(b"\xFE\xFF", "text/plain; charset=utf-16be"),
    Sig::Exact(b"\xFF\xFE", "text/plain; charset=utf-16le"),
    Sig::Exact(b"\xEF\xBB\xBF", TEXT_UTF8),
    Sig::Exact(b"\x00\x00\x01\x00", "image/x-icon"),
    Sig::Exact(b"\x00\x00\x02\x00", "image/x-icon"),
    Sig::Exact(b"BM", "image/bmp"),
    Sig::Exact(b"GIF87a", "image/gif"),
    Sig::Exact(b"GIF89a", "image/gif"),
    Sig::Masked(b"RIFF????WEBPVP", "image/webp"),
    Sig::Exact(b"\x89PNG\x0D\x0A\x1A\x0A", "image/png"),
    Sig::Exact(b"\xFF\xD8\xFF", "image/jpeg"),
    Sig::Masked(b"FORM????AIFF", "audio/aiff"),
    Sig::Exact(b"ID3", "audio/mpeg"),
    Sig::Exact(b"OggS\x00", "application/ogg"),
    Sig::Exact(b"MThd\x00\x00\x00\x06", "audio/midi"),
    Sig::Masked(b"RIFF????AVI ", "video/avi"),
    Sig::Masked(b"RIFF????WAVE", "audio/wave"),
    Sig::Mp4,
    Sig::Exact(b"\x1A\x45\xDF\xA3", "video/webm"),
    Sig::Exact(b"\x1F\x8B\x08", "application/x-gzip"),
    Sig::Exact(b"PK\x03\x04", "application/zip"),
    Sig::Exact(b"Rar!\x1A\x07\x00", "application/x-rar-compressed"),
    Sig::Exact(b"Rar!\x1A\x07\x01\x00", "application/x-rar-compressed"),
    Sig::Exact(b"7z\xBC\xAF\x27\x1C", "application/x-7z-compressed"),
    Sig::Exact(b"\x00\x61\x73\x6D", "application/wasm"),
];

/// Guess the MIME type of `data`.
pub fn detect_content_type(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(SNIFF_LEN)];
    let start = data
        .iter()
        .position(|b| !is_whitespace(*b))
        .unwrap_or(data.len());
    let trimmed = &data[start..];

    for sig in SIGNATURES {
        let hit = match sig {
            Sig::Html(tag) => matches_html(trimmed, tag).then_some("text/html; charset=utf-8"),
            Sig::AfterSpace(prefix, mime) => trimmed.starts_with(prefix).then_some(*mime),
            Sig::Exact(prefix, mime) => data.starts_with(prefix).then_some(*mime),
            Sig::Masked(pattern, mime) => matches_masked(data, pattern).then_some(*mime),
            Sig::Mp4 => is_mp4(data).then_some("video/mp4"),
        };
        if let Some(mime) = hit {
            return mime;
        }
    }

    if data.iter().any(|b| is_binary(*b)) {
        OCTET_STREAM
    } else {
        TEXT_UTF8
    }
}

fn is_whitespace(b: u8) -> bool {
    matches!(b, b'\t' | b'\n' | 0x0C | b'\r' | b' ')
}

fn is_binary(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}

fn matches_html(data: &[u8], tag: &[u8]) -> bool {
    if data.len() < tag.len() + 1 {
        return false;
    }
    let head_matches = data
        .iter()
        .zip(tag)
        .all(|(d, t)| d.to_ascii_uppercase() == *t);
    head_matches && matches!(data[tag.len()], b' ' | b'>')
}

fn matches_masked(data: &[u8], pattern: &[u8]) -> bool {
    data.len() >= pattern.len()
        && data
            .iter()
            .zip(pattern)
            .all(|(d, p)| *p == b'?' || d == p)
}

fn is_mp4(data: &[u8]) -> bool {
    if data.len() < 12 {
        return false;
    }
    let box_size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if data.len() < box_size || box_size % 4 != 0 || &data[4..8] != b"ftyp" {
        return false;
    }
    // Brands start at 8; offset 12 is the minor version.
    (8..box_size)
        .step_by(4)
        .filter(|st| *st != 12)
        .any(|st| st + 3 <= data.len() && &data[st..st + 3] == b"mp4")
}
