//! Content type and charset resolution for responses.
//!
//! Resolution is pure: given the caller-supplied charset (if any), the response headers
//! and the body bytes, [`resolve`] always produces the same [`ContentInfo`].
//!
//! Charset precedence is strict:
//!
//! 1. charset explicitly supplied by the caller
//! 2. `charset=` parameter of the `Content-Type` header
//! 3. in-content declaration (byte order mark, or `<meta>` in the first 1024 bytes of markup)
//! 4. UTF-8
//!
//! Labels that cannot be resolved to a known encoding count as "not asserted" and fall
//! through to the next level. Malformed header values never produce an error.

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252, X_USER_DEFINED};
use http::header::CONTENT_TYPE;
use http::HeaderMap;

/// How many leading bytes of markup are scanned for a `<meta>` charset declaration.
const PRESCAN_LIMIT: usize = 1024;

pub const MIME_HTML: &str = "text/html";
pub const MIME_XHTML: &str = "application/xhtml+xml";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";

/// Which precedence level produced the resolved charset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharsetSource {
    Explicit,
    Header,
    Content,
    Default,
}

/// Resolved `(mime type, charset)` pair of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentInfo {
    /// Lowercased mime essence (`type/subtype`), sniffed when the header is missing or invalid.
    pub mime_type: String,
    pub charset: &'static Encoding,
    pub charset_source: CharsetSource,
}

impl ContentInfo {
    /// Canonical name of the resolved charset (e.g. `UTF-8`, `windows-1250`).
    pub fn charset_name(&self) -> &'static str {
        self.charset.name()
    }

    pub fn is_markup(&self) -> bool {
        is_markup_mime(&self.mime_type)
    }

    pub fn is_text(&self) -> bool {
        self.mime_type.starts_with("text/")
            || self.mime_type == "application/json"
            || self.mime_type == "application/javascript"
            || self.mime_type.ends_with("+xml")
            || self.mime_type == "application/xml"
    }
}

fn is_markup_mime(mime: &str) -> bool {
    mime == MIME_HTML || mime == MIME_XHTML
}

/// Resolves the content type and charset of a response.
pub fn resolve(explicit: Option<&str>, headers: &HeaderMap, body: &[u8]) -> ContentInfo {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    let mime_type = mime_essence(content_type).unwrap_or_else(|| sniff_mime(body).to_string());

    if let Some(encoding) = explicit.and_then(lookup_label) {
        return ContentInfo { mime_type, charset: encoding, charset_source: CharsetSource::Explicit };
    }
    if let Some(label) = explicit {
        log::debug!("Ignoring unknown explicit charset label '{label}'");
    }

    if let Some(encoding) = header_charset(content_type) {
        return ContentInfo { mime_type, charset: encoding, charset_source: CharsetSource::Header };
    }

    if is_markup_mime(&mime_type) {
        if let Some(encoding) = content_charset(body) {
            return ContentInfo { mime_type, charset: encoding, charset_source: CharsetSource::Content };
        }
    }

    ContentInfo {
        mime_type,
        charset: UTF_8,
        charset_source: CharsetSource::Default,
    }
}

/// Returns the lowercased `type/subtype` part of a `Content-Type` value, or `None` when the
/// value is empty or not shaped like a mime type.
pub fn mime_essence(content_type: &str) -> Option<String> {
    let essence = content_type.split(';').next()?.trim();
    let (kind, subtype) = essence.split_once('/')?;

    let valid = |part: &str| {
        !part.is_empty() && part.bytes().all(|b| b.is_ascii_graphic() && b != b'/' && b != b'=')
    };
    if !valid(kind) || !valid(subtype) {
        return None;
    }

    Some(essence.to_ascii_lowercase())
}

/// Returns the encoding named by the `charset` parameter of a `Content-Type` value.
///
/// A `charset=` token that is not preceded by `;`, an empty or whitespace-only value, or an
/// unknown label all mean "no charset asserted".
pub fn header_charset(content_type: &str) -> Option<&'static Encoding> {
    for part in content_type.split(';').skip(1) {
        let Some((name, value)) = part.split_once('=') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("charset") {
            continue;
        }

        let label = value.trim().trim_matches('"').trim_matches('\'').trim();
        if label.is_empty() {
            return None;
        }
        return lookup_label(label);
    }

    None
}

/// Returns the charset declared inside the content: a byte order mark, or a `<meta>`
/// declaration within the first [`PRESCAN_LIMIT`] bytes.
pub fn content_charset(body: &[u8]) -> Option<&'static Encoding> {
    if let Some((encoding, _)) = Encoding::for_bom(body) {
        return Some(encoding);
    }

    let label = prescan_meta_charset(&body[..body.len().min(PRESCAN_LIMIT)])?;
    let encoding = lookup_label(&label)?;

    // A meta declaration cannot switch to a UTF-16 decoder; the bytes were readable as ASCII.
    if encoding == UTF_16BE || encoding == UTF_16LE {
        return Some(UTF_8);
    }
    if encoding == X_USER_DEFINED {
        return Some(WINDOWS_1252);
    }
    Some(encoding)
}

fn lookup_label(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

fn prescan_meta_charset(prefix: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(prefix);
    let lower = text.to_ascii_lowercase();
    let mut search_start = 0_usize;

    while let Some(relative) = lower[search_start..].find("<meta") {
        let tag_start = search_start + relative;
        let tag_end = lower[tag_start..]
            .find('>')
            .map(|end| tag_start + end)
            .unwrap_or(lower.len());

        let tag = &lower[tag_start..tag_end];
        if let Some(pos) = tag.find("charset=") {
            let value_start = tag_start + pos + "charset=".len();
            if let Some(label) = parse_charset_label(&text[value_start..tag_end]) {
                return Some(label);
            }
        }
        search_start = tag_end;
    }

    None
}

fn parse_charset_label(input: &str) -> Option<String> {
    let trimmed = input.trim_start();
    let first = trimmed.chars().next()?;

    let label = if first == '"' || first == '\'' {
        let rest = &trimmed[first.len_utf8()..];
        let end = rest
            .find(|ch: char| ch == first || ch == ';')
            .unwrap_or(rest.len());
        rest[..end].trim()
    } else {
        let end = trimmed
            .find(|ch: char| ch.is_whitespace() || matches!(ch, '"' | '\'' | ';' | '>' | '/'))
            .unwrap_or(trimmed.len());
        trimmed[..end].trim()
    };

    if label.is_empty() {
        None
    } else {
        Some(label.to_owned())
    }
}

/// Classifies a body without a usable `Content-Type`: markup, plain text or binary.
pub fn sniff_mime(body: &[u8]) -> &'static str {
    if body.is_empty() {
        return MIME_TEXT;
    }

    let start = body
        .iter()
        .position(|b| !matches!(b, b'\t' | b'\n' | b'\x0C' | b'\r' | b' '))
        .unwrap_or(body.len());
    let head = &body[start..body.len().min(start + 16)];

    const MARKUP_PREFIXES: [&[u8]; 8] = [
        b"<!doctype html", b"<html", b"<head", b"<body", b"<script", b"<title", b"<meta", b"<!--",
    ];
    for prefix in MARKUP_PREFIXES {
        if head.len() >= prefix.len() && head[..prefix.len()].eq_ignore_ascii_case(prefix) {
            return MIME_HTML;
        }
    }

    let sample = &body[..body.len().min(512)];
    let binary = Encoding::for_bom(sample).is_none()
        && sample
            .iter()
            .any(|b| matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F));
    if binary {
        MIME_OCTET_STREAM
    } else {
        MIME_TEXT
    }
}

/// Decodes `body` with `encoding`, dropping a byte order mark that matches it.
pub fn decode(body: &[u8], encoding: &'static Encoding) -> String {
    let (text, _had_errors) = encoding.decode_with_bom_removal(body);
    text.into_owned()
}
