//! Message decoder: subject, sender, date and a plain-text body.
//!
//! Body policy: first non-attachment `text/plain` part wins; otherwise the
//! first non-attachment `text/html` part with its tags stripped. A
//! single-part message uses its payload as-is. Part bytes are taken after
//! transfer decoding but before any charset conversion, then read as UTF-8
//! with a Latin-1 fallback.

use std::sync::LazyLock;

use mail_parser::decoders::base64::base64_decode;
use mail_parser::decoders::quoted_printable::quoted_printable_decode;
use mail_parser::{
    Encoding, HeaderName, Message, MessageParser, MessagePart, MimeHeaders, PartType,
};
use regex::Regex;

use crate::error::DecodeError;
use crate::mail::types::{DecodedEmail, RawEmail};

/// Subject used when the header is missing or empty.
pub const NO_SUBJECT: &str = "No Subject";

/// Body used when no text could be extracted.
pub const NO_CONTENT: &str = "No content available";

/// Anything from `<` to the next `>` with no `<` in between.
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^<]+?>").unwrap());

/// Decode a raw message into the fields the formatter uses.
pub fn decode(raw: &RawEmail) -> Result<DecodedEmail, DecodeError> {
    let bytes = raw.as_bytes();
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(DecodeError::Empty);
    }

    let parsed = MessageParser::default()
        .parse(bytes)
        .ok_or_else(|| DecodeError::Malformed("parser rejected message".into()))?;
    // Free text with a colon parses as an unknown header; a real message
    // carries at least one standard field.
    if !parsed
        .headers()
        .iter()
        .any(|h| !matches!(h.name, HeaderName::Other(_)))
    {
        return Err(DecodeError::Malformed(
            "no standard header fields found".into(),
        ));
    }

    let subject = parsed
        .subject()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(NO_SUBJECT)
        .to_string();

    let body = extract_body(&parsed, bytes)
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| NO_CONTENT.to_string());

    Ok(DecodedEmail {
        subject,
        sender: raw_header(&parsed, HeaderName::From),
        date_header: raw_header(&parsed, HeaderName::Date),
        body,
    })
}

/// Remove every `<...>` run. Entities are left alone.
pub fn strip_tags(html: &str) -> String {
    TAG.replace_all(html, "").into_owned()
}

/// UTF-8 if valid, otherwise each byte as its Latin-1 code point.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

fn extract_body(message: &Message<'_>, raw: &[u8]) -> Option<String> {
    let root = message.parts.first()?;
    if !matches!(root.body, PartType::Multipart(_)) {
        return Some(part_text(root, raw));
    }

    let mut html = None;
    for part in &message.parts {
        if is_attachment(part, raw) {
            continue;
        }
        if is_mime(part, "text", "plain") {
            return Some(part_text(part, raw));
        }
        if html.is_none() && is_mime(part, "text", "html") {
            html = Some(strip_tags(&part_text(part, raw)));
        }
    }
    html
}

/// Transfer-decoded payload of `part`, read as text.
fn part_text(part: &MessagePart<'_>, raw: &[u8]) -> String {
    let payload = raw
        .get(part.offset_body as usize..part.offset_end as usize)
        .and_then(|body| match part.encoding {
            Encoding::None => Some(body.to_vec()),
            Encoding::QuotedPrintable => quoted_printable_decode(body),
            Encoding::Base64 => base64_decode(body),
        });
    match payload {
        Some(bytes) => decode_text(&bytes),
        None => decode_text(part.contents()),
    }
}

/// Header text with folding collapsed; empty when absent.
fn raw_header(message: &Message<'_>, name: HeaderName<'static>) -> String {
    message
        .header_raw(name)
        .map(|v| v.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default()
}

/// "attachment" anywhere in the Content-Disposition value, parameters included.
fn is_attachment(part: &MessagePart<'_>, raw: &[u8]) -> bool {
    part.headers
        .iter()
        .filter(|h| matches!(h.name, HeaderName::ContentDisposition))
        .filter_map(|h| raw.get(h.offset_start as usize..h.offset_end as usize))
        .any(|value| String::from_utf8_lossy(value).contains("attachment"))
}

/// Parts without a Content-Type are text/plain.
fn is_mime(part: &MessagePart<'_>, ctype: &str, subtype: &str) -> bool {
    match part.content_type() {
        Some(ct) => {
            ct.ctype().eq_ignore_ascii_case(ctype)
                && ct.subtype().is_some_and(|s| s.eq_ignore_ascii_case(subtype))
        }
        None => ctype == "text" && subtype == "plain",
    }
}
