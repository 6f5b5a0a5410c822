//! Verification link extraction and reply formatting.
//!
//! Pure functions of the decoded email: the same input always renders the
//! same reply, or the same `LinkNotFound`.

use std::borrow::Cow;
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset};
use regex::Regex;

use crate::mail::DecodedEmail;
use crate::pipeline::types::{FormattedReply, LinkNotFound};

/// Placeholder for a missing name or an unparseable date.
pub const UNKNOWN: &str = "Unknown";

/// Replies show times in Singapore time (no DST).
const TARGET_UTC_OFFSET_SECS: i32 = 8 * 3600;

const DATE_FORMAT: &str = "%A, %d %B %Y, %I:%M %p SGT";

static VERIFY_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://www\.netflix\.com/account/travel/verify\?[^\s\]]+").unwrap()
});

static RECIPIENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Hi ([^,\n]+)").unwrap());

/// Build the verification reply for an email, or report that it has no link.
pub fn format_reply(email: &DecodedEmail) -> Result<FormattedReply, LinkNotFound> {
    let link = find_verification_link(&email.body)
        .map(clean_link)
        .ok_or(LinkNotFound)?;
    let recipient_name = find_recipient_name(&email.body)
        .unwrap_or(UNKNOWN)
        .to_string();
    let formatted_date =
        format_sent_date(&email.date_header).unwrap_or_else(|| UNKNOWN.to_string());

    let text = render(&recipient_name, &formatted_date, &link);

    Ok(FormattedReply {
        link,
        recipient_name,
        formatted_date,
        text,
    })
}

/// First verification URL in the body, up to whitespace or `]`.
pub fn find_verification_link(body: &str) -> Option<&str> {
    VERIFY_LINK.find(body).map(|m| m.as_str())
}

/// Name from the first "Hi <name>," greeting.
pub fn find_recipient_name(body: &str) -> Option<&str> {
    RECIPIENT
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Undo `=3D` quoted-printable leftovers, then percent-decode.
pub fn clean_link(raw: &str) -> String {
    let unescaped = raw.replace("=3D", "=");
    let decoded = urlencoding::decode_binary(unescaped.as_bytes());
    String::from_utf8_lossy(&decoded).into_owned()
}

/// Render an RFC 2822 date in the target zone, e.g.
/// "Monday, 01 January 2024, 12:00 PM SGT".
pub fn format_sent_date(header: &str) -> Option<String> {
    let sent = parse_rfc2822(header)?;
    let zone = FixedOffset::east_opt(TARGET_UTC_OFFSET_SECS)?;
    Some(sent.with_timezone(&zone).format(DATE_FORMAT).to_string())
}

/// Backslash-escape `-`, `.` and `_` for MarkdownV2.
pub fn escape_markdown(text: &str) -> Cow<'_, str> {
    if !text.contains(['-', '.', '_']) {
        return Cow::Borrowed(text);
    }
    let mut escaped = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        if matches!(ch, '-' | '.' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    Cow::Owned(escaped)
}

fn parse_rfc2822(header: &str) -> Option<DateTime<FixedOffset>> {
    let header = header.trim();
    if header.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc2822(header) {
        return Some(parsed);
    }
    // Trailing zone comment, e.g. "+0000 (UTC)".
    let open = header.rfind('(').filter(|_| header.ends_with(')'))?;
    DateTime::parse_from_rfc2822(header[..open].trim_end()).ok()
}

/// The link goes inside MarkdownV2 link syntax as-is.
fn render(name: &str, date: &str, link: &str) -> String {
    format!(
        "*Netflix Verification Link*\n\n\
         Requested by: {name}\n\
         Date: {date}\n\n\
         [Click here to verify]({link})\n\n\
         _This link will expire in 15 minutes\\._",
        name = escape_markdown(name),
        date = escape_markdown(date),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINK: &str = "https://www.netflix.com/account/travel/verify?nftoken=abc123";

    fn email(body: &str, date_header: &str) -> DecodedEmail {
        DecodedEmail {
            subject: "Your Netflix temporary access code".into(),
            sender: "info@account.netflix.com".into(),
            date_header: date_header.into(),
            body: body.into(),
        }
    }

    // ── Link extraction ─────────────────────────────────────────────

    #[test]
    fn link_stops_at_whitespace() {
        let body = format!("Tap below\n{LINK} to continue");
        assert_eq!(find_verification_link(&body), Some(LINK));
    }

    #[test]
    fn link_stops_at_closing_bracket() {
        let body = format!("Get Code [{LINK}]");
        assert_eq!(find_verification_link(&body), Some(LINK));
    }

    #[test]
    fn first_link_wins() {
        let body = format!("{LINK}\nhttps://www.netflix.com/account/travel/verify?other=1");
        assert_eq!(find_verification_link(&body), Some(LINK));
    }

    #[test]
    fn other_netflix_urls_do_not_match() {
        assert_eq!(
            find_verification_link("https://www.netflix.com/account/travel/verify nothing"),
            None
        );
        assert_eq!(find_verification_link("https://www.netflix.com/browse?x=1"), None);
        assert_eq!(
            find_verification_link("http://www.netflix.com/account/travel/verify?x=1"),
            None
        );
    }

    #[test]
    fn clean_link_undoes_qp_and_percent_encoding() {
        assert_eq!(
            clean_link("https://www.netflix.com/account/travel/verify?token=3Dabc%20def"),
            "https://www.netflix.com/account/travel/verify?token=abc def"
        );
        assert_eq!(clean_link("verify?a=3D1&b=3D%2Fx"), "verify?a=1&b=/x");
    }

    #[test]
    fn clean_link_leaves_bad_escapes() {
        assert_eq!(clean_link("verify?x=%zz"), "verify?x=%zz");
    }

    // ── Name extraction ─────────────────────────────────────────────

    #[test]
    fn recipient_name_up_to_comma() {
        assert_eq!(find_recipient_name("Hi Maria,\nwelcome"), Some("Maria"));
    }

    #[test]
    fn recipient_name_up_to_newline() {
        assert_eq!(find_recipient_name("Hi Jean-Luc\nwelcome"), Some("Jean-Luc"));
    }

    #[test]
    fn recipient_name_missing() {
        assert_eq!(find_recipient_name("Hello there"), None);
    }

    // ── Dates ───────────────────────────────────────────────────────

    #[test]
    fn date_converted_to_sgt() {
        assert_eq!(
            format_sent_date("Mon, 01 Jan 2024 04:00:00 +0000").as_deref(),
            Some("Monday, 01 January 2024, 12:00 PM SGT")
        );
    }

    #[test]
    fn date_crossing_midnight() {
        assert_eq!(
            format_sent_date("Sun, 31 Dec 2023 20:30:00 -0000").as_deref(),
            Some("Monday, 01 January 2024, 04:30 AM SGT")
        );
    }

    #[test]
    fn date_with_trailing_comment() {
        assert_eq!(
            format_sent_date("Mon, 01 Jan 2024 04:00:00 +0000 (UTC)").as_deref(),
            Some("Monday, 01 January 2024, 12:00 PM SGT")
        );
    }

    #[test]
    fn unparseable_dates_are_none() {
        assert_eq!(format_sent_date(""), None);
        assert_eq!(format_sent_date("yesterday"), None);
        assert_eq!(format_sent_date("(UTC)"), None);
    }

    // ── Escaping ────────────────────────────────────────────────────

    #[test]
    fn escape_markdown_minimal_set() {
        assert_eq!(escape_markdown("Mary-Jane_O.K."), "Mary\\-Jane\\_O\\.K\\.");
        assert_eq!(escape_markdown("Maria"), "Maria");
        assert!(matches!(escape_markdown("Maria"), Cow::Borrowed(_)));
    }

    // ── Full reply ──────────────────────────────────────────────────

    #[test]
    fn reply_contains_escaped_fields_and_link() {
        let body = format!("Hi Anne-Marie,\nTap {LINK} now");
        let reply = format_reply(&email(&body, "Mon, 01 Jan 2024 04:00:00 +0000")).unwrap();

        assert_eq!(reply.recipient_name, "Anne-Marie");
        assert_eq!(reply.link, LINK);
        assert_eq!(
            reply.text,
            format!(
                "*Netflix Verification Link*\n\n\
                 Requested by: Anne\\-Marie\n\
                 Date: Monday, 01 January 2024, 12:00 PM SGT\n\n\
                 [Click here to verify]({LINK})\n\n\
                 _This link will expire in 15 minutes\\._"
            )
        );
    }

    #[test]
    fn missing_name_and_bad_date_still_succeed() {
        let reply = format_reply(&email(LINK, "not a date")).unwrap();
        assert_eq!(reply.recipient_name, UNKNOWN);
        assert_eq!(reply.formatted_date, UNKNOWN);
        assert!(reply.text.contains("Requested by: Unknown\nDate: Unknown\n"));
    }

    #[test]
    fn no_link_is_link_not_found() {
        let result = format_reply(&email("Hi Maria,\nyour code is 1234", ""));
        assert_eq!(result, Err(LinkNotFound));
    }

    #[test]
    fn formatting_is_idempotent() {
        let decoded = email(&format!("Hi Maria,\n{LINK}"), "Mon, 01 Jan 2024 04:00:00 +0000");
        assert_eq!(format_reply(&decoded), format_reply(&decoded));
    }
}
