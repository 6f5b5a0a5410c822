//! IMAP mailbox client. Finds and fetches the newest matching message.
//!
//! Speaks just enough IMAP4rev1 over rustls for one search and one fetch.
//! Everything here is blocking; async callers go through `spawn_blocking`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;

use crate::error::MailboxError;
use crate::mail::types::{MailFilter, MailboxQuery, RawEmail};

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Fetch the newest message in INBOX matching `filter`.
///
/// Returns `Ok(None)` when the search finds nothing. The session is logged
/// out on every path once the connection is up.
pub fn fetch_latest_matching(
    query: &MailboxQuery,
    filter: &MailFilter,
) -> Result<Option<RawEmail>, MailboxError> {
    let stream = connect_tls(query)?;
    let mut session = ImapSession::new(stream);
    fetch_latest_in_session(&mut session, query, filter)
}

fn connect_tls(query: &MailboxQuery) -> Result<TlsStream, MailboxError> {
    let tcp = TcpStream::connect((query.server.as_str(), query.port)).map_err(|e| {
        MailboxError::Connect {
            server: query.server.clone(),
            port: query.port,
            reason: e.to_string(),
        }
    })?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = ServerName::try_from(query.server.clone())
        .map_err(|e| MailboxError::Tls(format!("invalid server name {}: {e}", query.server)))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| MailboxError::Tls(e.to_string()))?;

    Ok(rustls::StreamOwned::new(conn, tcp))
}

fn fetch_latest_in_session<S: Read + Write>(
    session: &mut ImapSession<S>,
    query: &MailboxQuery,
    filter: &MailFilter,
) -> Result<Option<RawEmail>, MailboxError> {
    let result = find_latest(session, query, filter);

    if let Err(e) = session.logout() {
        tracing::debug!(error = %e, "IMAP logout did not complete cleanly");
    }

    result
}

fn find_latest<S: Read + Write>(
    session: &mut ImapSession<S>,
    query: &MailboxQuery,
    filter: &MailFilter,
) -> Result<Option<RawEmail>, MailboxError> {
    session.read_greeting()?;
    session.login(&query.address, query.credential.expose_secret())?;
    session.select("INBOX")?;

    let matches = session.search(filter)?;
    // Sequence numbers grow with arrival order.
    let Some(latest) = matches.iter().copied().max() else {
        return Ok(None);
    };

    tracing::debug!(matches = matches.len(), seq = latest, "Fetching newest matching message");
    session.fetch_rfc822(latest).map(Some)
}

// ── Session ─────────────────────────────────────────────────────────

/// One server response line, with any `{n}` literals read in full.
#[derive(Debug)]
struct ResponseLine {
    text: String,
    literals: Vec<Vec<u8>>,
}

/// Minimal tagged-command IMAP session over any byte stream.
struct ImapSession<S> {
    stream: BufReader<S>,
    next_tag: u32,
}

impl<S: Read + Write> ImapSession<S> {
    fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            next_tag: 1,
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> S {
        self.stream.into_inner()
    }

    fn read_greeting(&mut self) -> Result<(), MailboxError> {
        let greeting = self.read_response_line()?;
        if greeting.text.starts_with("* OK") || greeting.text.starts_with("* PREAUTH") {
            Ok(())
        } else {
            Err(MailboxError::Protocol(format!(
                "unexpected greeting: {}",
                greeting.text.trim_end()
            )))
        }
    }

    fn login(&mut self, address: &str, password: &str) -> Result<(), MailboxError> {
        let line = format!("LOGIN {} {}", quote(address), quote(password));
        match self.run("LOGIN", &line) {
            Ok(_) => Ok(()),
            Err(MailboxError::Command { reason, .. }) => Err(MailboxError::AuthFailed {
                address: address.to_string(),
                reason,
            }),
            Err(e) => Err(e),
        }
    }

    fn select(&mut self, mailbox: &str) -> Result<(), MailboxError> {
        self.run("SELECT", &format!("SELECT {}", quote(mailbox)))
            .map(drop)
    }

    fn search(&mut self, filter: &MailFilter) -> Result<Vec<u32>, MailboxError> {
        let line = format!(
            "SEARCH FROM {} SUBJECT {}",
            quote(filter.sender),
            quote(filter.subject)
        );
        let lines = self.run("SEARCH", &line)?;
        Ok(parse_search(&lines))
    }

    fn fetch_rfc822(&mut self, seq: u32) -> Result<RawEmail, MailboxError> {
        let lines = self.run("FETCH", &format!("FETCH {seq} RFC822"))?;
        lines
            .into_iter()
            .filter(|l| l.text.contains(" FETCH "))
            .flat_map(|l| l.literals)
            .next()
            .map(RawEmail::new)
            .ok_or_else(|| MailboxError::Protocol(format!("FETCH {seq} returned no message body")))
    }

    fn logout(&mut self) -> Result<(), MailboxError> {
        self.run("LOGOUT", "LOGOUT").map(drop)
    }

    /// Send one tagged command and collect untagged lines until its completion.
    fn run(&mut self, command: &str, line: &str) -> Result<Vec<ResponseLine>, MailboxError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let stream = self.stream.get_mut();
        stream.write_all(format!("{tag} {line}\r\n").as_bytes())?;
        stream.flush()?;
        tracing::trace!(%tag, command, "IMAP command sent");

        let mut untagged = Vec::new();
        loop {
            let response = self.read_response_line()?;
            let Some(status) = response
                .text
                .strip_prefix(tag.as_str())
                .and_then(|rest| rest.strip_prefix(' '))
            else {
                untagged.push(response);
                continue;
            };

            let status = status.trim_end();
            if status.starts_with("OK") {
                return Ok(untagged);
            }
            return Err(MailboxError::Command {
                command: command.to_string(),
                reason: status.to_string(),
            });
        }
    }

    fn read_response_line(&mut self) -> Result<ResponseLine, MailboxError> {
        let mut text = String::new();
        let mut literals = Vec::new();

        loop {
            let mut buf = Vec::new();
            self.stream.read_until(b'\n', &mut buf)?;
            if !buf.ends_with(b"\n") {
                return Err(MailboxError::Protocol("connection closed by server".into()));
            }

            let chunk = String::from_utf8_lossy(&buf);
            let size = literal_size(&chunk);
            text.push_str(&chunk);

            let Some(size) = size else {
                return Ok(ResponseLine { text, literals });
            };
            let mut literal = vec![0u8; size];
            self.stream.read_exact(&mut literal)?;
            literals.push(literal);
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Size of a `{n}` literal announced at the end of a response line.
fn literal_size(chunk: &str) -> Option<usize> {
    let line = chunk
        .strip_suffix("\r\n")
        .or_else(|| chunk.strip_suffix('\n'))?;
    let open = line.rfind('{')?;
    let inner = line[open + 1..].strip_suffix('}')?;
    inner.trim_end_matches('+').parse().ok()
}

/// Sequence numbers from every `* SEARCH` line.
fn parse_search(lines: &[ResponseLine]) -> Vec<u32> {
    lines
        .iter()
        .filter_map(|l| l.text.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().filter_map(|n| n.parse().ok()))
        .collect()
}

/// IMAP quoted string.
fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use secrecy::SecretString;

    use super::*;

    /// Replays canned server output and records what the client wrote.
    struct ScriptedStream {
        input: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn session(server_output: &[u8]) -> ImapSession<ScriptedStream> {
        ImapSession::new(ScriptedStream {
            input: Cursor::new(server_output.to_vec()),
            written: Vec::new(),
        })
    }

    fn query() -> MailboxQuery {
        MailboxQuery {
            server: "imap.test.com".into(),
            port: 993,
            address: "bot@test.com".into(),
            credential: SecretString::from("hunter2".to_string()),
        }
    }

    fn written(session: ImapSession<ScriptedStream>) -> String {
        String::from_utf8(session.into_inner().written).unwrap()
    }

    // ── Full exchange ───────────────────────────────────────────────

    #[test]
    fn no_match_returns_none_and_logs_out() {
        let mut s = session(
            b"* OK IMAP4rev1 ready\r\n\
              A1 OK LOGIN completed\r\n\
              * 2 EXISTS\r\n\
              A2 OK [READ-WRITE] SELECT completed\r\n\
              * SEARCH\r\n\
              A3 OK SEARCH completed\r\n\
              * BYE logging out\r\n\
              A4 OK LOGOUT completed\r\n",
        );

        let result = fetch_latest_in_session(&mut s, &query(), &MailFilter::NETFLIX_ACCESS_CODE);
        assert!(matches!(result, Ok(None)));

        let sent = written(s);
        assert!(sent.contains("A2 SELECT \"INBOX\"\r\n"));
        assert!(sent.ends_with("A4 LOGOUT\r\n"), "sent: {sent}");
    }

    #[test]
    fn fetches_highest_sequence_number() {
        let message = "From: info@account.netflix.com\r\nSubject: code\r\n\r\nA4 OK not a tag\r\n";
        let script = format!(
            "* OK ready\r\n\
             A1 OK LOGIN completed\r\n\
             A2 OK SELECT completed\r\n\
             * SEARCH 3 12 7\r\n\
             A3 OK SEARCH completed\r\n\
             * 12 FETCH (RFC822 {{{}}}\r\n{message})\r\n\
             A4 OK FETCH completed\r\n\
             * BYE\r\n\
             A5 OK LOGOUT completed\r\n",
            message.len()
        );
        let mut s = session(script.as_bytes());

        let raw = fetch_latest_in_session(&mut s, &query(), &MailFilter::NETFLIX_ACCESS_CODE)
            .unwrap()
            .unwrap();
        assert_eq!(raw.as_bytes(), message.as_bytes());

        let sent = written(s);
        assert!(sent.contains("A4 FETCH 12 RFC822\r\n"));
        assert!(sent.ends_with("A5 LOGOUT\r\n"));
    }

    #[test]
    fn search_sends_sender_and_subject_filters() {
        let mut s = session(
            b"* OK ready\r\nA1 OK\r\nA2 OK\r\n* SEARCH\r\nA3 OK\r\nA4 OK\r\n",
        );
        fetch_latest_in_session(&mut s, &query(), &MailFilter::NETFLIX_ACCESS_CODE).unwrap();

        let sent = written(s);
        assert!(sent.contains(
            "A3 SEARCH FROM \"info@account.netflix.com\" SUBJECT \"Your Netflix temporary access code\"\r\n"
        ));
    }

    #[test]
    fn rejected_login_is_auth_failure_and_still_logs_out() {
        let mut s = session(
            b"* OK ready\r\n\
              A1 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n\
              * BYE\r\n\
              A2 OK LOGOUT completed\r\n",
        );

        let result = fetch_latest_in_session(&mut s, &query(), &MailFilter::NETFLIX_ACCESS_CODE);
        match result {
            Err(MailboxError::AuthFailed { address, reason }) => {
                assert_eq!(address, "bot@test.com");
                assert!(reason.contains("Invalid credentials"));
            }
            other => panic!("expected AuthFailed, got {other:?}"),
        }

        assert!(written(s).ends_with("A2 LOGOUT\r\n"));
    }

    #[test]
    fn failed_select_is_command_error() {
        let mut s = session(
            b"* OK ready\r\nA1 OK\r\nA2 NO Mailbox does not exist\r\nA3 OK\r\n",
        );
        let result = fetch_latest_in_session(&mut s, &query(), &MailFilter::NETFLIX_ACCESS_CODE);
        assert!(matches!(result, Err(MailboxError::Command { ref command, .. }) if command == "SELECT"));
    }

    #[test]
    fn closed_connection_is_protocol_error() {
        let mut s = session(b"* OK ready\r\n");
        let result = fetch_latest_in_session(&mut s, &query(), &MailFilter::NETFLIX_ACCESS_CODE);
        assert!(matches!(result, Err(MailboxError::Protocol(_))));
    }

    #[test]
    fn bye_greeting_is_rejected() {
        let mut s = session(b"* BYE too many connections\r\n");
        let result = fetch_latest_in_session(&mut s, &query(), &MailFilter::NETFLIX_ACCESS_CODE);
        assert!(matches!(result, Err(MailboxError::Protocol(ref m)) if m.contains("too many")));
    }

    #[test]
    fn fetch_without_literal_is_protocol_error() {
        let mut s = session(b"* 5 FETCH (FLAGS (\\Seen))\r\nA1 OK FETCH completed\r\n");
        assert!(matches!(s.fetch_rfc822(5), Err(MailboxError::Protocol(_))));
    }

    #[test]
    fn login_quotes_credentials() {
        let mut s = session(b"A1 OK\r\n");
        s.login("bot@test.com", "pa\"ss\\word").unwrap();
        assert_eq!(
            written(s),
            "A1 LOGIN \"bot@test.com\" \"pa\\\"ss\\\\word\"\r\n"
        );
    }

    // ── Helpers ─────────────────────────────────────────────────────

    #[test]
    fn literal_size_parses_trailing_braces() {
        assert_eq!(literal_size("* 1 FETCH (RFC822 {342}\r\n"), Some(342));
        assert_eq!(literal_size("* 1 FETCH (RFC822 {12+}\r\n"), Some(12));
        assert_eq!(literal_size("* OK [ALERT] {not a size}\r\n"), None);
        assert_eq!(literal_size("A1 OK done\r\n"), None);
    }

    #[test]
    fn parse_search_collects_all_lines() {
        let lines = vec![
            ResponseLine { text: "* SEARCH 1 4\r\n".into(), literals: vec![] },
            ResponseLine { text: "* 9 EXISTS\r\n".into(), literals: vec![] },
            ResponseLine { text: "* SEARCH 10\r\n".into(), literals: vec![] },
        ];
        assert_eq!(parse_search(&lines), vec![1, 4, 10]);
    }

    #[test]
    fn quote_plain_value() {
        assert_eq!(quote("INBOX"), "\"INBOX\"");
    }
}
