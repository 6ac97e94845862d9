//! AMI protocol lexer
//!
//! Turns an arbitrarily fragmented byte stream into [`LexedItem`]s. A stanza
//! is emitted only once its terminating blank line has fully arrived;
//! anything after the last complete stanza stays buffered for the next
//! [`AmiLexer::feed`] call.

use crate::{
    buffer::{find_pattern, AmiBuffer},
    constants::{BANNER_PREFIX, FOLLOWS_SENTINEL, LINE_TERMINATOR, STANZA_TERMINATOR},
    error::AmiResult,
    event::AmiEvent,
    message::{AmiErrorResponse, AmiMessage, AmiPong, AmiResponse, Fields},
};

/// One unit of lexer output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexedItem {
    /// The `Asterisk Call Manager/<version>` greeting; carries the version.
    Banner(String),
    /// A classified stanza.
    Message(AmiMessage),
    /// A complete stanza whose first line matched no known kind. It has been
    /// consumed; the raw text is handed back for reporting.
    Ignored(String),
}

/// How a stanza's first line classifies it.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StanzaKind {
    Error,
    Success,
    Pong,
    Follows,
    Goodbye,
    Event(String),
}

/// Outcome of looking for the banner at the start of unconsumed data.
enum BannerScan {
    Found { version: String, len: usize },
    Incomplete,
    NotBanner,
}

/// If `line` is `<keyword>:<spaces><rest>` (keyword case-insensitive), return `rest`.
fn strip_keyword<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let head = line.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    line[keyword.len()..]
        .strip_prefix(':')
        .map(|rest| rest.trim_start_matches(' '))
}

/// Classification precedence: Error, Success, Pong, Follows, Goodbye, then Event.
fn classify(first_line: &str) -> Option<StanzaKind> {
    if let Some(value) = strip_keyword(first_line, "Response") {
        let value = value.trim_end();
        return [
            ("Error", StanzaKind::Error),
            ("Success", StanzaKind::Success),
            ("Pong", StanzaKind::Pong),
            ("Follows", StanzaKind::Follows),
            ("Goodbye", StanzaKind::Goodbye),
        ]
        .into_iter()
        .find(|(wire, _)| value.eq_ignore_ascii_case(wire))
        .map(|(_, kind)| kind);
    }
    strip_keyword(first_line, "Event").map(|name| StanzaKind::Event(name.trim_end().to_string()))
}

/// Split `Key: value` into its parts. The key runs up to the first colon and
/// must be non-empty printable text; spaces after the colon are skipped.
fn parse_key_value(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    let key = &line[..colon];
    if key.is_empty()
        || key
            .chars()
            .any(|c| c.is_control())
    {
        return None;
    }
    Some((key, line[colon + 1..].trim_start_matches(' ')))
}

/// Stricter header test used inside a follows body, where free text may
/// contain colons: the key must be a single token without whitespace.
fn parse_follows_header(line: &str) -> Option<(&str, &str)> {
    let (key, value) = parse_key_value(line)?;
    if key
        .chars()
        .any(|c| c.is_whitespace())
    {
        return None;
    }
    Some((key, value))
}

fn parse_fields(section: &str, fields: &mut Fields) {
    for line in section.split(LINE_TERMINATOR) {
        if let Some((key, value)) = parse_key_value(line) {
            fields.insert(key.to_string(), value.to_string());
        }
    }
}

/// Split the region between the classification line and the sentinel into
/// leading header lines and the free-text body.
fn parse_follows_body(section: &str, fields: &mut Fields) -> String {
    let mut rest = section;
    while let Some(end) = rest.find(LINE_TERMINATOR) {
        match parse_follows_header(&rest[..end]) {
            Some((key, value)) => {
                fields.insert(key.to_string(), value.to_string());
                rest = &rest[end + LINE_TERMINATOR.len()..];
            }
            None => break,
        }
    }
    // The sentinel is preceded by `\r?\n`, which belongs to the delimiter.
    let body = rest
        .strip_suffix('\n')
        .unwrap_or(rest);
    body.strip_suffix('\r')
        .unwrap_or(body)
        .to_string()
}

fn scan_banner(data: &[u8], pos: usize) -> BannerScan {
    let rest = &data[pos..];
    let prefix = BANNER_PREFIX.as_bytes();
    if rest.is_empty() {
        return BannerScan::NotBanner;
    }
    if rest.len() < prefix.len() {
        return if prefix.starts_with(rest) {
            BannerScan::Incomplete
        } else {
            BannerScan::NotBanner
        };
    }
    if !rest.starts_with(prefix) {
        return BannerScan::NotBanner;
    }
    match find_pattern(rest, b"\n", 0) {
        Some(nl) => {
            let line = String::from_utf8_lossy(&rest[prefix.len()..nl]);
            BannerScan::Found {
                version: line
                    .trim()
                    .to_string(),
                len: nl + 1,
            }
        }
        None => BannerScan::Incomplete,
    }
}

/// How far the searches for an incomplete stanza at the start of the
/// buffer already got, as offsets from that stanza's first byte. Each
/// offset is where the next search for its pattern may resume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ScanResume {
    terminator_from: usize,
    sentinel_from: usize,
    tail_from: usize,
}

/// Offset, relative to `start`, from which a search for a `pattern_len`
/// pattern can resume once more bytes are appended to `data`.
fn resume_offset(data: &[u8], start: usize, pattern_len: usize) -> usize {
    (data.len() - start).saturating_sub(pattern_len - 1)
}

/// Incremental AMI decoder.
///
/// ```
/// use asterisk_ami_tokio::{AmiLexer, AmiMessage, LexedItem};
///
/// let mut lexer = AmiLexer::new();
/// assert!(lexer.feed(b"Asterisk Call Manager/2.8.0\r\nEvent: Hang").unwrap().len() == 1);
/// assert_eq!(lexer.version(), Some("2.8.0"));
///
/// let items = lexer.feed(b"up\r\nCause: 16\r\n\r\n").unwrap();
/// match &items[0] {
///     LexedItem::Message(AmiMessage::Event(e)) => assert_eq!(e.field("Cause"), Some("16")),
///     other => panic!("unexpected {:?}", other),
/// }
/// ```
#[derive(Debug)]
pub struct AmiLexer {
    buffer: AmiBuffer,
    version: Option<String>,
    resume: ScanResume,
}

impl AmiLexer {
    /// Create an empty lexer.
    pub fn new() -> Self {
        Self {
            buffer: AmiBuffer::new(),
            version: None,
            resume: ScanResume::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_max_buffer(max_size: usize) -> Self {
        Self {
            buffer: AmiBuffer::with_max_size(max_size),
            version: None,
            resume: ScanResume::default(),
        }
    }

    /// Append `data` and return every item completed by it, in wire order.
    ///
    /// Fails only when the unconsumed remainder exceeds the buffer limit.
    pub fn feed(&mut self, data: &[u8]) -> AmiResult<Vec<LexedItem>> {
        self.buffer
            .extend_from_slice(data);
        let items = self.drain();
        self.buffer
            .check_size_limits()?;
        Ok(items)
    }

    /// Version from the banner, once it has been seen.
    pub fn version(&self) -> Option<&str> {
        self.version
            .as_deref()
    }

    /// Bytes of the incomplete trailing stanza, not yet decoded.
    pub fn pending_bytes(&self) -> &[u8] {
        self.buffer
            .as_slice()
    }

    fn drain(&mut self) -> Vec<LexedItem> {
        let mut items = Vec::new();
        let data = self
            .buffer
            .as_slice();
        let terminator = STANZA_TERMINATOR.as_bytes();
        let sentinel_pattern = FOLLOWS_SENTINEL.as_bytes();
        let mut pos = 0;
        let mut next_resume = ScanResume::default();

        loop {
            // Earlier progress only applies to the stanza left at the front
            // of the buffer by the previous call.
            let resume = if pos == 0 {
                self.resume
            } else {
                ScanResume::default()
            };

            if self
                .version
                .is_none()
            {
                match scan_banner(data, pos) {
                    BannerScan::Found { version, len } => {
                        self.version = Some(version.clone());
                        items.push(LexedItem::Banner(version));
                        pos += len;
                        continue;
                    }
                    BannerScan::Incomplete => break,
                    BannerScan::NotBanner => {}
                }
            }

            let Some(end) = find_pattern(data, terminator, pos + resume.terminator_from) else {
                next_resume.terminator_from = resume_offset(data, pos, terminator.len());
                break;
            };
            if end == pos {
                // Stray blank line between stanzas
                pos += terminator.len();
                continue;
            }

            // The stanza terminator begins with a line terminator, so the
            // first line always ends at or before `end`.
            let first_line_end =
                find_pattern(data, LINE_TERMINATOR.as_bytes(), pos).unwrap_or(end);
            let first_line = String::from_utf8_lossy(&data[pos..first_line_end]);
            let after_first_line = first_line_end + LINE_TERMINATOR.len();

            let kind = match classify(&first_line) {
                Some(kind) => kind,
                None => {
                    items.push(LexedItem::Ignored(
                        String::from_utf8_lossy(&data[pos..end]).into_owned(),
                    ));
                    pos = end + terminator.len();
                    continue;
                }
            };

            if kind == StanzaKind::Follows {
                // The body may open with a blank line, so it starts right
                // after the classification line regardless of `end`.
                let body_start = after_first_line;
                let Some(sentinel) = find_pattern(
                    data,
                    sentinel_pattern,
                    body_start.max(pos + resume.sentinel_from),
                ) else {
                    next_resume = ScanResume {
                        terminator_from: end - pos,
                        sentinel_from: resume_offset(data, pos, sentinel_pattern.len()),
                        tail_from: 0,
                    };
                    break;
                };
                let after_sentinel = sentinel + sentinel_pattern.len();
                let Some(stanza_end) = find_pattern(
                    data,
                    terminator,
                    after_sentinel.max(pos + resume.tail_from),
                ) else {
                    next_resume = ScanResume {
                        terminator_from: end - pos,
                        sentinel_from: sentinel - pos,
                        tail_from: resume_offset(data, pos, terminator.len()),
                    };
                    break;
                };

                let mut fields = Fields::new();
                let body = parse_follows_body(
                    &String::from_utf8_lossy(&data[body_start..sentinel]),
                    &mut fields,
                );
                parse_fields(
                    &String::from_utf8_lossy(&data[after_sentinel..stanza_end]),
                    &mut fields,
                );
                items.push(LexedItem::Message(AmiMessage::Response(
                    AmiResponse::new(fields).with_text_body(body),
                )));
                pos = stanza_end + terminator.len();
                continue;
            }

            let mut fields = Fields::new();
            let body_start = after_first_line.min(end);
            parse_fields(&String::from_utf8_lossy(&data[body_start..end]), &mut fields);
            let message = match kind {
                StanzaKind::Error => AmiMessage::Error(AmiErrorResponse::new(fields)),
                StanzaKind::Pong => AmiMessage::Pong(AmiPong::new(fields)),
                StanzaKind::Event(name) => AmiMessage::Event(AmiEvent::from_fields(name, fields)),
                StanzaKind::Success | StanzaKind::Goodbye | StanzaKind::Follows => {
                    AmiMessage::Response(AmiResponse::new(fields))
                }
            };
            items.push(LexedItem::Message(message));
            pos = end + terminator.len();
        }

        self.resume = next_resume;
        self.buffer
            .consume(pos);
        items
    }
}

impl Default for AmiLexer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(items: Vec<LexedItem>) -> Vec<AmiMessage> {
        items
            .into_iter()
            .filter_map(|item| match item {
                LexedItem::Message(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    const HANGUP: &[u8] =
        b"Event: Hangup\r\nChannel: SIP/101-3f3f\r\nUniqueid: 1094154427.10\r\nCause: 0\r\n\r\n";

    #[test]
    fn test_parse_event() {
        let mut lexer = AmiLexer::new();
        let msgs = messages(
            lexer
                .feed(HANGUP)
                .unwrap(),
        );
        assert_eq!(
            msgs,
            vec![AmiMessage::Event(AmiEvent::from_fields(
                "Hangup",
                fields(&[
                    ("Channel", "SIP/101-3f3f"),
                    ("Uniqueid", "1094154427.10"),
                    ("Cause", "0"),
                ]),
            ))]
        );
        assert!(lexer
            .pending_bytes()
            .is_empty());
    }

    #[test]
    fn test_banner_sets_version() {
        let mut lexer = AmiLexer::new();
        let items = lexer
            .feed(b"Asterisk Call Manager/2.8.0\r\n")
            .unwrap();
        assert_eq!(items, vec![LexedItem::Banner("2.8.0".into())]);
        assert_eq!(lexer.version(), Some("2.8.0"));
    }

    #[test]
    fn test_banner_split_across_feeds() {
        let mut lexer = AmiLexer::new();
        assert!(lexer
            .feed(b"Aster")
            .unwrap()
            .is_empty());
        assert!(lexer
            .feed(b"isk Call Manager/1.")
            .unwrap()
            .is_empty());
        let items = lexer
            .feed(b"3\r\nResponse: Success\r\nMessage: ok\r\n\r\n")
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], LexedItem::Banner("1.3".into()));
        assert_eq!(lexer.version(), Some("1.3"));
    }

    #[test]
    fn test_banner_only_recognised_once() {
        let mut lexer = AmiLexer::new();
        lexer
            .feed(b"Asterisk Call Manager/2.8.0\r\n")
            .unwrap();
        let items = lexer
            .feed(b"Asterisk Call Manager/9.9\r\n\r\n")
            .unwrap();
        assert!(matches!(items.as_slice(), [LexedItem::Ignored(_)]));
        assert_eq!(lexer.version(), Some("2.8.0"));
    }

    #[test]
    fn test_classification() {
        let mut lexer = AmiLexer::new();
        let msgs = messages(
            lexer
                .feed(
                    b"Response: Success\r\nActionID: 1\r\n\r\n\
Response: Error\r\nActionID: 2\r\nMessage: Action failed\r\n\r\n\
Response: Pong\r\nActionID: 3\r\n\r\n\
Response: Goodbye\r\nActionID: 4\r\nMessage: Thanks for all the fish.\r\n\r\n\
Event: FullyBooted\r\nStatus: Fully Booted\r\n\r\n",
                )
                .unwrap(),
        );
        assert_eq!(msgs.len(), 5);
        assert!(matches!(&msgs[0], AmiMessage::Response(r) if r.action_id() == Some("1")));
        assert!(matches!(&msgs[1], AmiMessage::Error(e) if e.message() == Some("Action failed")));
        assert!(matches!(&msgs[2], AmiMessage::Pong(p) if p.action_id() == Some("3")));
        assert!(
            matches!(&msgs[3], AmiMessage::Response(r) if r.message() == Some("Thanks for all the fish."))
        );
        assert!(matches!(&msgs[4], AmiMessage::Event(e) if e.name() == "FullyBooted"));
    }

    #[test]
    fn test_classification_case_insensitive_keyword() {
        let mut lexer = AmiLexer::new();
        let msgs = messages(
            lexer
                .feed(b"response:success\r\nActionID: 1\r\n\r\nEVENT:   Newchannel\r\n\r\n")
                .unwrap(),
        );
        assert!(matches!(&msgs[0], AmiMessage::Response(_)));
        assert!(matches!(&msgs[1], AmiMessage::Event(e) if e.name() == "Newchannel"));
    }

    #[test]
    fn test_classification_line_not_a_field() {
        let mut lexer = AmiLexer::new();
        let msgs = messages(
            lexer
                .feed(b"Response: Success\r\nMessage: ok\r\n\r\n")
                .unwrap(),
        );
        let AmiMessage::Response(resp) = &msgs[0] else {
            panic!("expected response");
        };
        assert_eq!(resp.field("Response"), None);
        assert_eq!(
            resp.fields()
                .len(),
            1
        );
    }

    #[test]
    fn test_duplicate_keys_last_write_wins() {
        let mut lexer = AmiLexer::new();
        let msgs = messages(
            lexer
                .feed(b"Event: VarSet\r\nValue: a\r\nValue: b\r\n\r\n")
                .unwrap(),
        );
        let AmiMessage::Event(event) = &msgs[0] else {
            panic!("expected event");
        };
        assert_eq!(event.field("Value"), Some("b"));
    }

    #[test]
    fn test_value_keeps_inner_colons_and_empty_values() {
        let mut lexer = AmiLexer::new();
        let msgs = messages(
            lexer
                .feed(b"Event: Newexten\r\nAppData: agi:async\r\nExtension:\r\n\r\n")
                .unwrap(),
        );
        let AmiMessage::Event(event) = &msgs[0] else {
            panic!("expected event");
        };
        assert_eq!(event.field("AppData"), Some("agi:async"));
        assert_eq!(event.field("Extension"), Some(""));
    }

    #[test]
    fn test_follows_framing() {
        let mut lexer = AmiLexer::new();
        let msgs = messages(
            lexer
                .feed(
                    b"Response: Follows\r\nPrivilege: Command\r\nActionID: X\r\nline one\nline two\r\n--END COMMAND--\r\n\r\n",
                )
                .unwrap(),
        );
        let expected = AmiResponse::new(fields(&[("Privilege", "Command"), ("ActionID", "X")]))
            .with_text_body("line one\nline two");
        assert_eq!(msgs, vec![AmiMessage::Response(expected)]);
        assert!(lexer
            .pending_bytes()
            .is_empty());
    }

    #[test]
    fn test_follows_body_with_colon_and_trailing_headers() {
        let mut lexer = AmiLexer::new();
        let msgs = messages(
            lexer
                .feed(
                    b"Response: Follows\r\nPrivilege: Command\r\nExtension '1,1,AGI(agi:async)' added into 'adhearsion-redirect' context\n--END COMMAND--\r\nActionID: late\r\n\r\n",
                )
                .unwrap(),
        );
        let AmiMessage::Response(resp) = &msgs[0] else {
            panic!("expected response");
        };
        assert_eq!(
            resp.text_body(),
            Some("Extension '1,1,AGI(agi:async)' added into 'adhearsion-redirect' context")
        );
        assert_eq!(resp.action_id(), Some("late"));
        assert_eq!(resp.field("Privilege"), Some("Command"));
    }

    #[test]
    fn test_follows_body_may_contain_blank_lines() {
        let mut lexer = AmiLexer::new();
        let first = lexer
            .feed(b"Response: Follows\r\nActionID: B\r\npart one\r\n\r\npart two")
            .unwrap();
        assert!(first.is_empty(), "must wait for the sentinel");
        let msgs = messages(
            lexer
                .feed(b"\n--END COMMAND--\r\n\r\nEvent: Next\r\n\r\n")
                .unwrap(),
        );
        assert_eq!(msgs.len(), 2);
        let AmiMessage::Response(resp) = &msgs[0] else {
            panic!("expected response");
        };
        assert_eq!(resp.text_body(), Some("part one\r\n\r\npart two"));
        assert_eq!(resp.action_id(), Some("B"));
    }

    #[test]
    fn test_follows_empty_body() {
        let mut lexer = AmiLexer::new();
        let msgs = messages(
            lexer
                .feed(b"Response: Follows\r\nActionID: E\r\n--END COMMAND--\r\n\r\n")
                .unwrap(),
        );
        let AmiMessage::Response(resp) = &msgs[0] else {
            panic!("expected response");
        };
        assert_eq!(resp.text_body(), Some(""));
        assert_eq!(resp.action_id(), Some("E"));
    }

    #[test]
    fn test_follows_body_starting_with_blank_line() {
        let mut lexer = AmiLexer::new();
        let msgs = messages(
            lexer
                .feed(b"Response: Follows\r\n\r\nbody\r\n--END COMMAND--\r\nActionID: Z\r\n\r\n")
                .unwrap(),
        );
        assert_eq!(msgs.len(), 1);
        let AmiMessage::Response(resp) = &msgs[0] else {
            panic!("expected response");
        };
        assert_eq!(resp.text_body(), Some("\r\nbody"));
        assert_eq!(resp.action_id(), Some("Z"));
        assert!(lexer
            .pending_bytes()
            .is_empty());
    }

    #[test]
    fn test_long_follows_body_resumes_scanning() {
        let mut lexer = AmiLexer::new();
        // The blank line completes a stanza, so the sentinel search starts
        assert!(lexer
            .feed(b"Response: Follows\r\nActionID: L\r\n\r\n")
            .unwrap()
            .is_empty());
        assert!(lexer
            .resume
            .sentinel_from
            > 0);

        let line = b"0123456789abcdef\r\n";
        let mut last_sentinel_from = lexer
            .resume
            .sentinel_from;
        for _ in 0..64 {
            assert!(lexer
                .feed(line)
                .unwrap()
                .is_empty());
            let sentinel_from = lexer
                .resume
                .sentinel_from;
            assert!(sentinel_from > last_sentinel_from);
            assert_eq!(
                sentinel_from,
                lexer
                    .pending_bytes()
                    .len()
                    - (FOLLOWS_SENTINEL.len() - 1)
            );
            last_sentinel_from = sentinel_from;
        }

        // Sentinel split across feeds, then the closing blank line in two parts
        assert!(lexer
            .feed(b"--END COMM")
            .unwrap()
            .is_empty());
        assert!(lexer
            .feed(b"AND--\r\n")
            .unwrap()
            .is_empty());
        assert!(lexer
            .resume
            .tail_from
            > 0);
        let msgs = messages(
            lexer
                .feed(b"\r\n")
                .unwrap(),
        );
        assert_eq!(msgs.len(), 1);
        let AmiMessage::Response(resp) = &msgs[0] else {
            panic!("expected response");
        };
        let body = resp
            .text_body()
            .unwrap();
        assert!(body.starts_with("\r\n0123456789abcdef\r\n"));
        assert!(body.ends_with("0123456789abcdef"));
        assert_eq!(
            body.lines()
                .count(),
            65
        );
        assert_eq!(resp.action_id(), Some("L"));
        assert_eq!(lexer.resume, ScanResume::default());
        assert!(lexer
            .pending_bytes()
            .is_empty());
    }

    #[test]
    fn test_fragmented_input_matches_whole_input() {
        let mut stream = Vec::new();
        stream.extend_from_slice(b"Asterisk Call Manager/2.8.0\r\n");
        stream.extend_from_slice(HANGUP);
        stream.extend_from_slice(
            b"Response: Follows\r\nPrivilege: Command\r\nActionID: X\r\nline one\nline two\r\n--END COMMAND--\r\n\r\n",
        );
        stream.extend_from_slice(b"Response: Error\r\nActionID: 2\r\nMessage: nope\r\n\r\n");

        let mut whole = AmiLexer::new();
        let expected = whole
            .feed(&stream)
            .unwrap();
        assert_eq!(expected.len(), 4);

        for chunk_size in [1, 2, 3, 5, 7, 13, 64] {
            let mut lexer = AmiLexer::new();
            let mut got = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                got.extend(
                    lexer
                        .feed(chunk)
                        .unwrap(),
                );
            }
            assert_eq!(got, expected, "chunk size {}", chunk_size);
            assert!(lexer
                .pending_bytes()
                .is_empty());
        }
    }

    #[test]
    fn test_residual_is_incomplete_trailing_stanza() {
        let mut lexer = AmiLexer::new();
        let mut data = HANGUP.to_vec();
        data.extend_from_slice(b"Event: Newchannel\r\nChannel: SIP/1");
        let msgs = messages(
            lexer
                .feed(&data)
                .unwrap(),
        );
        assert_eq!(msgs.len(), 1);
        assert_eq!(lexer.pending_bytes(), b"Event: Newchannel\r\nChannel: SIP/1");

        assert!(lexer
            .feed(b"")
            .unwrap()
            .is_empty());
        assert_eq!(lexer.pending_bytes(), b"Event: Newchannel\r\nChannel: SIP/1");

        // A single CRLF is not a stanza break
        assert!(lexer
            .feed(b"\r\n")
            .unwrap()
            .is_empty());
        let msgs = messages(
            lexer
                .feed(b"\r\n")
                .unwrap(),
        );
        assert!(matches!(&msgs[0], AmiMessage::Event(e) if e.field("Channel") == Some("SIP/1")));
    }

    #[test]
    fn test_unclassified_stanza_is_consumed_and_reported() {
        let mut lexer = AmiLexer::new();
        let mut data = b"Garbage: here\r\nMore: stuff\r\n\r\n".to_vec();
        data.extend_from_slice(HANGUP);
        data.extend_from_slice(b"Response: Maybe\r\n\r\n");
        let items = lexer
            .feed(&data)
            .unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(
            items[0],
            LexedItem::Ignored("Garbage: here\r\nMore: stuff".into())
        );
        assert!(matches!(&items[1], LexedItem::Message(AmiMessage::Event(_))));
        assert_eq!(items[2], LexedItem::Ignored("Response: Maybe".into()));
        assert!(lexer
            .pending_bytes()
            .is_empty());
    }

    #[test]
    fn test_stray_blank_lines_skipped() {
        let mut lexer = AmiLexer::new();
        let mut data = b"\r\n\r\n".to_vec();
        data.extend_from_slice(HANGUP);
        let items = lexer
            .feed(&data)
            .unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_wire_order_preserved() {
        let mut lexer = AmiLexer::new();
        let msgs = messages(
            lexer
                .feed(b"Event: A\r\n\r\nEvent: B\r\n\r\nEvent: C\r\n\r\n")
                .unwrap(),
        );
        let names: Vec<&str> = msgs
            .iter()
            .map(|m| match m {
                AmiMessage::Event(e) => e.name(),
                _ => "",
            })
            .collect();
        assert_eq!(names, ["A", "B", "C"]);
    }

    #[test]
    fn test_oversized_buffer_rejected() {
        let mut lexer = AmiLexer::with_max_buffer(32);
        assert!(lexer
            .feed(b"Response: Follows\r\nActionID: 12\r\n")
            .is_err());
    }

    #[test]
    fn test_complete_stanzas_do_not_count_against_limit() {
        let mut lexer = AmiLexer::with_max_buffer(32);
        let items = lexer
            .feed(b"Event: Hangup\r\nChannel: SIP/101-3f3f\r\nCause: 0\r\n\r\n")
            .unwrap();
        assert_eq!(items.len(), 1);
    }
}
