//! Protocol message parsing and formatting.
//!
//! This module handles the low-level protocol details for communicating
//! with Tor's control port: grouping raw lines into replies, classifying
//! them as command replies or asynchronous events, and formatting outgoing
//! commands.

use crate::error::{Result, StatusCode, TorControlError};
use std::collections::HashMap;

/// Status code reserved for asynchronous event notifications.
pub const ASYNC_EVENT_CODE: u16 = 650;

/// Upper bound on a single received line, terminator included.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 256 * 1024;

/// A single reply line from Tor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    /// The 3-digit status code.
    pub code: u16,
    /// The separator character: '-' for mid-reply, '+' for data, ' ' for end.
    pub separator: char,
    /// The text content of the line.
    pub text: String,
    /// The data block that followed a '+' line, dot-unescaped and joined with '\n'.
    pub data: Option<String>,
}

impl ReplyLine {
    /// Parse a reply line from a string (without its line terminator).
    pub fn parse(line: &str) -> Result<Self> {
        let bytes = line.as_bytes();
        if bytes.len() < 4 {
            return Err(TorControlError::Protocol(format!(
                "Reply line too short: '{}'",
                line
            )));
        }

        if !bytes[..3].iter().all(u8::is_ascii_digit) {
            return Err(TorControlError::Protocol(format!(
                "Invalid status code in: '{}'",
                line
            )));
        }
        let code = u16::from(bytes[0] - b'0') * 100
            + u16::from(bytes[1] - b'0') * 10
            + u16::from(bytes[2] - b'0');

        let separator = char::from(bytes[3]);
        if !matches!(separator, ' ' | '-' | '+') {
            return Err(TorControlError::Protocol(format!(
                "Invalid separator '{}' in: '{}'",
                separator.escape_default(),
                line
            )));
        }

        Ok(ReplyLine {
            code,
            separator,
            text: line[4..].to_string(),
            data: None,
        })
    }

    /// Check if this is the final line of a reply.
    pub fn is_end(&self) -> bool {
        self.separator == ' '
    }

    /// Check if this is a data line (multi-line response).
    pub fn is_data(&self) -> bool {
        self.separator == '+'
    }

    /// Check if this is a mid-reply line.
    pub fn is_mid(&self) -> bool {
        self.separator == '-'
    }

    /// Get the status code as an enum.
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.code)
    }
}

/// Whether a completed reply answers a command or is a pushed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// Synchronous reply to the oldest outstanding command.
    Command,
    /// Asynchronous event notification (status 650).
    Event,
}

/// A complete reply from Tor, potentially spanning multiple lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// The status code for this reply.
    pub code: u16,
    /// All reply lines.
    pub lines: Vec<ReplyLine>,
}

impl Reply {
    /// Create a new Reply from a list of reply lines.
    pub fn new(lines: Vec<ReplyLine>) -> Result<Self> {
        let code = lines
            .first()
            .map(|l| l.code)
            .ok_or_else(|| TorControlError::Protocol("Empty reply".to_string()))?;

        Ok(Reply { code, lines })
    }

    /// Parse a complete reply from raw CRLF-terminated text.
    pub fn from_raw(raw: &str) -> Result<Self> {
        let mut parser = ReplyParser::new();
        let mut reply = None;
        for line in raw.split_terminator("\r\n") {
            if reply.is_some() {
                return Err(TorControlError::Protocol(format!(
                    "Trailing content after reply: '{}'",
                    line
                )));
            }
            reply = parser.push_line(line)?;
        }
        parser.finish()?;
        reply.ok_or_else(|| TorControlError::Protocol("Empty reply".to_string()))
    }

    /// Get the status code as an enum.
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.code)
    }

    /// Classify this reply.
    pub fn kind(&self) -> ReplyKind {
        if self.code == ASYNC_EVENT_CODE {
            ReplyKind::Event
        } else {
            ReplyKind::Command
        }
    }

    /// Check if this is an asynchronous event.
    pub fn is_async_event(&self) -> bool {
        self.kind() == ReplyKind::Event
    }

    /// Check if this reply indicates success.
    pub fn is_success(&self) -> bool {
        self.status_code().is_success()
    }

    /// Check for a single "250 OK" line.
    pub fn is_ok(&self) -> bool {
        self.lines.len() == 1 && self.code == 250 && self.lines[0].text == "OK"
    }

    /// Get all text lines concatenated.
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Get the first line's text.
    pub fn first_line(&self) -> &str {
        self.lines.first().map(|l| l.text.as_str()).unwrap_or("")
    }

    /// Get the text of a reply that must consist of exactly one line.
    pub fn single_line(&self) -> Result<&str> {
        match self.lines.as_slice() {
            [line] => Ok(line.text.as_str()),
            _ => Err(TorControlError::Parse(format!(
                "Expected a single line reply, got {} lines",
                self.lines.len()
            ))),
        }
    }

    /// The first data block in this reply, if any.
    pub fn data(&self) -> Option<&str> {
        self.lines.iter().find_map(|l| l.data.as_deref())
    }

    /// Every data block in this reply, verbatim, in order.
    pub fn data_blocks(&self) -> Vec<&str> {
        self.lines.iter().filter_map(|l| l.data.as_deref()).collect()
    }

    /// Convert this reply into a Result, returning an error if the reply indicates failure.
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }

        let message = self.text();
        match self.status_code() {
            StatusCode::AuthenticationRequired => {
                Err(TorControlError::AuthenticationRequired(message))
            }
            StatusCode::UnrecognizedEntity if message.contains("Unrecognized") => {
                let arguments = self
                    .lines
                    .iter()
                    .filter_map(|l| quoted_argument(&l.text))
                    .collect();
                Err(TorControlError::InvalidArguments { message, arguments })
            }
            _ => Err(TorControlError::CommandRejected {
                code: self.code,
                message,
            }),
        }
    }
}

/// Extract the trailing quoted token of an "Unrecognized key \"foo\"" line.
fn quoted_argument(text: &str) -> Option<String> {
    let end = text.rfind('"')?;
    let start = text[..end].rfind('"')?;
    Some(text[start + 1..end].to_string())
}

/// Accumulates raw lines into complete replies.
///
/// Lines inside a data block are payload until a line consisting of a single
/// `.`, however much they look like status lines.
#[derive(Debug, Default)]
pub struct ReplyParser {
    lines: Vec<ReplyLine>,
    data: Option<(ReplyLine, Vec<String>)>,
}

impl ReplyParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (without terminator). Returns a reply once it is complete.
    pub fn push_line(&mut self, line: &str) -> Result<Option<Reply>> {
        if let Some((header, mut payload)) = self.data.take() {
            if line == "." {
                let mut header = header;
                header.data = Some(payload.join("\n"));
                self.lines.push(header);
            } else {
                payload.push(unescape_data_line(line).to_string());
                self.data = Some((header, payload));
            }
            return Ok(None);
        }

        let reply_line = ReplyLine::parse(line)?;
        if reply_line.is_data() {
            self.data = Some((reply_line, Vec::new()));
            return Ok(None);
        }

        let is_end = reply_line.is_end();
        self.lines.push(reply_line);
        if is_end {
            let lines = std::mem::take(&mut self.lines);
            return Reply::new(lines).map(Some);
        }
        Ok(None)
    }

    /// Check the stream did not end inside a reply or data block.
    pub fn finish(&self) -> Result<()> {
        if self.data.is_some() {
            Err(TorControlError::Protocol(
                "Stream ended inside an unterminated data block".to_string(),
            ))
        } else if !self.lines.is_empty() {
            Err(TorControlError::Protocol(
                "Stream ended inside an incomplete reply".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

fn unescape_data_line(line: &str) -> &str {
    if line.starts_with("..") {
        &line[1..]
    } else {
        line
    }
}

/// Split a "key=value" entry. Returns `None` when there is no '='.
pub fn split_key_value(text: &str) -> Option<(&str, &str)> {
    let pos = text.find('=')?;
    Some((&text[..pos], &text[pos + 1..]))
}

/// Parse keyword=value pairs from a reply line.
pub fn parse_key_value_pairs(text: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        remaining = remaining.trim_start();
        if remaining.is_empty() {
            break;
        }

        let key_end = match remaining.find('=') {
            Some(pos) => pos,
            None => break,
        };

        // Skip positional words that precede the next key.
        if let Some(space) = remaining[..key_end].rfind(' ') {
            remaining = &remaining[space + 1..];
            continue;
        }

        let key = remaining[..key_end].to_string();
        remaining = &remaining[key_end + 1..];

        let (value, rest) = if remaining.starts_with('"') {
            parse_quoted_string(remaining)
        } else {
            let end = remaining.find(' ').unwrap_or(remaining.len());
            (remaining[..end].to_string(), &remaining[end..])
        };

        result.insert(key, value);
        remaining = rest;
    }

    result
}

/// Parse a quoted string, handling escape sequences.
fn parse_quoted_string(s: &str) -> (String, &str) {
    if !s.starts_with('"') {
        return (String::new(), s);
    }

    let mut result = String::new();
    let mut chars = s[1..].chars().peekable();
    let mut consumed = 1;

    while let Some(c) = chars.next() {
        consumed += c.len_utf8();
        if c == '"' {
            break;
        } else if c == '\\' {
            if let Some(&next) = chars.peek() {
                consumed += next.len_utf8();
                chars.next();
                match next {
                    'n' => result.push('\n'),
                    'r' => result.push('\r'),
                    't' => result.push('\t'),
                    _ => result.push(next),
                }
            }
        } else {
            result.push(c);
        }
    }

    (result, &s[consumed..])
}

/// Quote a string for use in a Tor control command.
pub fn quote_string(s: &str) -> String {
    if s.is_empty() {
        return "\"\"".to_string();
    }

    let needs_quoting = s
        .chars()
        .any(|c| c.is_whitespace() || c == '"' || c == '\\' || !(' '..='~').contains(&c));

    if !needs_quoting {
        return s.to_string();
    }

    let mut result = String::with_capacity(s.len() + 2);
    result.push('"');

    for c in s.chars() {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            _ => result.push(c),
        }
    }

    result.push('"');
    result
}

/// Format a command line with arguments. The terminator is added by the transport.
pub fn format_command(keyword: &str, args: &[&str]) -> String {
    let mut cmd = keyword.to_string();
    for arg in args {
        cmd.push(' ');
        cmd.push_str(arg);
    }
    cmd
}

/// Format a multi-line command with data.
pub fn format_command_with_data(keyword: &str, args: &[&str], data: &str) -> String {
    let mut cmd = String::from("+");
    cmd.push_str(&format_command(keyword, args));
    cmd.push_str("\r\n");

    for line in data.lines() {
        if line.starts_with('.') {
            cmd.push('.');
        }
        cmd.push_str(line);
        cmd.push_str("\r\n");
    }

    cmd.push('.');
    cmd
}

/// Frame a command for the wire.
///
/// Single-line commands get a CRLF terminator and must not contain CR or LF.
/// Multi-line commands must start with '+' and end with a "." line; their
/// line endings are normalised to CRLF.
pub fn format_message(command: &str) -> Result<String> {
    let command = command.trim_end_matches(['\r', '\n']);

    if !command.contains(['\r', '\n']) {
        return Ok(format!("{}\r\n", command));
    }

    if !command.starts_with('+') {
        return Err(TorControlError::InvalidArgument(format!(
            "Multi-line command must start with '+': '{}'",
            command.lines().next().unwrap_or_default()
        )));
    }

    let lines: Vec<&str> = command.lines().map(|l| l.trim_end_matches('\r')).collect();
    if lines.last() != Some(&".") {
        return Err(TorControlError::InvalidArgument(
            "Multi-line command must end with a '.' line".to_string(),
        ));
    }

    let mut framed = lines.join("\r\n");
    framed.push_str("\r\n");
    Ok(framed)
}
