//! # Test Utilities
//!
//! Fixtures, a reply builder and a scripted mock daemon for testing code
//! that talks to Tor through this crate.
//!
//! Enable this module with the `test-utils` feature:
//!
//! ```toml
//! [dev-dependencies]
//! torctl = { version = "0.1", features = ["test-utils"] }
//! ```
//!
//! ## Mock daemon
//!
//! [`mock_controller`] returns a [`Controller`] wired to an in-memory
//! [`MockDaemon`]. Drive both sides from the same task with `tokio::join!`:
//!
//! ```rust,ignore
//! use torctl::test_utils::{fixtures, mock_controller};
//!
//! #[tokio::test]
//! async fn reads_version() {
//!     let (controller, mut daemon) = mock_controller();
//!     let (version, _) = tokio::join!(
//!         controller.get_version(),
//!         daemon.respond("GETINFO version", fixtures::version_response()),
//!     );
//!     assert_eq!(version.unwrap().major, 0);
//! }
//! ```

use crate::config::TorControlConfig;
use crate::controller::Controller;
use crate::types::{CircuitId, Fingerprint, StreamId};

use std::io;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

/// Pre-built fixtures for common Tor entities.
pub mod fixtures {
    use super::*;

    /// Sample circuit ID for testing.
    pub const SAMPLE_CIRCUIT_ID: CircuitId = CircuitId(12345);

    /// Sample stream ID for testing.
    pub const SAMPLE_STREAM_ID: StreamId = StreamId(67890);

    /// Identity fingerprint of the moria1 directory authority.
    pub fn sample_fingerprint() -> Fingerprint {
        Fingerprint::new("9695DFC35FFEB861329B9F1AB04C46397020CE31")
    }

    /// Sample PROTOCOLINFO response.
    pub fn protocolinfo_response() -> &'static str {
        "250-PROTOCOLINFO 1\r\n\
         250-AUTH METHODS=NULL,HASHEDPASSWORD,COOKIE,SAFECOOKIE COOKIEFILE=\"/var/run/tor/control.authcookie\"\r\n\
         250-VERSION Tor=\"0.4.8.12\"\r\n\
         250 OK\r\n"
    }

    /// Sample AUTHENTICATE OK response.
    pub fn auth_ok_response() -> &'static str {
        "250 OK\r\n"
    }

    /// Sample GETINFO version response.
    pub fn version_response() -> &'static str {
        "250-version=0.4.8.12 (git-abc123)\r\n\
         250 OK\r\n"
    }

    /// Sample GETCONF SocksPort response.
    pub fn socksport_response() -> &'static str {
        "250 SocksPort=9050\r\n"
    }

    /// Sample GETINFO circuit-status response with two circuits.
    pub fn circuit_status_response() -> &'static str {
        "250+circuit-status=\r\n\
         7 BUILT $9695DFC35FFEB861329B9F1AB04C46397020CE31~moria1,$847B1F850344D7876491A54892F904934E4EB85D~tor26 BUILD_FLAGS=NEED_CAPACITY PURPOSE=GENERAL TIME_CREATED=2024-01-01T12:00:00.000000\r\n\
         8 LAUNCHED BUILD_FLAGS=ONEHOP_TUNNEL PURPOSE=GENERAL\r\n\
         .\r\n\
         250 OK\r\n"
    }

    /// Sample `ns/name/moria1` response.
    pub fn network_status_response() -> &'static str {
        "250+ns/name/moria1=\r\n\
         r moria1 lpXfw1/+uGEym58asExGOXAgzjE 6ogpXh9QZM1CIu4TOWebTmn96Lg 2024-01-01 12:00:00 128.31.0.34 9101 9131\r\n\
         s Authority Fast Running Stable V2Dir Valid\r\n\
         w Bandwidth=20\r\n\
         .\r\n\
         250 OK\r\n"
    }

    /// Sample CIRC event (circuit built).
    pub fn circuit_built_event() -> &'static str {
        "650 CIRC 12345 BUILT $9695DFC35FFEB861329B9F1AB04C46397020CE31~moria1 PURPOSE=GENERAL\r\n"
    }

    /// Sample CIRC event (circuit closed).
    pub fn circuit_closed_event() -> &'static str {
        "650 CIRC 12345 CLOSED REASON=FINISHED\r\n"
    }

    /// Sample STREAM event.
    pub fn stream_event() -> &'static str {
        "650 STREAM 67890 NEW 0 www.example.com:443 SOURCE_ADDR=127.0.0.1:54321 PURPOSE=USER\r\n"
    }

    /// Sample BW event (bandwidth stats).
    pub fn bandwidth_event() -> &'static str {
        "650 BW 1024 2048\r\n"
    }

    /// Sample error response.
    pub fn error_response() -> &'static str {
        "552 Unrecognized key \"unknown-key\"\r\n"
    }
}

/// Tor control protocol response builder.
#[derive(Debug, Clone)]
pub struct MockTorResponse {
    code: u16,
    lines: Vec<String>,
}

impl MockTorResponse {
    /// Create a new empty 250 response builder.
    pub fn new() -> Self {
        Self {
            code: 250,
            lines: Vec::new(),
        }
    }

    /// Create a simple OK response.
    pub fn ok() -> Self {
        Self::new().finish()
    }

    /// Create an error response.
    pub fn error(code: u16, message: &str) -> Self {
        Self {
            code,
            lines: vec![format!("{} {}", code, message)],
        }
    }

    /// Create an event with the given keyword and payload.
    pub fn event(keyword: &str, payload: &str) -> Self {
        Self {
            code: 650,
            lines: vec![format!("650 {} {}", keyword, payload)],
        }
    }

    /// Add a mid-reply line.
    pub fn data_line(mut self, line: &str) -> Self {
        self.lines.push(format!("{}-{}", self.code, line));
        self
    }

    /// Add a data block opened by `header`, dot-stuffing the payload.
    pub fn data_block(mut self, header: &str, payload: &str) -> Self {
        self.lines.push(format!("{}+{}", self.code, header));
        for line in payload.lines() {
            if line.starts_with('.') {
                self.lines.push(format!(".{}", line));
            } else {
                self.lines.push(line.to_string());
            }
        }
        self.lines.push(".".to_string());
        self
    }

    /// Add the final OK line.
    pub fn finish(mut self) -> Self {
        self.lines.push(format!("{} OK", self.code));
        self
    }

    /// Build the response as a string.
    pub fn build(&self) -> String {
        self.lines.iter().map(|l| format!("{}\r\n", l)).collect()
    }

    /// Build the response as bytes.
    pub fn as_bytes(&self) -> Vec<u8> {
        self.build().into_bytes()
    }
}

impl Default for MockTorResponse {
    fn default() -> Self {
        Self::new()
    }
}

/// The daemon side of an in-memory control connection.
pub struct MockDaemon {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl MockDaemon {
    /// Wrap the daemon end of a duplex pipe.
    pub fn new(stream: DuplexStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    /// Read the next command, without its terminator. A `+` data command is
    /// returned whole, its lines joined with `\n`. `None` once the client
    /// has gone away.
    pub async fn read_command(&mut self) -> io::Result<Option<String>> {
        let Some(first) = self.read_line().await? else {
            return Ok(None);
        };
        if !first.starts_with('+') {
            return Ok(Some(first));
        }

        let mut lines = vec![first];
        while let Some(line) = self.read_line().await? {
            let done = line == ".";
            lines.push(line);
            if done {
                break;
            }
        }
        Ok(Some(lines.join("\n")))
    }

    async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    /// Read the next command and check it matches.
    ///
    /// # Panics
    ///
    /// When the command differs or the client disconnected.
    pub async fn expect(&mut self, command: &str) {
        let received = self.read_command().await.ok().flatten();
        assert_eq!(received.as_deref(), Some(command), "unexpected command");
    }

    /// Write raw CRLF-terminated reply text.
    pub async fn send(&mut self, raw: &str) -> io::Result<()> {
        self.writer.write_all(raw.as_bytes()).await?;
        self.writer.flush().await
    }

    /// Expect a command, then answer it.
    ///
    /// # Panics
    ///
    /// When the command differs or the reply cannot be written.
    pub async fn respond(&mut self, command: &str, reply: &str) {
        self.expect(command).await;
        if let Err(e) = self.send(reply).await {
            panic!("failed to send reply to {command}: {e}");
        }
    }
}

/// A controller connected to a [`MockDaemon`] with default settings.
pub fn mock_controller() -> (Controller, MockDaemon) {
    mock_controller_with(&TorControlConfig::default())
}

/// A controller connected to a [`MockDaemon`].
pub fn mock_controller_with(config: &TorControlConfig) -> (Controller, MockDaemon) {
    let (daemon, client) = tokio::io::duplex(64 * 1024);
    (Controller::from_stream(client, config), MockDaemon::new(daemon))
}
