//! Core types used throughout the Tor Control library.
//!
//! Identifiers, status enums and the immutable snapshots assembled from
//! replies: [`Circuit`], [`StreamInfo`], [`RelayDescriptor`] and
//! [`NetworkStatusEntry`]. Snapshots hold no reference back to the connection.

use crate::error::{Result, TorControlError};
use crate::protocol::parse_key_value_pairs;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Circuit number assigned by the daemon, unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CircuitId(pub u64);

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CircuitId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(CircuitId(s.parse()?))
    }
}

/// Stream number assigned by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StreamId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(StreamId(s.parse()?))
    }
}

/// 40 uppercase hex characters identifying a relay. Parsing accepts a leading `$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Create a new Fingerprint from a hex string without validating it.
    pub fn new(fingerprint: impl Into<String>) -> Self {
        let fp = fingerprint.into();
        let fp = fp.strip_prefix('$').unwrap_or(&fp);
        Fingerprint(fp.to_uppercase())
    }

    /// Build a fingerprint from the 20 raw identity digest bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 20 {
            return Err(TorControlError::Parse(format!(
                "Identity digest must be 20 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Fingerprint(hex::encode_upper(bytes)))
    }

    /// Hex digits only.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `$`-prefixed, as used in paths and LongNames.
    pub fn with_prefix(&self) -> String {
        format!("${}", self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = TorControlError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.strip_prefix('$').unwrap_or(s);
        if s.len() != 40 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TorControlError::Parse(format!(
                "Invalid fingerprint '{}': must be 40 hex characters",
                s
            )));
        }
        Ok(Fingerprint::new(s))
    }
}

/// Check a relay nickname: 1 to 19 ASCII alphanumerics.
pub fn is_valid_nickname(nickname: &str) -> bool {
    (1..=19).contains(&nickname.len()) && nickname.chars().all(|c| c.is_ascii_alphanumeric())
}

/// A relay specification: nickname, fingerprint, or both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerSpec {
    /// `nickname`
    Nickname(String),
    /// `$fingerprint`
    Fingerprint(Fingerprint),
    /// `$fingerprint~nickname` (or the legacy `=` separator).
    LongName {
        /// Identity of the relay.
        fingerprint: Fingerprint,
        /// Name the relay advertises.
        nickname: String,
    },
}

impl ServerSpec {
    /// The relay fingerprint, when known.
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        match self {
            ServerSpec::Nickname(_) => None,
            ServerSpec::Fingerprint(fp) | ServerSpec::LongName { fingerprint: fp, .. } => Some(fp),
        }
    }

    /// The relay nickname, when known.
    pub fn nickname(&self) -> Option<&str> {
        match self {
            ServerSpec::Fingerprint(_) => None,
            ServerSpec::Nickname(n) | ServerSpec::LongName { nickname: n, .. } => Some(n),
        }
    }
}

impl fmt::Display for ServerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerSpec::Nickname(n) => write!(f, "{}", n),
            ServerSpec::Fingerprint(fp) => write!(f, "${}", fp),
            ServerSpec::LongName {
                fingerprint,
                nickname,
            } => write!(f, "${}~{}", fingerprint, nickname),
        }
    }
}

impl FromStr for ServerSpec {
    type Err = TorControlError;

    /// Parse `$FP`, `$FP~nick`, `$FP=nick` or `nick`.
    fn from_str(s: &str) -> Result<Self> {
        let (fingerprint, nickname) = match s.find(['~', '=']) {
            Some(pos) => (Some(&s[..pos]), Some(&s[pos + 1..])),
            None if s.starts_with('$') => (Some(s), None),
            None => (None, Some(s)),
        };

        let fingerprint = match fingerprint {
            Some(fp) if fp.starts_with('$') => Some(Fingerprint::from_str(fp)?),
            Some(fp) => {
                return Err(TorControlError::Parse(format!(
                    "Fingerprint '{}' in '{}' must be prefixed with '$'",
                    fp, s
                )))
            }
            None => None,
        };

        if let Some(nickname) = nickname {
            if !is_valid_nickname(nickname) {
                return Err(TorControlError::Parse(format!(
                    "Invalid relay nickname '{}' in '{}'",
                    nickname, s
                )));
            }
        }

        match (fingerprint, nickname) {
            (Some(fingerprint), Some(nickname)) => Ok(ServerSpec::LongName {
                fingerprint,
                nickname: nickname.to_string(),
            }),
            (Some(fingerprint), None) => Ok(ServerSpec::Fingerprint(fingerprint)),
            (None, Some(nickname)) => Ok(ServerSpec::Nickname(nickname.to_string())),
            (None, None) => Err(TorControlError::Parse("Empty relay spec".to_string())),
        }
    }
}

/// Parse a comma separated circuit path. Every hop must be well formed.
pub fn parse_circ_path(path: &str) -> Result<Vec<ServerSpec>> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    path.split(',').map(ServerSpec::from_str).collect()
}

/// `CircStatus` field of CIRC events and `circuit-status` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStatus {
    /// `LAUNCHED`
    Launched,
    /// `BUILT`: usable for streams.
    Built,
    /// `GUARD_WAIT`: built, held back until a better guard is ruled out.
    GuardWait,
    /// `EXTENDED`: another hop was added.
    Extended,
    /// `FAILED`: closed before it was built.
    Failed,
    /// `CLOSED`: closed after it was built.
    Closed,
    /// A status this crate does not know.
    Unknown,
}

impl FromStr for CircuitStatus {
    type Err = TorControlError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_uppercase().as_str() {
            "LAUNCHED" => CircuitStatus::Launched,
            "BUILT" => CircuitStatus::Built,
            "GUARD_WAIT" => CircuitStatus::GuardWait,
            "EXTENDED" => CircuitStatus::Extended,
            "FAILED" => CircuitStatus::Failed,
            "CLOSED" => CircuitStatus::Closed,
            _ => CircuitStatus::Unknown,
        })
    }
}

impl fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitStatus::Launched => "LAUNCHED",
            CircuitStatus::Built => "BUILT",
            CircuitStatus::GuardWait => "GUARD_WAIT",
            CircuitStatus::Extended => "EXTENDED",
            CircuitStatus::Failed => "FAILED",
            CircuitStatus::Closed => "CLOSED",
            CircuitStatus::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

/// `PURPOSE` keyword of circuits. Unrecognised purposes are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitPurpose {
    /// `GENERAL`: exit and directory traffic.
    General,
    /// `HS_CLIENT_INTRO`
    HsClientIntro,
    /// `HS_CLIENT_REND`
    HsClientRend,
    /// `HS_SERVICE_INTRO`
    HsServiceIntro,
    /// `HS_SERVICE_REND`
    HsServiceRend,
    /// `TESTING`: reachability self-test.
    Testing,
    /// `CONTROLLER`: built on request through EXTENDCIRCUIT.
    Controller,
    /// `MEASURE_TIMEOUT`: kept open to measure build times.
    MeasureTimeout,
    /// `HS_VANGUARDS`
    HsVanguards,
    /// `PATH_BIAS_TESTING`
    PathBiasTesting,
    /// `CIRCUIT_PADDING`: held open to hide its real close time.
    CircuitPadding,
    /// Any other purpose, as sent.
    Unknown(String),
}

impl FromStr for CircuitPurpose {
    type Err = TorControlError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_uppercase().as_str() {
            "GENERAL" => CircuitPurpose::General,
            "HS_CLIENT_INTRO" => CircuitPurpose::HsClientIntro,
            "HS_CLIENT_REND" => CircuitPurpose::HsClientRend,
            "HS_SERVICE_INTRO" => CircuitPurpose::HsServiceIntro,
            "HS_SERVICE_REND" => CircuitPurpose::HsServiceRend,
            "TESTING" => CircuitPurpose::Testing,
            "CONTROLLER" => CircuitPurpose::Controller,
            "MEASURE_TIMEOUT" => CircuitPurpose::MeasureTimeout,
            "HS_VANGUARDS" => CircuitPurpose::HsVanguards,
            "PATH_BIAS_TESTING" => CircuitPurpose::PathBiasTesting,
            "CIRCUIT_PADDING" => CircuitPurpose::CircuitPadding,
            other => CircuitPurpose::Unknown(other.to_string()),
        })
    }
}

impl fmt::Display for CircuitPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitPurpose::General => "GENERAL",
            CircuitPurpose::HsClientIntro => "HS_CLIENT_INTRO",
            CircuitPurpose::HsClientRend => "HS_CLIENT_REND",
            CircuitPurpose::HsServiceIntro => "HS_SERVICE_INTRO",
            CircuitPurpose::HsServiceRend => "HS_SERVICE_REND",
            CircuitPurpose::Testing => "TESTING",
            CircuitPurpose::Controller => "CONTROLLER",
            CircuitPurpose::MeasureTimeout => "MEASURE_TIMEOUT",
            CircuitPurpose::HsVanguards => "HS_VANGUARDS",
            CircuitPurpose::PathBiasTesting => "PATH_BIAS_TESTING",
            CircuitPurpose::CircuitPadding => "CIRCUIT_PADDING",
            CircuitPurpose::Unknown(s) => s.as_str(),
        };
        write!(f, "{}", s)
    }
}

/// Snapshot of one circuit, from `GETINFO circuit-status` or a CIRC event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Circuit {
    /// Circuit ID.
    pub id: CircuitId,
    /// Circuit status.
    pub status: CircuitStatus,
    /// Hops, guard first.
    pub path: Vec<ServerSpec>,
    /// Build flags.
    pub build_flags: Vec<String>,
    /// Circuit purpose.
    pub purpose: Option<CircuitPurpose>,
    /// Hidden service state.
    pub hs_state: Option<String>,
    /// Rendezvous query address.
    pub rend_query: Option<String>,
    /// Time created.
    pub time_created: Option<String>,
    /// Reason for failure/closure.
    pub reason: Option<String>,
    /// Remote reason for failure/closure.
    pub remote_reason: Option<String>,
}

impl Circuit {
    /// Parse `CircuitID SP CircStatus [SP Path] [SP KEYWORD=VALUE ...]`.
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.splitn(3, ' ');
        let id = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| TorControlError::Parse("Empty circuit line".to_string()))?;
        let id = CircuitId::from_str(id)
            .map_err(|_| TorControlError::Parse(format!("Invalid circuit ID '{}'", id)))?;

        let status = parts.next().ok_or_else(|| {
            TorControlError::Parse(format!("Circuit {} line has no status: '{}'", id, line))
        })?;
        let status = CircuitStatus::from_str(status)?;

        let mut rest = parts.next().unwrap_or("");
        let mut path = Vec::new();
        let first = rest.split(' ').next().unwrap_or("");
        if !first.is_empty() && (first.starts_with('$') || !first.contains('=')) {
            path = parse_circ_path(first)?;
            rest = rest[first.len()..].trim_start();
        }

        let kv = parse_key_value_pairs(rest);
        Ok(Circuit {
            id,
            status,
            path,
            build_flags: kv
                .get("BUILD_FLAGS")
                .map(|s| s.split(',').map(String::from).collect())
                .unwrap_or_default(),
            purpose: kv
                .get("PURPOSE")
                .and_then(|s| CircuitPurpose::from_str(s).ok()),
            hs_state: kv.get("HS_STATE").cloned(),
            rend_query: kv.get("REND_QUERY").cloned(),
            time_created: kv.get("TIME_CREATED").cloned(),
            reason: kv.get("REASON").cloned(),
            remote_reason: kv.get("REMOTE_REASON").cloned(),
        })
    }
}

/// `StreamStatus` field of STREAM events and `stream-status` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// `NEW`: a connect request arrived.
    New,
    /// `NEWRESOLVE`: a resolve request arrived.
    NewResolve,
    /// `REMAP`: the target address was rewritten.
    Remap,
    /// `SENTCONNECT`
    SentConnect,
    /// `SENTRESOLVE`
    SentResolve,
    /// `SUCCEEDED`: the stream is open.
    Succeeded,
    /// `FAILED`: gave up, will not be retried.
    Failed,
    /// `CLOSED`
    Closed,
    /// `DETACHED`: taken off its circuit, may be retried.
    Detached,
    /// `CONTROLLER_WAIT`: needs an ATTACHSTREAM from us.
    ControllerWait,
    /// A status this crate does not know.
    Unknown,
}

impl FromStr for StreamStatus {
    type Err = TorControlError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_uppercase().as_str() {
            "NEW" => StreamStatus::New,
            "NEWRESOLVE" => StreamStatus::NewResolve,
            "REMAP" => StreamStatus::Remap,
            "SENTCONNECT" => StreamStatus::SentConnect,
            "SENTRESOLVE" => StreamStatus::SentResolve,
            "SUCCEEDED" => StreamStatus::Succeeded,
            "FAILED" => StreamStatus::Failed,
            "CLOSED" => StreamStatus::Closed,
            "DETACHED" => StreamStatus::Detached,
            "CONTROLLER_WAIT" => StreamStatus::ControllerWait,
            _ => StreamStatus::Unknown,
        })
    }
}

/// Snapshot of one stream, from `GETINFO stream-status` or a STREAM event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Stream ID.
    pub id: StreamId,
    /// Stream status.
    pub status: StreamStatus,
    /// Attached circuit, `None` while unattached.
    pub circuit_id: Option<CircuitId>,
    /// Target address:port.
    pub target: String,
    /// Reason for failure/closure.
    pub reason: Option<String>,
    /// Remote reason for failure/closure.
    pub remote_reason: Option<String>,
    /// Source address.
    pub source_addr: Option<String>,
    /// Stream purpose.
    pub purpose: Option<String>,
}

impl StreamInfo {
    /// Parse `StreamID SP StreamStatus SP CircuitID SP Target [SP KEYWORD=VALUE ...]`.
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.splitn(5, ' ').collect();
        if parts.len() < 4 {
            return Err(TorControlError::Parse(format!(
                "Stream line needs at least 4 fields: '{}'",
                line
            )));
        }

        let id = StreamId::from_str(parts[0])
            .map_err(|_| TorControlError::Parse(format!("Invalid stream ID '{}'", parts[0])))?;
        let status = StreamStatus::from_str(parts[1])?;
        let circuit_id = CircuitId::from_str(parts[2])
            .map_err(|_| TorControlError::Parse(format!("Invalid circuit ID '{}'", parts[2])))?;
        let kv = parse_key_value_pairs(parts.get(4).unwrap_or(&""));

        Ok(StreamInfo {
            id,
            status,
            circuit_id: (circuit_id.0 != 0).then_some(circuit_id),
            target: parts[3].to_string(),
            reason: kv.get("REASON").cloned(),
            remote_reason: kv.get("REMOTE_REASON").cloned(),
            source_addr: kv.get("SOURCE_ADDR").cloned(),
            purpose: kv.get("PURPOSE").cloned(),
        })
    }
}

/// `ORStatus` field of ORCONN events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrConnStatus {
    /// `NEW`: inbound connection accepted.
    New,
    /// `LAUNCHED`: outbound connection started.
    Launched,
    /// `CONNECTED`: handshake finished.
    Connected,
    /// `FAILED`
    Failed,
    /// `CLOSED`
    Closed,
    /// A status this crate does not know.
    Unknown,
}

impl FromStr for OrConnStatus {
    type Err = TorControlError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_uppercase().as_str() {
            "NEW" => OrConnStatus::New,
            "LAUNCHED" => OrConnStatus::Launched,
            "CONNECTED" => OrConnStatus::Connected,
            "FAILED" => OrConnStatus::Failed,
            "CLOSED" => OrConnStatus::Closed,
            _ => OrConnStatus::Unknown,
        })
    }
}

fn parse_port(value: &str, what: &str) -> Result<u16> {
    value
        .parse()
        .map_err(|_| TorControlError::Parse(format!("Invalid {} '{}'", what, value)))
}

fn parse_address(value: &str) -> Result<IpAddr> {
    value
        .parse()
        .map_err(|_| TorControlError::Parse(format!("Invalid relay address '{}'", value)))
}

/// Header fields of a relay's server descriptor (`GETINFO desc/id/...`).
///
/// Only the fields needed to identify and reach the relay are decoded; the
/// full document is kept in `raw` for a descriptor parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayDescriptor {
    /// Relay nickname.
    pub nickname: String,
    /// Relay fingerprint, from the `fingerprint` line.
    pub fingerprint: Option<Fingerprint>,
    /// Relay address.
    pub address: IpAddr,
    /// OR port.
    pub or_port: u16,
    /// Directory port, `None` when zero.
    pub dir_port: Option<u16>,
    /// Platform string, e.g. `Tor 0.4.8.10 on Linux`.
    pub platform: Option<String>,
    /// Publication time.
    pub published: Option<String>,
    /// Observed bandwidth in bytes per second.
    pub observed_bandwidth: Option<u64>,
    /// The descriptor text, verbatim.
    pub raw: String,
}

impl RelayDescriptor {
    /// Parse a server descriptor document.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut router = None;
        let mut fingerprint = None;
        let mut platform = None;
        let mut published = None;
        let mut observed_bandwidth = None;

        for line in raw.lines() {
            let line = line.strip_prefix("opt ").unwrap_or(line);
            let (keyword, value) = line.split_once(' ').unwrap_or((line, ""));
            match keyword {
                "router" => router = Some(value),
                "fingerprint" => {
                    let hex: String = value.split_whitespace().collect();
                    fingerprint = Some(Fingerprint::from_str(&hex)?);
                }
                "platform" => platform = Some(value.to_string()),
                "published" => published = Some(value.to_string()),
                "bandwidth" => {
                    observed_bandwidth = value.split_whitespace().nth(2).and_then(|v| v.parse().ok());
                }
                _ => {}
            }
        }

        let router = router
            .ok_or_else(|| TorControlError::Parse("Descriptor has no 'router' line".to_string()))?;
        let fields: Vec<&str> = router.split_whitespace().collect();
        let [nickname, address, or_port, _socks_port, dir_port] = fields.as_slice() else {
            return Err(TorControlError::Parse(format!(
                "Malformed router line: 'router {}'",
                router
            )));
        };

        let dir_port = parse_port(dir_port, "dir port")?;
        Ok(RelayDescriptor {
            nickname: nickname.to_string(),
            fingerprint,
            address: parse_address(address)?,
            or_port: parse_port(or_port, "OR port")?,
            dir_port: (dir_port != 0).then_some(dir_port),
            platform,
            published,
            observed_bandwidth,
            raw: raw.to_string(),
        })
    }
}

/// One router status entry of the consensus (`GETINFO ns/id/...`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkStatusEntry {
    /// Relay nickname.
    pub nickname: String,
    /// Relay fingerprint, decoded from the identity digest.
    pub fingerprint: Fingerprint,
    /// Publication time of the relay's descriptor.
    pub published: String,
    /// Relay address.
    pub address: IpAddr,
    /// OR port.
    pub or_port: u16,
    /// Directory port, `None` when zero.
    pub dir_port: Option<u16>,
    /// Flags from the `s` line.
    pub flags: Vec<String>,
    /// Consensus weight from the `w` line.
    pub bandwidth: Option<u64>,
    /// The entry text, verbatim.
    pub raw: String,
}

impl NetworkStatusEntry {
    /// Parse a single router status entry.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines();
        let r_line = lines
            .next()
            .and_then(|l| l.strip_prefix("r "))
            .ok_or_else(|| {
                TorControlError::Parse("Router status entry must start with an 'r' line".to_string())
            })?;

        // Microdescriptor consensuses omit the descriptor digest.
        let fields: Vec<&str> = r_line.split_whitespace().collect();
        let (nickname, identity, date, time, address, or_port, dir_port) = match fields.as_slice() {
            [nickname, identity, _, date, time, address, or_port, dir_port]
            | [nickname, identity, date, time, address, or_port, dir_port] => {
                (*nickname, *identity, *date, *time, *address, *or_port, *dir_port)
            }
            _ => {
                return Err(TorControlError::Parse(format!(
                    "Malformed 'r' line: 'r {}'",
                    r_line
                )))
            }
        };

        let digest = STANDARD_NO_PAD
            .decode(identity.trim_end_matches('='))
            .map_err(|e| TorControlError::Parse(format!("Invalid identity '{}': {}", identity, e)))?;

        let mut flags = Vec::new();
        let mut bandwidth = None;
        for line in lines {
            if let Some(value) = line.strip_prefix("s ") {
                flags = value.split_whitespace().map(String::from).collect();
            } else if let Some(value) = line.strip_prefix("w ") {
                bandwidth = parse_key_value_pairs(value)
                    .get("Bandwidth")
                    .and_then(|v| v.parse().ok());
            } else if line == "s" {
                flags.clear();
            }
        }

        let dir_port = parse_port(dir_port, "dir port")?;
        Ok(NetworkStatusEntry {
            nickname: nickname.to_string(),
            fingerprint: Fingerprint::from_bytes(&digest)?,
            published: format!("{} {}", date, time),
            address: parse_address(address)?,
            or_port: parse_port(or_port, "OR port")?,
            dir_port: (dir_port != 0).then_some(dir_port),
            flags,
            bandwidth,
            raw: raw.to_string(),
        })
    }

    /// Split a document holding several entries and parse each one.
    pub fn parse_all(document: &str) -> Result<Vec<Self>> {
        let mut entries = Vec::new();
        let mut current: Vec<&str> = Vec::new();

        for line in document.lines() {
            if line.starts_with("r ") && !current.is_empty() {
                entries.push(Self::parse(&current.join("\n"))?);
                current.clear();
            }
            if line.is_empty() {
                continue;
            }
            current.push(line);
        }
        if !current.is_empty() {
            entries.push(Self::parse(&current.join("\n"))?);
        }
        Ok(entries)
    }

    /// Check whether the relay carries a flag, e.g. `Guard`.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }
}

/// Signals accepted by the SIGNAL command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// `RELOAD`: re-read the torrc.
    Reload,
    /// `SHUTDOWN`: close listeners, exit after the grace period.
    Shutdown,
    /// `DUMP`: log statistics.
    Dump,
    /// `DEBUG`: raise every log to debug level.
    Debug,
    /// `HALT`: exit now.
    Halt,
    /// `NEWNYM`: use fresh circuits for new streams.
    NewNym,
    /// `CLEARDNSCACHE`
    ClearDnsCache,
    /// `HEARTBEAT`: log a heartbeat message now.
    Heartbeat,
    /// `DORMANT`
    Dormant,
    /// `ACTIVE`: leave dormant mode.
    Active,
}

impl Signal {
    /// Keyword sent after `SIGNAL`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Reload => "RELOAD",
            Signal::Shutdown => "SHUTDOWN",
            Signal::Dump => "DUMP",
            Signal::Debug => "DEBUG",
            Signal::Halt => "HALT",
            Signal::NewNym => "NEWNYM",
            Signal::ClearDnsCache => "CLEARDNSCACHE",
            Signal::Heartbeat => "HEARTBEAT",
            Signal::Dormant => "DORMANT",
            Signal::Active => "ACTIVE",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Daemon version as reported by `GETINFO version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorVersion {
    /// Text as received, tag included.
    pub version_string: String,
    /// First component.
    pub major: u32,
    /// Second component.
    pub minor: u32,
    /// Third component.
    pub micro: u32,
    /// Fourth component.
    pub patch: u32,
}

impl FromStr for TorVersion {
    type Err = TorControlError;

    fn from_str(s: &str) -> Result<Self> {
        // "0.4.8.10", "Tor 0.4.8.10" or "0.4.8.10 (git-abc123)"
        let version_part = s
            .strip_prefix("Tor ")
            .unwrap_or(s)
            .split(|c: char| !c.is_ascii_digit() && c != '.')
            .next()
            .unwrap_or("");

        let numbers = version_part
            .split('.')
            .map(str::parse::<u32>)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| TorControlError::Parse(format!("Invalid Tor version '{}'", s)))?;

        match numbers.as_slice() {
            [major, minor, micro, rest @ ..] if rest.len() <= 1 => Ok(TorVersion {
                version_string: s.to_string(),
                major: *major,
                minor: *minor,
                micro: *micro,
                patch: rest.first().copied().unwrap_or(0),
            }),
            _ => Err(TorControlError::Parse(format!("Invalid Tor version '{}'", s))),
        }
    }
}

impl fmt::Display for TorVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.version_string)
    }
}

/// An onion service address without the `.onion` suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OnionAddress {
    address: String,
}

impl OnionAddress {
    /// Wrap a service ID. A trailing `.onion` is dropped.
    pub fn new(address: impl Into<String>) -> Self {
        let addr = address.into();
        let addr = addr.strip_suffix(".onion").unwrap_or(&addr).to_string();
        OnionAddress { address: addr }
    }

    /// Get the service ID (the address without `.onion`).
    pub fn service_id(&self) -> &str {
        &self.address
    }

    /// `<service id>.onion`
    pub fn full_address(&self) -> String {
        format!("{}.onion", self.address)
    }

    /// Whether this is a 56-character v3 address.
    pub fn is_v3(&self) -> bool {
        self.address.len() == 56
    }
}

impl fmt::Display for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// An onion service created with ADD_ONION.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnionService {
    /// The onion address.
    pub address: OnionAddress,
    /// The private key, when generated and not discarded.
    pub private_key: Option<String>,
}
