//! Asynchronous events from Tor.
//!
//! Events arrive as status 650 replies once categories have been enabled
//! with SETEVENTS. [`Event::from_reply`] decodes a complete reply once, in
//! the dispatch loop, into a tagged [`Event`] that listeners receive by
//! reference. Categories this crate does not decode, and events whose
//! payload does not parse, survive as [`Event::Unknown`] with their raw text.

use crate::error::{Result, TorControlError};
use crate::protocol::{parse_key_value_pairs, split_key_value, Reply};
use crate::types::*;

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use tracing::debug;

/// Categories accepted by SETEVENTS.
///
/// Listeners register per category. Categories without a decoder still
/// reach their listeners, as [`Event::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// `CIRC`: a circuit was launched, extended, built, failed or closed.
    Circ,
    /// `STREAM`: an application stream changed state.
    Stream,
    /// `ORCONN`: a connection to a relay changed state.
    OrConn,
    /// `BW`: total bytes read and written, once per second.
    Bw,
    /// `DEBUG` log lines.
    Debug,
    /// `INFO` log lines.
    Info,
    /// `NOTICE` log lines.
    Notice,
    /// `WARN` log lines.
    Warn,
    /// `ERR` log lines.
    Error,
    /// `NEWDESC`: relay descriptors were fetched.
    NewDesc,
    /// `ADDRMAP`: an address mapping was added or resolved.
    AddrMap,
    /// `AUTHDIR_NEWDESCS`, emitted only by directory authorities.
    AuthDirNewDescs,
    /// `DESCCHANGED`: this relay published a new descriptor.
    DescChanged,
    /// `STATUS_GENERAL`
    StatusGeneral,
    /// `STATUS_CLIENT`, bootstrap progress among others.
    StatusClient,
    /// `STATUS_SERVER`
    StatusServer,
    /// `GUARD`: an entry guard was added, lost or came back.
    Guard,
    /// `NS`: router status entries changed.
    Ns,
    /// `STREAM_BW`: per-stream byte counts.
    StreamBw,
    /// `CLIENTS_SEEN`: bridge usage summary.
    ClientsSeen,
    /// `NEWCONSENSUS`: the full list of router status entries.
    NewConsensus,
    /// `BUILDTIMEOUT_SET`: the circuit build timeout estimate changed.
    BuildTimeoutSet,
    /// `SIGNAL`: the daemon acted on a signal.
    Signal,
    /// `CONF_CHANGED`
    ConfChanged,
    /// `CIRC_MINOR`: purpose or hidden service state of a circuit changed.
    CircMinor,
    /// `TRANSPORT_LAUNCHED`: a pluggable transport is listening.
    TransportLaunched,
    /// `CONN_BW`: per-connection byte counts.
    ConnBw,
    /// `CIRC_BW`: per-circuit byte counts.
    CircBw,
    /// `CELL_STATS`: per-circuit cell queue statistics.
    CellStats,
    /// `TB_EMPTY`: a token bucket ran dry.
    TbEmpty,
    /// `HS_DESC`: hidden service descriptor lookups and uploads.
    HsDesc,
    /// `HS_DESC_CONTENT`: a fetched hidden service descriptor, as a data block.
    HsDescContent,
    /// `NETWORK_LIVENESS`
    NetworkLiveness,
    /// `PT_LOG`: log lines from a pluggable transport.
    PtLog,
    /// `PT_STATUS`: status reports from a pluggable transport.
    PtStatus,
}

impl EventType {
    /// Every category, in no particular order.
    pub const ALL: [EventType; 35] = [
        EventType::Circ,
        EventType::Stream,
        EventType::OrConn,
        EventType::Bw,
        EventType::Debug,
        EventType::Info,
        EventType::Notice,
        EventType::Warn,
        EventType::Error,
        EventType::NewDesc,
        EventType::AddrMap,
        EventType::AuthDirNewDescs,
        EventType::DescChanged,
        EventType::StatusGeneral,
        EventType::StatusClient,
        EventType::StatusServer,
        EventType::Guard,
        EventType::Ns,
        EventType::StreamBw,
        EventType::ClientsSeen,
        EventType::NewConsensus,
        EventType::BuildTimeoutSet,
        EventType::Signal,
        EventType::ConfChanged,
        EventType::CircMinor,
        EventType::TransportLaunched,
        EventType::ConnBw,
        EventType::CircBw,
        EventType::CellStats,
        EventType::TbEmpty,
        EventType::HsDesc,
        EventType::HsDescContent,
        EventType::NetworkLiveness,
        EventType::PtLog,
        EventType::PtStatus,
    ];

    /// The keyword used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Circ => "CIRC",
            EventType::Stream => "STREAM",
            EventType::OrConn => "ORCONN",
            EventType::Bw => "BW",
            EventType::Debug => "DEBUG",
            EventType::Info => "INFO",
            EventType::Notice => "NOTICE",
            EventType::Warn => "WARN",
            EventType::Error => "ERR",
            EventType::NewDesc => "NEWDESC",
            EventType::AddrMap => "ADDRMAP",
            EventType::AuthDirNewDescs => "AUTHDIR_NEWDESCS",
            EventType::DescChanged => "DESCCHANGED",
            EventType::StatusGeneral => "STATUS_GENERAL",
            EventType::StatusClient => "STATUS_CLIENT",
            EventType::StatusServer => "STATUS_SERVER",
            EventType::Guard => "GUARD",
            EventType::Ns => "NS",
            EventType::StreamBw => "STREAM_BW",
            EventType::ClientsSeen => "CLIENTS_SEEN",
            EventType::NewConsensus => "NEWCONSENSUS",
            EventType::BuildTimeoutSet => "BUILDTIMEOUT_SET",
            EventType::Signal => "SIGNAL",
            EventType::ConfChanged => "CONF_CHANGED",
            EventType::CircMinor => "CIRC_MINOR",
            EventType::TransportLaunched => "TRANSPORT_LAUNCHED",
            EventType::ConnBw => "CONN_BW",
            EventType::CircBw => "CIRC_BW",
            EventType::CellStats => "CELL_STATS",
            EventType::TbEmpty => "TB_EMPTY",
            EventType::HsDesc => "HS_DESC",
            EventType::HsDescContent => "HS_DESC_CONTENT",
            EventType::NetworkLiveness => "NETWORK_LIVENESS",
            EventType::PtLog => "PT_LOG",
            EventType::PtStatus => "PT_STATUS",
        }
    }
}

impl FromStr for EventType {
    type Err = TorControlError;

    fn from_str(s: &str) -> Result<Self> {
        EventType::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TorControlError::Parse(format!("Unknown event type: {}", s)))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One decoded 650 reply, as handed to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// `CIRC`
    CircuitStatus(Circuit),
    /// `STREAM`
    StreamStatus(StreamInfo),
    /// `ORCONN`
    OrConnStatus(OrConnEvent),
    /// `BW`
    Bandwidth(BandwidthEvent),
    /// `DEBUG`, `INFO`, `NOTICE`, `WARN` or `ERR`.
    Log(LogEvent),
    /// `ADDRMAP`
    AddressMap(AddressMapEvent),
    /// `NEWDESC`: relays whose descriptors were fetched.
    NewDescriptors(Vec<ServerSpec>),
    /// `DESCCHANGED`, which carries no payload.
    DescriptorChanged,
    /// `STATUS_GENERAL`, `STATUS_CLIENT` or `STATUS_SERVER`.
    Status(StatusEvent),
    /// `GUARD`
    Guard(GuardEvent),
    /// `NS`: entries that changed.
    NetworkStatus(Vec<NetworkStatusEntry>),
    /// `STREAM_BW`
    StreamBandwidth(StreamBandwidthEvent),
    /// `NEWCONSENSUS`: every entry of the new consensus.
    NewConsensus(Vec<NetworkStatusEntry>),
    /// `BUILDTIMEOUT_SET`
    BuildTimeoutSet(BuildTimeoutEvent),
    /// `SIGNAL`: name of the signal acted on.
    Signal(String),
    /// `CONF_CHANGED`, one pair per line. `None` values were reset to their default.
    ConfigChanged(Vec<(String, Option<String>)>),
    /// `NETWORK_LIVENESS`: `true` when the network is reachable.
    NetworkLiveness(bool),
    /// `HS_DESC`
    HsDescriptor(HsDescEvent),
    /// Minor circuit change.
    CircuitMinor(CircMinorEvent),
    /// Bytes carried by one circuit.
    CircuitBandwidth(CircuitBandwidthEvent),
    /// Bytes carried by one connection.
    ConnectionBandwidth(ConnectionBandwidthEvent),
    /// Bridge usage summary.
    ClientsSeen(ClientsSeenEvent),
    /// A token bucket ran dry.
    TokenBucketEmpty(TokenBucketEmptyEvent),
    /// Cell queue statistics for a circuit.
    CellStats(CellStatsEvent),
    /// A pluggable transport started listening.
    TransportLaunched(TransportLaunchedEvent),
    /// A category without a decoder, or a payload that failed to decode.
    Unknown {
        /// Keyword as received.
        event_type: String,
        /// Text after the keyword. Continuation lines and data blocks
        /// follow, newline-separated.
        data: String,
    },
}

impl Event {
    /// Decode a complete 650 reply.
    pub fn from_reply(reply: &Reply) -> Event {
        let first = reply.first_line();
        let (keyword, rest) = first.split_once(' ').unwrap_or((first, ""));

        // Multi-line events carry their payload in the following lines or in
        // a data block; the closing "650 OK" is framing.
        let extra: Vec<&str> = match reply.lines.split_first() {
            Some((_, tail)) => tail
                .iter()
                .filter(|line| !(line.is_end() && line.text == "OK"))
                .map(|line| line.text.as_str())
                .collect(),
            None => Vec::new(),
        };

        let decoded = match keyword.to_uppercase().as_str() {
            "CONF_CHANGED" => Ok(parse_conf_changed(&extra)),
            "NS" => NetworkStatusEntry::parse_all(reply.data().unwrap_or(rest))
                .map(Event::NetworkStatus),
            "NEWCONSENSUS" => NetworkStatusEntry::parse_all(reply.data().unwrap_or(rest))
                .map(Event::NewConsensus),
            _ => try_parse_event(keyword, rest),
        };

        decoded.unwrap_or_else(|e| {
            debug!("Keeping undecodable {} event raw: {}", keyword, e);
            let mut data = rest.to_string();
            for line in extra {
                data.push('\n');
                data.push_str(line);
            }
            if let Some(block) = reply.data() {
                data.push('\n');
                data.push_str(block);
            }
            Event::Unknown {
                event_type: keyword.to_string(),
                data,
            }
        })
    }

    /// The category this event is delivered under, `None` for categories
    /// this crate does not know.
    pub fn event_type(&self) -> Option<EventType> {
        Some(match self {
            Event::CircuitStatus(_) => EventType::Circ,
            Event::StreamStatus(_) => EventType::Stream,
            Event::OrConnStatus(_) => EventType::OrConn,
            Event::Bandwidth(_) => EventType::Bw,
            Event::Log(log) => log.severity.event_type(),
            Event::AddressMap(_) => EventType::AddrMap,
            Event::NewDescriptors(_) => EventType::NewDesc,
            Event::DescriptorChanged => EventType::DescChanged,
            Event::Status(status) => status.status_type.event_type(),
            Event::Guard(_) => EventType::Guard,
            Event::NetworkStatus(_) => EventType::Ns,
            Event::StreamBandwidth(_) => EventType::StreamBw,
            Event::NewConsensus(_) => EventType::NewConsensus,
            Event::BuildTimeoutSet(_) => EventType::BuildTimeoutSet,
            Event::Signal(_) => EventType::Signal,
            Event::ConfigChanged(_) => EventType::ConfChanged,
            Event::NetworkLiveness(_) => EventType::NetworkLiveness,
            Event::HsDescriptor(_) => EventType::HsDesc,
            Event::CircuitMinor(_) => EventType::CircMinor,
            Event::CircuitBandwidth(_) => EventType::CircBw,
            Event::ConnectionBandwidth(_) => EventType::ConnBw,
            Event::ClientsSeen(_) => EventType::ClientsSeen,
            Event::TokenBucketEmpty(_) => EventType::TbEmpty,
            Event::CellStats(_) => EventType::CellStats,
            Event::TransportLaunched(_) => EventType::TransportLaunched,
            Event::Unknown { event_type, .. } => return EventType::from_str(event_type).ok(),
        })
    }
}

/// `ORCONN` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrConnEvent {
    /// Relay as `$fingerprint~nickname`, or `address:port` before the handshake.
    pub target: String,
    /// New state of the connection.
    pub status: OrConnStatus,
    /// Set on `FAILED` and `CLOSED`.
    pub reason: Option<String>,
    /// Circuits on the connection, when reported.
    pub num_circuits: Option<u32>,
    /// Identifier shared with `CONN_BW` and `TB_EMPTY`.
    pub conn_id: Option<u64>,
}

/// `BW` payload: totals over the previous second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandwidthEvent {
    /// Bytes received.
    pub bytes_read: u64,
    /// Bytes sent.
    pub bytes_written: u64,
}

/// A daemon log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    /// Level the line was logged at.
    pub severity: LogSeverity,
    /// Text of the line.
    pub message: String,
}

/// Daemon log levels, one SETEVENTS category each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSeverity {
    /// `DEBUG`
    Debug,
    /// `INFO`
    Info,
    /// `NOTICE`
    Notice,
    /// `WARN`
    Warn,
    /// `ERR`
    Error,
}

impl LogSeverity {
    /// Wire keyword, which is also the event category.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSeverity::Debug => "DEBUG",
            LogSeverity::Info => "INFO",
            LogSeverity::Notice => "NOTICE",
            LogSeverity::Warn => "WARN",
            LogSeverity::Error => "ERR",
        }
    }

    fn event_type(&self) -> EventType {
        match self {
            LogSeverity::Debug => EventType::Debug,
            LogSeverity::Info => EventType::Info,
            LogSeverity::Notice => EventType::Notice,
            LogSeverity::Warn => EventType::Warn,
            LogSeverity::Error => EventType::Error,
        }
    }
}

impl FromStr for LogSeverity {
    type Err = TorControlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "DEBUG" => Ok(LogSeverity::Debug),
            "INFO" => Ok(LogSeverity::Info),
            "NOTICE" => Ok(LogSeverity::Notice),
            "WARN" => Ok(LogSeverity::Warn),
            "ERR" => Ok(LogSeverity::Error),
            other => Err(TorControlError::Parse(format!(
                "Unknown log severity: {}",
                other
            ))),
        }
    }
}

/// `ADDRMAP` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressMapEvent {
    /// Address that was looked up or mapped.
    pub original: String,
    /// New address, `<error>` when resolution failed.
    pub new: String,
    /// Local expiry time, `None` for `NEVER`.
    pub expiry: Option<String>,
    /// Error code, if any.
    pub error: Option<String>,
}

/// `STATUS_*` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    /// Which of the three status categories this came from.
    pub status_type: StatusType,
    /// `NOTICE`, `WARN` or `ERR`.
    pub severity: StatusSeverity,
    /// Action, e.g. `BOOTSTRAP` or `CIRCUIT_ESTABLISHED`.
    pub action: String,
    /// Keyword arguments.
    pub arguments: HashMap<String, String>,
}

/// The three `STATUS_*` categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusType {
    /// `STATUS_GENERAL`
    General,
    /// `STATUS_CLIENT`
    Client,
    /// `STATUS_SERVER`
    Server,
}

impl StatusType {
    /// Category suffix after `STATUS_`.
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusType::General => "GENERAL",
            StatusType::Client => "CLIENT",
            StatusType::Server => "SERVER",
        }
    }

    fn event_type(&self) -> EventType {
        match self {
            StatusType::General => EventType::StatusGeneral,
            StatusType::Client => EventType::StatusClient,
            StatusType::Server => EventType::StatusServer,
        }
    }
}

/// Severity carried by `STATUS_*` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSeverity {
    /// `NOTICE`
    Notice,
    /// `WARN`
    Warn,
    /// `ERR`
    Error,
}

impl FromStr for StatusSeverity {
    type Err = TorControlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "NOTICE" => Ok(StatusSeverity::Notice),
            "WARN" => Ok(StatusSeverity::Warn),
            "ERR" => Ok(StatusSeverity::Error),
            other => Err(TorControlError::Parse(format!(
                "Unknown status severity: {}",
                other
            ))),
        }
    }
}

/// `GUARD` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardEvent {
    /// Guard type, currently always `ENTRY`.
    pub guard_type: String,
    /// The guard relay.
    pub relay: ServerSpec,
    /// Guard status, e.g. `NEW`, `UP`, `DOWN`, `BAD`.
    pub status: String,
}

/// `STREAM_BW` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamBandwidthEvent {
    /// Stream the counts belong to.
    pub stream_id: StreamId,
    /// Bytes written to the stream since the last event.
    pub bytes_written: u64,
    /// Bytes read from the stream since the last event.
    pub bytes_read: u64,
}

/// `BUILDTIMEOUT_SET` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTimeoutEvent {
    /// Event kind: `COMPUTED`, `RESET`, `SUSPENDED`, `DISCARD` or `RESUME`.
    pub set_type: String,
    /// Circuit build times used for the estimate.
    pub total_times: Option<u32>,
    /// Current build timeout, when computed.
    pub timeout_ms: Option<u32>,
}

/// `HS_DESC` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HsDescEvent {
    /// Action, e.g. `REQUESTED`, `RECEIVED`, `FAILED`.
    pub action: String,
    /// Onion address without `.onion`, or `UNKNOWN`.
    pub address: String,
    /// Client authorization type, usually `NO_AUTH`.
    pub auth_type: String,
    /// The HSDir queried, `UNKNOWN` when not known.
    pub hs_dir: String,
    /// Descriptor identifier, when the event names one.
    pub descriptor_id: Option<String>,
    /// Set on `FAILED`.
    pub reason: Option<String>,
}

/// `CIRC_MINOR` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircMinorEvent {
    /// Circuit ID.
    pub id: CircuitId,
    /// What changed: `PURPOSE_CHANGED` or `CANNIBALIZED`.
    pub event: String,
    /// Hops, guard first.
    pub path: Vec<ServerSpec>,
    /// Build flags.
    pub build_flags: Vec<String>,
    /// Purpose after the change.
    pub purpose: Option<CircuitPurpose>,
    /// Hidden service state after the change.
    pub hs_state: Option<String>,
    /// Onion address the circuit serves.
    pub rend_query: Option<String>,
    /// Creation time, `YYYY-MM-DDTHH:MM:SS[.ffffff]` UTC.
    pub time_created: Option<String>,
    /// Purpose before the change.
    pub old_purpose: Option<CircuitPurpose>,
    /// Hidden service state before the change.
    pub old_hs_state: Option<String>,
}

/// `CIRC_BW` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBandwidthEvent {
    /// Circuit ID.
    pub id: CircuitId,
    /// Bytes read since the last event.
    pub bytes_read: u64,
    /// Bytes written since the last event.
    pub bytes_written: u64,
}

/// `CONN_BW` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionBandwidthEvent {
    /// Connection ID, as used by ORCONN events.
    pub conn_id: u64,
    /// Connection kind, e.g. `OR`, `DIR` or `EXIT`.
    pub conn_type: String,
    /// Bytes read since the last event.
    pub bytes_read: u64,
    /// Bytes written since the last event.
    pub bytes_written: u64,
}

/// `CLIENTS_SEEN` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientsSeenEvent {
    /// Start of the measurement period, `YYYY-MM-DD HH:MM:SS` UTC.
    pub time_started: String,
    /// Client count per two-letter country code.
    pub locales: HashMap<String, u64>,
    /// Client count per IP version, e.g. `v4`.
    pub ip_versions: HashMap<String, u64>,
}

/// `TB_EMPTY` payload. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBucketEmptyEvent {
    /// `GLOBAL`, `RELAY` or `ORCONN`.
    pub bucket: String,
    /// Set for `ORCONN` buckets.
    pub conn_id: Option<u64>,
    /// Time the read bucket was empty.
    pub read_ms: u64,
    /// Time the write bucket was empty.
    pub written_ms: u64,
    /// Time since the previous TB_EMPTY for this bucket.
    pub last_ms: u64,
}

/// `CELL_STATS` payload. Inbound and outbound halves are each present only
/// when the circuit has that side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellStatsEvent {
    /// Origin circuit, absent for circuits we relay.
    pub id: Option<CircuitId>,
    /// Inbound queue ID.
    pub inbound_queue: Option<String>,
    /// Inbound connection ID.
    pub inbound_connection: Option<String>,
    /// Cells added to the inbound queue, by command.
    pub inbound_added: Option<HashMap<String, u64>>,
    /// Cells removed from the inbound queue, by command.
    pub inbound_removed: Option<HashMap<String, u64>>,
    /// Milliseconds cells waited inbound, by command.
    pub inbound_time: Option<HashMap<String, u64>>,
    /// Outbound queue ID.
    pub outbound_queue: Option<String>,
    /// Outbound connection ID.
    pub outbound_connection: Option<String>,
    /// Cells added to the outbound queue, by command.
    pub outbound_added: Option<HashMap<String, u64>>,
    /// Cells removed from the outbound queue, by command.
    pub outbound_removed: Option<HashMap<String, u64>>,
    /// Milliseconds cells waited outbound, by command.
    pub outbound_time: Option<HashMap<String, u64>>,
}

/// `TRANSPORT_LAUNCHED` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportLaunchedEvent {
    /// `client` or `server`.
    pub transport_type: String,
    /// Transport name, e.g. `obfs4`.
    pub name: String,
    /// Listening address.
    pub address: IpAddr,
    /// Listening port.
    pub port: u16,
}

/// Parse a single-line event from its keyword and the text after it.
pub fn parse_event(event_type: &str, text: &str) -> Event {
    try_parse_event(event_type, text).unwrap_or_else(|_| Event::Unknown {
        event_type: event_type.to_string(),
        data: text.to_string(),
    })
}

fn try_parse_event(event_type: &str, text: &str) -> Result<Event> {
    match event_type.to_uppercase().as_str() {
        "CIRC" => Circuit::parse(text).map(Event::CircuitStatus),
        "STREAM" => StreamInfo::parse(text).map(Event::StreamStatus),
        "ORCONN" => parse_orconn_event(text),
        "BW" => parse_bandwidth_event(text),
        "DEBUG" | "INFO" | "NOTICE" | "WARN" | "ERR" => parse_log_event(event_type, text),
        "ADDRMAP" => parse_addrmap_event(text),
        "NEWDESC" => text
            .split_whitespace()
            .map(ServerSpec::from_str)
            .collect::<Result<Vec<_>>>()
            .map(Event::NewDescriptors),
        "DESCCHANGED" => Ok(Event::DescriptorChanged),
        "STATUS_GENERAL" => parse_status_event(StatusType::General, text),
        "STATUS_CLIENT" => parse_status_event(StatusType::Client, text),
        "STATUS_SERVER" => parse_status_event(StatusType::Server, text),
        "GUARD" => parse_guard_event(text),
        "STREAM_BW" => parse_stream_bw_event(text),
        "BUILDTIMEOUT_SET" => parse_buildtimeout_event(text),
        "SIGNAL" => Ok(Event::Signal(text.trim().to_string())),
        "NETWORK_LIVENESS" => Ok(parse_network_liveness(text)),
        "HS_DESC" => parse_hs_desc_event(text),
        "CIRC_MINOR" => parse_circ_minor_event(text),
        "CIRC_BW" => parse_circ_bw_event(text),
        "CONN_BW" => parse_conn_bw_event(text),
        "CLIENTS_SEEN" => parse_clients_seen_event(text),
        "TB_EMPTY" => parse_tb_empty_event(text),
        "CELL_STATS" => parse_cell_stats_event(text),
        "TRANSPORT_LAUNCHED" => parse_transport_launched_event(text),
        _ => Ok(Event::Unknown {
            event_type: event_type.to_string(),
            data: text.to_string(),
        }),
    }
}

fn missing(event: &str, field: &str, text: &str) -> TorControlError {
    TorControlError::Parse(format!("{} event missing {}: '{}'", event, field, text))
}

fn parse_number<T: FromStr>(event: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| TorControlError::Parse(format!("{} event has invalid number '{}'", event, value)))
}

fn parse_orconn_event(text: &str) -> Result<Event> {
    let mut parts = text.splitn(3, ' ');
    let target = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| missing("ORCONN", "target", text))?;
    let status = parts
        .next()
        .ok_or_else(|| missing("ORCONN", "status", text))?;
    let kv = parse_key_value_pairs(parts.next().unwrap_or(""));

    Ok(Event::OrConnStatus(OrConnEvent {
        target: target.to_string(),
        status: OrConnStatus::from_str(status)?,
        reason: kv.get("REASON").cloned(),
        num_circuits: kv.get("NCIRCS").and_then(|s| s.parse().ok()),
        conn_id: kv.get("ID").and_then(|s| s.parse().ok()),
    }))
}

fn parse_bandwidth_event(text: &str) -> Result<Event> {
    let mut parts = text.split_whitespace();
    let bytes_read = parts.next().ok_or_else(|| missing("BW", "bytes read", text))?;
    let bytes_written = parts
        .next()
        .ok_or_else(|| missing("BW", "bytes written", text))?;

    Ok(Event::Bandwidth(BandwidthEvent {
        bytes_read: parse_number("BW", bytes_read)?,
        bytes_written: parse_number("BW", bytes_written)?,
    }))
}

fn parse_log_event(severity: &str, text: &str) -> Result<Event> {
    Ok(Event::Log(LogEvent {
        severity: LogSeverity::from_str(severity)?,
        message: text.to_string(),
    }))
}

fn parse_addrmap_event(text: &str) -> Result<Event> {
    let mut parts = text.splitn(3, ' ');
    let original = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| missing("ADDRMAP", "address", text))?;
    let new = parts
        .next()
        .ok_or_else(|| missing("ADDRMAP", "new address", text))?;
    let rest = parts.next().unwrap_or("");

    // Expiry is either NEVER or a quoted local time containing a space.
    let (expiry, rest) = if let Some(quoted) = rest.strip_prefix('"') {
        let end = quoted
            .find('"')
            .ok_or_else(|| missing("ADDRMAP", "closing quote", text))?;
        (Some(quoted[..end].to_string()), &quoted[end + 1..])
    } else {
        let (word, rest) = rest.split_once(' ').unwrap_or((rest, ""));
        let expiry = (!word.is_empty() && word != "NEVER").then(|| word.to_string());
        (expiry, rest)
    };
    let kv = parse_key_value_pairs(rest);

    Ok(Event::AddressMap(AddressMapEvent {
        original: original.to_string(),
        new: new.to_string(),
        expiry,
        error: kv.get("error").cloned(),
    }))
}

fn parse_status_event(status_type: StatusType, text: &str) -> Result<Event> {
    let mut parts = text.splitn(3, ' ');
    let severity = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| missing("STATUS", "severity", text))?;
    let action = parts
        .next()
        .ok_or_else(|| missing("STATUS", "action", text))?;

    Ok(Event::Status(StatusEvent {
        status_type,
        severity: StatusSeverity::from_str(severity)?,
        action: action.to_string(),
        arguments: parse_key_value_pairs(parts.next().unwrap_or("")),
    }))
}

fn parse_guard_event(text: &str) -> Result<Event> {
    let parts: Vec<&str> = text.split_whitespace().collect();
    let [guard_type, relay, status, ..] = parts.as_slice() else {
        return Err(missing("GUARD", "fields", text));
    };

    Ok(Event::Guard(GuardEvent {
        guard_type: guard_type.to_string(),
        relay: ServerSpec::from_str(relay)?,
        status: status.to_string(),
    }))
}

fn parse_stream_bw_event(text: &str) -> Result<Event> {
    let parts: Vec<&str> = text.split_whitespace().collect();
    let [stream_id, written, read, ..] = parts.as_slice() else {
        return Err(missing("STREAM_BW", "fields", text));
    };

    Ok(Event::StreamBandwidth(StreamBandwidthEvent {
        stream_id: StreamId(parse_number("STREAM_BW", stream_id)?),
        bytes_written: parse_number("STREAM_BW", written)?,
        bytes_read: parse_number("STREAM_BW", read)?,
    }))
}

fn parse_buildtimeout_event(text: &str) -> Result<Event> {
    let (set_type, rest) = text.split_once(' ').unwrap_or((text, ""));
    if set_type.is_empty() {
        return Err(missing("BUILDTIMEOUT_SET", "type", text));
    }
    let kv = parse_key_value_pairs(rest);

    Ok(Event::BuildTimeoutSet(BuildTimeoutEvent {
        set_type: set_type.to_string(),
        total_times: kv.get("TOTAL_TIMES").and_then(|s| s.parse().ok()),
        timeout_ms: kv.get("TIMEOUT_MS").and_then(|s| s.parse().ok()),
    }))
}

fn parse_network_liveness(text: &str) -> Event {
    Event::NetworkLiveness(text.trim().eq_ignore_ascii_case("UP"))
}

fn parse_hs_desc_event(text: &str) -> Result<Event> {
    let parts: Vec<&str> = text.split_whitespace().collect();
    let [action, address, auth_type, hs_dir, rest @ ..] = parts.as_slice() else {
        return Err(missing("HS_DESC", "fields", text));
    };

    let descriptor_id = rest
        .first()
        .filter(|word| !word.contains('='))
        .map(|word| word.to_string());
    let kv = parse_key_value_pairs(&rest.join(" "));

    Ok(Event::HsDescriptor(HsDescEvent {
        action: action.to_string(),
        address: address.to_string(),
        auth_type: auth_type.to_string(),
        hs_dir: hs_dir.to_string(),
        descriptor_id,
        reason: kv.get("REASON").cloned(),
    }))
}

fn parse_circ_minor_event(text: &str) -> Result<Event> {
    let mut parts = text.splitn(3, ' ');
    let id = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| missing("CIRC_MINOR", "circuit id", text))?;
    let event = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| missing("CIRC_MINOR", "event", text))?;

    let mut rest = parts.next().unwrap_or("");
    let mut path = Vec::new();
    let first = rest.split(' ').next().unwrap_or("");
    if !first.is_empty() && !first.contains('=') {
        path = parse_circ_path(first)?;
        rest = rest[first.len()..].trim_start();
    }

    let kv = parse_key_value_pairs(rest);
    let time_created = kv.get("TIME_CREATED").cloned();
    if let Some(time) = &time_created {
        check_timestamp("CIRC_MINOR", time)?;
    }

    Ok(Event::CircuitMinor(CircMinorEvent {
        id: CircuitId(parse_number("CIRC_MINOR", id)?),
        event: event.to_string(),
        path,
        build_flags: kv
            .get("BUILD_FLAGS")
            .map(|s| s.split(',').map(String::from).collect())
            .unwrap_or_default(),
        purpose: kv.get("PURPOSE").map(|s| CircuitPurpose::from_str(s)).transpose()?,
        hs_state: kv.get("HS_STATE").cloned(),
        rend_query: kv.get("REND_QUERY").cloned(),
        time_created,
        old_purpose: kv
            .get("OLD_PURPOSE")
            .map(|s| CircuitPurpose::from_str(s))
            .transpose()?,
        old_hs_state: kv.get("OLD_HS_STATE").cloned(),
    }))
}

/// Require `KEY=<u64>` in an event's keyword arguments.
fn required_number(
    event: &str,
    kv: &HashMap<String, String>,
    key: &str,
    text: &str,
) -> Result<u64> {
    let value = kv.get(key).ok_or_else(|| missing(event, key, text))?;
    parse_number(event, value)
}

fn parse_circ_bw_event(text: &str) -> Result<Event> {
    let kv = parse_key_value_pairs(text);
    Ok(Event::CircuitBandwidth(CircuitBandwidthEvent {
        id: CircuitId(required_number("CIRC_BW", &kv, "ID", text)?),
        bytes_read: required_number("CIRC_BW", &kv, "READ", text)?,
        bytes_written: required_number("CIRC_BW", &kv, "WRITTEN", text)?,
    }))
}

fn parse_conn_bw_event(text: &str) -> Result<Event> {
    let kv = parse_key_value_pairs(text);
    let conn_type = kv
        .get("TYPE")
        .ok_or_else(|| missing("CONN_BW", "TYPE", text))?;

    Ok(Event::ConnectionBandwidth(ConnectionBandwidthEvent {
        conn_id: required_number("CONN_BW", &kv, "ID", text)?,
        conn_type: conn_type.clone(),
        bytes_read: required_number("CONN_BW", &kv, "READ", text)?,
        bytes_written: required_number("CONN_BW", &kv, "WRITTEN", text)?,
    }))
}

fn parse_clients_seen_event(text: &str) -> Result<Event> {
    let kv = parse_key_value_pairs(text);
    let time_started = kv
        .get("TimeStarted")
        .ok_or_else(|| missing("CLIENTS_SEEN", "TimeStarted", text))?;

    let locales = match kv.get("CountrySummary") {
        Some(summary) => parse_counts("CLIENTS_SEEN", summary, '=')?,
        None => HashMap::new(),
    };
    if let Some(code) = locales.keys().find(|code| code.len() != 2) {
        return Err(TorControlError::Parse(format!(
            "CLIENTS_SEEN event has invalid country code '{}'",
            code
        )));
    }
    let ip_versions = match kv.get("IPVersions") {
        Some(versions) => parse_counts("CLIENTS_SEEN", versions, '=')?,
        None => HashMap::new(),
    };

    Ok(Event::ClientsSeen(ClientsSeenEvent {
        time_started: time_started.clone(),
        locales,
        ip_versions,
    }))
}

fn parse_tb_empty_event(text: &str) -> Result<Event> {
    let (bucket, rest) = text.split_once(' ').unwrap_or((text, ""));
    if bucket.is_empty() || bucket.contains('=') {
        return Err(missing("TB_EMPTY", "bucket", text));
    }
    let kv = parse_key_value_pairs(rest);

    Ok(Event::TokenBucketEmpty(TokenBucketEmptyEvent {
        bucket: bucket.to_string(),
        conn_id: kv
            .get("ID")
            .map(|id| parse_number("TB_EMPTY", id))
            .transpose()?,
        read_ms: required_number("TB_EMPTY", &kv, "READ", text)?,
        written_ms: required_number("TB_EMPTY", &kv, "WRITTEN", text)?,
        last_ms: required_number("TB_EMPTY", &kv, "LAST", text)?,
    }))
}

fn parse_cell_stats_event(text: &str) -> Result<Event> {
    let kv = parse_key_value_pairs(text);
    let counts = |key: &str| {
        kv.get(key)
            .map(|value| parse_counts("CELL_STATS", value, ':'))
            .transpose()
    };

    Ok(Event::CellStats(CellStatsEvent {
        id: kv
            .get("ID")
            .map(|id| parse_number("CELL_STATS", id).map(CircuitId))
            .transpose()?,
        inbound_queue: kv.get("InboundQueue").cloned(),
        inbound_connection: kv.get("InboundConn").cloned(),
        inbound_added: counts("InboundAdded")?,
        inbound_removed: counts("InboundRemoved")?,
        inbound_time: counts("InboundTime")?,
        outbound_queue: kv.get("OutboundQueue").cloned(),
        outbound_connection: kv.get("OutboundConn").cloned(),
        outbound_added: counts("OutboundAdded")?,
        outbound_removed: counts("OutboundRemoved")?,
        outbound_time: counts("OutboundTime")?,
    }))
}

fn parse_transport_launched_event(text: &str) -> Result<Event> {
    let parts: Vec<&str> = text.split_whitespace().collect();
    let [transport_type, name, address, port, ..] = parts.as_slice() else {
        return Err(missing("TRANSPORT_LAUNCHED", "fields", text));
    };
    if !matches!(*transport_type, "client" | "server") {
        return Err(TorControlError::Parse(format!(
            "TRANSPORT_LAUNCHED event has invalid type '{}'",
            transport_type
        )));
    }
    let address = address.parse().map_err(|_| {
        TorControlError::Parse(format!(
            "TRANSPORT_LAUNCHED event has invalid address '{}'",
            address
        ))
    })?;

    Ok(Event::TransportLaunched(TransportLaunchedEvent {
        transport_type: transport_type.to_string(),
        name: name.to_string(),
        address,
        port: parse_number("TRANSPORT_LAUNCHED", port)?,
    }))
}

/// Parse `key<sep>count,key<sep>count,...`. Keys are word characters and
/// may not repeat.
fn parse_counts(event: &str, value: &str, separator: char) -> Result<HashMap<String, u64>> {
    let mut counts = HashMap::new();
    for entry in value.split(',').filter(|entry| !entry.is_empty()) {
        let malformed = || {
            TorControlError::Parse(format!("{} event has malformed mapping '{}'", event, entry))
        };
        let (key, count) = entry.split_once(separator).ok_or_else(malformed)?;
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(malformed());
        }
        if counts
            .insert(key.to_string(), parse_number(event, count)?)
            .is_some()
        {
            return Err(TorControlError::Parse(format!(
                "{} event repeats key '{}'",
                event, key
            )));
        }
    }
    Ok(counts)
}

/// Check `YYYY-MM-DDTHH:MM:SS` with optional fractional seconds.
fn check_timestamp(event: &str, value: &str) -> Result<()> {
    fn digits(field: &str, len: usize) -> bool {
        field.len() == len && field.bytes().all(|b| b.is_ascii_digit())
    }

    let valid = value.split_once('T').is_some_and(|(date, time)| {
        let (time, fraction) = time.split_once('.').unwrap_or((time, "0"));
        let date: Vec<&str> = date.split('-').collect();
        let time: Vec<&str> = time.split(':').collect();
        matches!(date.as_slice(), [y, m, d] if digits(y, 4) && digits(m, 2) && digits(d, 2))
            && matches!(time.as_slice(), [h, m, s] if digits(h, 2) && digits(m, 2) && digits(s, 2))
            && !fraction.is_empty()
            && fraction.bytes().all(|b| b.is_ascii_digit())
    });

    if valid {
        Ok(())
    } else {
        Err(TorControlError::Parse(format!(
            "{} event has invalid timestamp '{}'",
            event, value
        )))
    }
}

fn parse_conf_changed(lines: &[&str]) -> Event {
    Event::ConfigChanged(
        lines
            .iter()
            .map(|line| match split_key_value(line) {
                Some((key, value)) => (key.to_string(), Some(value.to_string())),
                None => (line.to_string(), None),
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const FP_A: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

    fn event(raw: &str) -> Event {
        Event::from_reply(&Reply::from_raw(raw).unwrap())
    }

    #[test]
    fn test_event_type_parsing() {
        assert_eq!(EventType::from_str("CIRC").unwrap(), EventType::Circ);
        assert_eq!(EventType::from_str("bw").unwrap(), EventType::Bw);
        assert!(EventType::from_str("UNKNOWN_EVENT").is_err());
    }

    #[test]
    fn test_event_type_as_str() {
        assert_eq!(EventType::Error.as_str(), "ERR");
        assert_eq!(EventType::StatusClient.to_string(), "STATUS_CLIENT");
        assert_eq!(EventType::HsDesc.to_string(), "HS_DESC");
    }

    #[test]
    fn test_bandwidth_event() {
        let bw = event("650 BW 1234 5678\r\n");
        assert_eq!(
            bw,
            Event::Bandwidth(BandwidthEvent {
                bytes_read: 1234,
                bytes_written: 5678
            })
        );
        assert_eq!(bw.event_type(), Some(EventType::Bw));
    }

    #[test]
    fn test_malformed_bandwidth_kept_raw() {
        match event("650 BW lots\r\n") {
            Event::Unknown { event_type, data } => {
                assert_eq!(event_type, "BW");
                assert_eq!(data, "lots");
            }
            other => panic!("Expected Unknown event, got {other:?}"),
        }
    }

    #[test]
    fn test_circuit_event() {
        let raw = format!("650 CIRC 123 BUILT ${FP_A}~Guard PURPOSE=GENERAL\r\n");
        match event(&raw) {
            Event::CircuitStatus(circ) => {
                assert_eq!(circ.id, CircuitId(123));
                assert_eq!(circ.status, CircuitStatus::Built);
                assert_eq!(circ.path.len(), 1);
                assert_eq!(circ.purpose, Some(CircuitPurpose::General));
            }
            other => panic!("Expected CircuitStatus event, got {other:?}"),
        }
    }

    #[test]
    fn test_circuit_event_with_reason() {
        match parse_event("CIRC", "5 FAILED REASON=TIMEOUT") {
            Event::CircuitStatus(circ) => {
                assert_eq!(circ.status, CircuitStatus::Failed);
                assert_eq!(circ.reason.as_deref(), Some("TIMEOUT"));
                assert!(circ.path.is_empty());
            }
            other => panic!("Expected CircuitStatus event, got {other:?}"),
        }
    }

    #[test]
    fn test_stream_event() {
        match parse_event("STREAM", "42 SUCCEEDED 10 www.example.com:443 PURPOSE=DIR_FETCH") {
            Event::StreamStatus(stream) => {
                assert_eq!(stream.id, StreamId(42));
                assert_eq!(stream.circuit_id, Some(CircuitId(10)));
                assert_eq!(stream.purpose.as_deref(), Some("DIR_FETCH"));
            }
            other => panic!("Expected StreamStatus event, got {other:?}"),
        }
    }

    #[test]
    fn test_orconn_event() {
        match parse_event("ORCONN", &format!("${FP_A}~Guard CONNECTED NCIRCS=3 ID=18")) {
            Event::OrConnStatus(conn) => {
                assert_eq!(conn.status, OrConnStatus::Connected);
                assert_eq!(conn.num_circuits, Some(3));
                assert_eq!(conn.conn_id, Some(18));
            }
            other => panic!("Expected OrConnStatus event, got {other:?}"),
        }
    }

    #[test]
    fn test_log_event_severities() {
        for (sev, expected, category) in [
            ("DEBUG", LogSeverity::Debug, EventType::Debug),
            ("INFO", LogSeverity::Info, EventType::Info),
            ("NOTICE", LogSeverity::Notice, EventType::Notice),
            ("WARN", LogSeverity::Warn, EventType::Warn),
            ("ERR", LogSeverity::Error, EventType::Error),
        ] {
            let event = parse_event(sev, "test message");
            assert_eq!(event.event_type(), Some(category));
            match event {
                Event::Log(log) => {
                    assert_eq!(log.severity, expected);
                    assert_eq!(log.message, "test message");
                }
                other => panic!("Expected Log event for {sev}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_addrmap_event() {
        match parse_event(
            "ADDRMAP",
            "www.example.com 1.2.3.4 \"2024-01-01 12:00:00\" EXPIRES=\"2024-01-01 11:00:00\"",
        ) {
            Event::AddressMap(map) => {
                assert_eq!(map.original, "www.example.com");
                assert_eq!(map.new, "1.2.3.4");
                assert_eq!(map.expiry.as_deref(), Some("2024-01-01 12:00:00"));
            }
            other => panic!("Expected AddressMap event, got {other:?}"),
        }

        match parse_event("ADDRMAP", "bad.example <error> NEVER error=yes") {
            Event::AddressMap(map) => {
                assert_eq!(map.expiry, None);
                assert_eq!(map.error.as_deref(), Some("yes"));
            }
            other => panic!("Expected AddressMap event, got {other:?}"),
        }
    }

    #[test]
    fn test_status_event() {
        let event = event(
            "650 STATUS_CLIENT NOTICE BOOTSTRAP PROGRESS=100 TAG=done SUMMARY=\"Done\"\r\n",
        );
        assert_eq!(event.event_type(), Some(EventType::StatusClient));
        match event {
            Event::Status(status) => {
                assert_eq!(status.severity, StatusSeverity::Notice);
                assert_eq!(status.action, "BOOTSTRAP");
                assert_eq!(status.arguments.get("PROGRESS").map(String::as_str), Some("100"));
                assert_eq!(status.arguments.get("SUMMARY").map(String::as_str), Some("Done"));
            }
            other => panic!("Expected Status event, got {other:?}"),
        }
    }

    #[test]
    fn test_guard_event() {
        match parse_event("GUARD", &format!("ENTRY ${FP_A}~Guard UP")) {
            Event::Guard(guard) => {
                assert_eq!(guard.guard_type, "ENTRY");
                assert_eq!(guard.relay.nickname(), Some("Guard"));
                assert_eq!(guard.status, "UP");
            }
            other => panic!("Expected Guard event, got {other:?}"),
        }
    }

    #[test]
    fn test_stream_bw_event() {
        assert_eq!(
            parse_event("STREAM_BW", "2 100 200"),
            Event::StreamBandwidth(StreamBandwidthEvent {
                stream_id: StreamId(2),
                bytes_written: 100,
                bytes_read: 200
            })
        );
    }

    #[test]
    fn test_buildtimeout_event() {
        match parse_event("BUILDTIMEOUT_SET", "COMPUTED TOTAL_TIMES=124 TIMEOUT_MS=9019 XM=1375") {
            Event::BuildTimeoutSet(timeout) => {
                assert_eq!(timeout.set_type, "COMPUTED");
                assert_eq!(timeout.total_times, Some(124));
                assert_eq!(timeout.timeout_ms, Some(9019));
            }
            other => panic!("Expected BuildTimeoutSet event, got {other:?}"),
        }
    }

    #[test]
    fn test_hs_desc_event() {
        let text = format!("FAILED ajhb7kljbiru65qo NO_AUTH ${FP_A}~Dir b3oeducbhjmbqmgw2i3jtz4fekkrinwj REASON=NOT_FOUND");
        match parse_event("HS_DESC", &text) {
            Event::HsDescriptor(desc) => {
                assert_eq!(desc.action, "FAILED");
                assert_eq!(desc.address, "ajhb7kljbiru65qo");
                assert_eq!(
                    desc.descriptor_id.as_deref(),
                    Some("b3oeducbhjmbqmgw2i3jtz4fekkrinwj")
                );
                assert_eq!(desc.reason.as_deref(), Some("NOT_FOUND"));
            }
            other => panic!("Expected HsDescriptor event, got {other:?}"),
        }
    }

    #[test]
    fn test_network_liveness() {
        assert_eq!(parse_event("NETWORK_LIVENESS", "UP"), Event::NetworkLiveness(true));
        assert_eq!(parse_event("NETWORK_LIVENESS", "DOWN"), Event::NetworkLiveness(false));
    }

    #[test]
    fn test_conf_changed_multi_line() {
        let event = event("650-CONF_CHANGED\r\n650-SocksPort=9100\r\n650-ExitPolicy\r\n650 OK\r\n");
        assert_eq!(
            event,
            Event::ConfigChanged(vec![
                ("SocksPort".to_string(), Some("9100".to_string())),
                ("ExitPolicy".to_string(), None),
            ])
        );
    }

    #[test]
    fn test_ns_event_data_block() {
        let raw = "650+NS\r\n\
            r moria1 lpXfw1/+uGEym58asExGOXAgzjE 6ogpXh9QZM1CIu4TOWebTmn96Lg 2024-01-01 12:00:00 128.31.0.34 9101 9131\r\n\
            s Fast Running\r\n\
            .\r\n\
            650 OK\r\n";
        match event(raw) {
            Event::NetworkStatus(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].nickname, "moria1");
                assert!(entries[0].has_flag("Running"));
            }
            other => panic!("Expected NetworkStatus event, got {other:?}"),
        }
    }

    #[test]
    fn test_newdesc_event() {
        match parse_event("NEWDESC", &format!("${FP_A}~relay1 moria1")) {
            Event::NewDescriptors(relays) => assert_eq!(relays.len(), 2),
            other => panic!("Expected NewDescriptors event, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event() {
        let event = event("650 TOTALLY_UNKNOWN_EVENT some data\r\n");
        assert_eq!(event.event_type(), None);
        match event {
            Event::Unknown { event_type, data } => {
                assert_eq!(event_type, "TOTALLY_UNKNOWN_EVENT");
                assert_eq!(data, "some data");
            }
            other => panic!("Expected Unknown event, got {other:?}"),
        }
    }

    #[test]
    fn test_known_but_undecoded_category() {
        let event = event("650 PT_LOG PT=/usr/bin/obfs4proxy SEVERITY=notice MESSAGE=\"Connected\"\r\n");
        assert!(matches!(event, Event::Unknown { .. }));
        assert_eq!(event.event_type(), Some(EventType::PtLog));
    }

    #[test]
    fn test_every_category_round_trips_its_keyword() {
        for category in EventType::ALL {
            assert_eq!(EventType::from_str(category.as_str()).unwrap(), category);
        }
        assert_eq!(EventType::from_str("tb_empty").unwrap(), EventType::TbEmpty);
    }

    #[test]
    fn test_circ_minor_event() {
        let raw = "650 CIRC_MINOR 7 PURPOSE_CHANGED \
                   $67B2BDA4264D8A189D9270E28B1D30A262838243~europa1 \
                   BUILD_FLAGS=IS_INTERNAL,NEED_CAPACITY PURPOSE=MEASURE_TIMEOUT \
                   TIME_CREATED=2012-12-03T16:45:33.409602 OLD_PURPOSE=TESTING\r\n";
        let Event::CircuitMinor(minor) = event(raw) else {
            panic!("Expected CIRC_MINOR to decode");
        };
        assert_eq!(minor.id, CircuitId(7));
        assert_eq!(minor.event, "PURPOSE_CHANGED");
        assert_eq!(minor.path.len(), 1);
        assert_eq!(minor.path[0].nickname(), Some("europa1"));
        assert_eq!(minor.build_flags, vec!["IS_INTERNAL", "NEED_CAPACITY"]);
        assert_eq!(minor.purpose, Some(CircuitPurpose::MeasureTimeout));
        assert_eq!(minor.old_purpose, Some(CircuitPurpose::Testing));
        assert_eq!(minor.time_created.as_deref(), Some("2012-12-03T16:45:33.409602"));
        assert_eq!(minor.hs_state, None);

        let bad_time = raw.replace("2012-12-03T16:45:33.409602", "20121203T164533409602");
        assert!(matches!(event(&bad_time), Event::Unknown { .. }));
        let bad_id = raw.replace("CIRC_MINOR 7", "CIRC_MINOR toolong8901234567");
        assert!(matches!(event(&bad_id), Event::Unknown { .. }));
    }

    #[test]
    fn test_circ_bw_event() {
        assert_eq!(
            event("650 CIRC_BW ID=11 READ=272 WRITTEN=817\r\n"),
            Event::CircuitBandwidth(CircuitBandwidthEvent {
                id: CircuitId(11),
                bytes_read: 272,
                bytes_written: 817,
            })
        );
        assert!(matches!(
            event("650 CIRC_BW ID=11 READ=272 WRITTEN=817.7\r\n"),
            Event::Unknown { .. }
        ));
        assert!(matches!(
            event("650 CIRC_BW READ=272 WRITTEN=817\r\n"),
            Event::Unknown { .. }
        ));
    }

    #[test]
    fn test_conn_bw_event() {
        let conn = event("650 CONN_BW ID=11 TYPE=DIR READ=272 WRITTEN=817\r\n");
        assert_eq!(conn.event_type(), Some(EventType::ConnBw));
        assert_eq!(
            conn,
            Event::ConnectionBandwidth(ConnectionBandwidthEvent {
                conn_id: 11,
                conn_type: "DIR".to_string(),
                bytes_read: 272,
                bytes_written: 817,
            })
        );
        assert!(matches!(
            event("650 CONN_BW TYPE=DIR READ=272 WRITTEN=817\r\n"),
            Event::Unknown { .. }
        ));
    }

    #[test]
    fn test_clients_seen_event() {
        let raw = "650 CLIENTS_SEEN TimeStarted=\"2008-12-25 23:50:43\" \
                   CountrySummary=us=16,de=8,uk=8 IPVersions=v4=16,v6=40\r\n";
        let Event::ClientsSeen(seen) = event(raw) else {
            panic!("Expected CLIENTS_SEEN to decode");
        };
        assert_eq!(seen.time_started, "2008-12-25 23:50:43");
        assert_eq!(seen.locales.len(), 3);
        assert_eq!(seen.locales["us"], 16);
        assert_eq!(seen.locales["uk"], 8);
        assert_eq!(seen.ip_versions["v6"], 40);

        for malformed in [
            "CountrySummary=us:16,de:8,uk:8",
            "CountrySummary=usa=16,unitedkingdom=8",
            "CountrySummary=us=16,de=8,uk=eight",
            "CountrySummary=au=16,au=8,au=8",
        ] {
            let raw = raw.replace("CountrySummary=us=16,de=8,uk=8", malformed);
            assert!(matches!(event(&raw), Event::Unknown { .. }), "{malformed}");
        }
        let raw = raw.replace("IPVersions=v4=16,v6=40", "IPVersions=v4=sixteen,v6=40");
        assert!(matches!(event(&raw), Event::Unknown { .. }));
    }

    #[test]
    fn test_tb_empty_event() {
        assert_eq!(
            event("650 TB_EMPTY ORCONN ID=16 READ=0 WRITTEN=0 LAST=100\r\n"),
            Event::TokenBucketEmpty(TokenBucketEmptyEvent {
                bucket: "ORCONN".to_string(),
                conn_id: Some(16),
                read_ms: 0,
                written_ms: 0,
                last_ms: 100,
            })
        );

        let Event::TokenBucketEmpty(global) = event("650 TB_EMPTY GLOBAL READ=93 WRITTEN=93 LAST=100\r\n")
        else {
            panic!("Expected TB_EMPTY to decode");
        };
        assert_eq!(global.bucket, "GLOBAL");
        assert_eq!(global.conn_id, None);

        assert!(matches!(
            event("650 TB_EMPTY GLOBAL READ=93 WRITTEN=blarg LAST=100\r\n"),
            Event::Unknown { .. }
        ));
        assert!(matches!(
            event("650 TB_EMPTY GLOBAL READ=93 WRITTEN=93 LAST=-100\r\n"),
            Event::Unknown { .. }
        ));
    }

    #[test]
    fn test_cell_stats_event() {
        let raw = "650 CELL_STATS ID=14 OutboundQueue=19403 OutboundConn=15 \
                   OutboundAdded=create_fast:1,relay_early:2 \
                   OutboundRemoved=create_fast:1,relay_early:2 \
                   OutboundTime=create_fast:0,relay_early:0\r\n";
        let Event::CellStats(stats) = event(raw) else {
            panic!("Expected CELL_STATS to decode");
        };
        assert_eq!(stats.id, Some(CircuitId(14)));
        assert_eq!(stats.inbound_queue, None);
        assert_eq!(stats.inbound_added, None);
        assert_eq!(stats.outbound_queue.as_deref(), Some("19403"));
        assert_eq!(stats.outbound_connection.as_deref(), Some("15"));
        let added = stats.outbound_added.unwrap();
        assert_eq!(added["create_fast"], 1);
        assert_eq!(added["relay_early"], 2);
        assert_eq!(stats.outbound_time.unwrap()["relay_early"], 0);

        let Event::CellStats(relayed) =
            event("650 CELL_STATS InboundQueue=19403 InboundConn=32 InboundAdded=relay:1,created_fast:1\r\n")
        else {
            panic!("Expected CELL_STATS to decode");
        };
        assert_eq!(relayed.id, None);
        assert_eq!(relayed.inbound_added.unwrap()["created_fast"], 1);

        for malformed in [
            "OutboundAdded=create_fast:-1,relay_early:2",
            "OutboundAdded=create_fast:arg,relay_early:-2",
            "OutboundAdded=create_fast!:1,relay_early:-2",
        ] {
            let raw = format!("650 CELL_STATS {malformed}\r\n");
            assert!(matches!(event(&raw), Event::Unknown { .. }), "{malformed}");
        }
    }

    #[test]
    fn test_transport_launched_event() {
        assert_eq!(
            event("650 TRANSPORT_LAUNCHED server obfs1 127.0.0.1 1111\r\n"),
            Event::TransportLaunched(TransportLaunchedEvent {
                transport_type: "server".to_string(),
                name: "obfs1".to_string(),
                address: IpAddr::from([127, 0, 0, 1]),
                port: 1111,
            })
        );

        for malformed in [
            "unicorn obfs1 127.0.0.1 1111",
            "server obfs1 127.0.x.y 1111",
            "server obfs1 127.0.0.1 my_port",
        ] {
            let raw = format!("650 TRANSPORT_LAUNCHED {malformed}\r\n");
            assert!(matches!(event(&raw), Event::Unknown { .. }), "{malformed}");
        }
    }

    #[test]
    fn test_status_severity_parsing() {
        assert_eq!(StatusSeverity::from_str("WARN").unwrap(), StatusSeverity::Warn);
        assert!(StatusSeverity::from_str("UNKNOWN").is_err());
    }
}
