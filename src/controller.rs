//! The control connection handle.
//!
//! [`Controller`] owns the write half of the socket and the dispatch task
//! reading the other half. Any number of tasks may issue commands through a
//! shared `&Controller`; each command is queued and written under one lock,
//! then awaits its own reply slot. Dropping the handle stops the dispatch
//! task and fails whatever is still pending.

use crate::auth::{
    check_cookie_length, classify_rejection, compute_client_hash, failure_specificity,
    format_cookie_hex, generate_client_nonce, parse_authchallenge_response, read_cookie_file,
    verify_server_hash, AuthCredential, AuthMethod, AuthState, ProtocolInfo,
};
use crate::config::TorControlConfig;
use crate::dispatch::{run_loop, LoopState, Shared};
use crate::error::{AuthFailure, Result, TorControlError};
use crate::events::{Event, EventType};
use crate::protocol::{
    format_command, format_command_with_data, format_message, quote_string, split_key_value, Reply,
};
use crate::registry::{ConnectionStatus, ListenerId};
use crate::transport::{self, LineReader, LineWriter};
use crate::types::*;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A connection to Tor's control port.
pub struct Controller {
    shared: Arc<Shared>,
    writer: AsyncMutex<LineWriter>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    events_lock: AsyncMutex<()>,
    protocol_info: Mutex<Option<ProtocolInfo>>,
    command_timeout: Duration,
}

impl Controller {
    /// Connect to the configured control port.
    ///
    /// When the configuration carries a credential other than
    /// [`AuthCredential::None`] the connection is authenticated before it
    /// is returned; otherwise call [`authenticate`](Self::authenticate) or
    /// [`auto_authenticate`](Self::auto_authenticate).
    pub async fn open(config: TorControlConfig) -> Result<Self> {
        config.validate()?;
        debug!("Connecting to Tor control port at {}", config.address);

        let (reader, writer) = tokio::time::timeout(
            config.connect_timeout,
            transport::connect(&config.address, config.max_line_length),
        )
        .await
        .map_err(|_| TorControlError::Timeout)??;

        let controller = Self::from_parts(reader, writer, &config);
        if config.auth != AuthCredential::None {
            controller.authenticate(&config.auth).await?;
        }
        Ok(controller)
    }

    /// Run the control protocol over an already connected stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_stream<S>(stream: S, config: &TorControlConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = transport::split(stream, config.max_line_length);
        Self::from_parts(reader, writer, config)
    }

    fn from_parts(reader: LineReader, writer: LineWriter, config: &TorControlConfig) -> Self {
        let shared = Arc::new(Shared::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(reader, Arc::clone(&shared), shutdown_rx));

        Self {
            shared,
            writer: AsyncMutex::new(writer),
            shutdown,
            task: Mutex::new(Some(task)),
            events_lock: AsyncMutex::new(()),
            protocol_info: Mutex::new(None),
            command_timeout: config.command_timeout,
        }
    }

    // ==================== Connection state ====================

    /// Whether the dispatch loop is still running.
    pub fn is_alive(&self) -> bool {
        self.shared.loop_state() == LoopState::Running
    }

    /// State of the dispatch loop.
    pub fn loop_state(&self) -> LoopState {
        self.shared.loop_state()
    }

    /// Commands written and still waiting for their reply.
    pub fn pending_commands(&self) -> usize {
        self.shared.pending_count()
    }

    /// Current authentication state.
    pub fn auth_state(&self) -> AuthState {
        self.shared.auth_state()
    }

    /// Whether the daemon accepted our credentials.
    pub fn is_authenticated(&self) -> bool {
        self.auth_state() == AuthState::Authenticated
    }

    /// Close the connection and wait for the dispatch loop to finish.
    /// Pending commands fail with [`TorControlError::ConnectionClosed`].
    pub async fn close(&self) -> Result<()> {
        self.shutdown.send_replace(true);

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Dispatch task ended abnormally: {}", e);
            }
        }

        let finish = async {
            let mut writer = self.writer.lock().await;
            writer.shutdown().await
        };
        match tokio::time::timeout(self.command_timeout, finish).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Ignoring error while shutting down writer: {}", e),
            Err(_) => debug!(
                "Writer still busy after {:?}, not shutting it down",
                self.command_timeout
            ),
        }
        Ok(())
    }

    // ==================== Raw commands ====================

    /// Send a command and wait up to `timeout` for its reply.
    ///
    /// The reply is returned whatever its status code; use
    /// [`Reply::into_result`] to turn failures into errors. A command that
    /// times out keeps its place in the queue and its late reply is
    /// discarded.
    ///
    /// The timeout covers waiting for the writer as well as the reply. A
    /// command that cannot be fully written in time closes the connection,
    /// since the daemon may have received part of it.
    pub async fn send_and_wait(&self, command: &str, timeout: Duration) -> Result<Reply> {
        format_message(command)?;
        let deadline = deadline_after(timeout);

        let slot = {
            let mut writer = tokio::time::timeout_at(deadline, self.writer.lock())
                .await
                .map_err(|_| {
                    debug!("Writer still busy after {:?}", timeout);
                    TorControlError::Timeout
                })?;
            let (id, slot) = self.shared.enqueue(command)?;
            let mut write = InFlightWrite::new(self, id);
            match tokio::time::timeout_at(deadline, writer.send(command)).await {
                Ok(Ok(())) => write.complete(),
                Ok(Err(e)) => {
                    debug!("Write of command #{} failed: {}", id, e);
                    return Err(e);
                }
                Err(_) => {
                    debug!("Write of command #{} stalled for {:?}", id, timeout);
                    return Err(TorControlError::Timeout);
                }
            }
            slot
        };

        match tokio::time::timeout_at(deadline, slot).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TorControlError::ConnectionClosed),
            Err(_) => {
                debug!("No reply within {:?}", timeout);
                Err(TorControlError::Timeout)
            }
        }
    }

    /// Send a command with the configured command timeout.
    pub async fn msg(&self, command: &str) -> Result<Reply> {
        self.send_and_wait(command, self.command_timeout).await
    }

    async fn command(&self, command: &str) -> Result<Reply> {
        self.msg(command).await?.into_result()
    }

    // ==================== Authentication ====================

    /// Query PROTOCOLINFO. The answer is cached, as Tor only answers it once
    /// before authentication.
    pub async fn protocol_info(&self) -> Result<ProtocolInfo> {
        let cached = self.protocol_info.lock().clone();
        if let Some(info) = cached {
            return Ok(info);
        }

        let reply = self.command("PROTOCOLINFO 1").await?;
        let info = ProtocolInfo::from_reply(&reply)?;
        *self.protocol_info.lock() = Some(info.clone());
        Ok(info)
    }

    /// Authenticate with the given credential.
    pub async fn authenticate(&self, credential: &AuthCredential) -> Result<()> {
        if self.auth_state() == AuthState::Closed {
            return Err(TorControlError::ConnectionClosed);
        }

        debug!("Authenticating with {}", credential.method().as_str());
        self.shared.set_auth_state(AuthState::Authenticating);

        if let Err(e) = self.authenticate_with(credential).await {
            self.shared.set_auth_state(AuthState::Unauthenticated);
            return Err(e);
        }

        self.shared.set_auth_state(AuthState::Authenticated);
        self.shared
            .registry
            .notify_status(&ConnectionStatus::Authenticated);
        debug!("Authentication successful");

        if !self.shared.registry.subscribed_categories().is_empty() {
            let _guard = self.events_lock.lock().await;
            self.sync_events().await?;
        }
        Ok(())
    }

    async fn authenticate_with(&self, credential: &AuthCredential) -> Result<()> {
        match credential {
            AuthCredential::None => {
                self.send_authenticate(AuthMethod::Null, "AUTHENTICATE".to_string())
                    .await
            }
            AuthCredential::Password(password) => {
                let hex = hex::encode_upper(password.as_bytes());
                self.send_authenticate(AuthMethod::HashedPassword, format!("AUTHENTICATE {}", hex))
                    .await
            }
            AuthCredential::CookieFile(path) => {
                let cookie = read_cookie_file(path)?;
                self.send_authenticate(
                    AuthMethod::Cookie,
                    format!("AUTHENTICATE {}", format_cookie_hex(&cookie)),
                )
                .await
            }
            AuthCredential::CookieData(cookie) => {
                check_cookie_length(cookie, "cookie data")?;
                self.send_authenticate(
                    AuthMethod::Cookie,
                    format!("AUTHENTICATE {}", format_cookie_hex(cookie)),
                )
                .await
            }
            AuthCredential::SafeCookie { cookie_path } => self.authenticate_safecookie(cookie_path).await,
        }
    }

    async fn authenticate_safecookie(&self, cookie_path: &Path) -> Result<()> {
        let cookie = read_cookie_file(cookie_path)?;
        let client_nonce = generate_client_nonce();

        let reply = self
            .msg(&format!(
                "AUTHCHALLENGE SAFECOOKIE {}",
                hex::encode_upper(client_nonce)
            ))
            .await?
            .into_result()
            .map_err(|e| match e {
                TorControlError::CommandRejected { message, .. } => {
                    TorControlError::auth(AuthFailure::Rejected, message)
                }
                other => other,
            })?;

        let challenge = parse_authchallenge_response(reply.first_line())?;
        verify_server_hash(&cookie, &client_nonce, &challenge)?;

        let client_hash = compute_client_hash(&cookie, &client_nonce, &challenge.server_nonce)?;
        self.send_authenticate(
            AuthMethod::SafeCookie,
            format!("AUTHENTICATE {}", hex::encode_upper(client_hash)),
        )
        .await
    }

    async fn send_authenticate(&self, method: AuthMethod, command: String) -> Result<()> {
        match self.msg(&command).await?.into_result() {
            Ok(_) => Ok(()),
            Err(TorControlError::CommandRejected { message, .. })
            | Err(TorControlError::AuthenticationRequired(message)) => Err(TorControlError::auth(
                classify_rejection(method, &message),
                message,
            )),
            Err(e) => Err(e),
        }
    }

    /// Authenticate with the best method the daemon offers.
    ///
    /// Tries NULL, then SAFECOOKIE and COOKIE with the daemon's cookie file,
    /// then the password if one is given. When every attempt fails the most
    /// specific failure is returned. Tor drops the connection after a
    /// rejected AUTHENTICATE, so a rejection also ends the search.
    pub async fn auto_authenticate(&self, password: Option<&str>) -> Result<()> {
        let info = self.protocol_info().await?;

        let mut candidates = Vec::new();
        if info.supports_null() {
            candidates.push(AuthCredential::None);
        }
        if let Some(cookie) = &info.cookie_file {
            if info.supports_safe_cookie() {
                candidates.push(AuthCredential::safe_cookie(cookie.clone()));
            }
            if info.supports_cookie() {
                candidates.push(AuthCredential::cookie_file(cookie.clone()));
            }
        }
        if let (true, Some(password)) = (info.supports_password(), password) {
            candidates.push(AuthCredential::password(password));
        }

        if candidates.is_empty() {
            return Err(if info.supports_password() {
                TorControlError::auth(
                    AuthFailure::MissingCredentials,
                    "Tor requires a password and none was supplied",
                )
            } else {
                TorControlError::auth(
                    AuthFailure::UnsupportedMethod,
                    format!(
                        "No usable authentication method (offered: {:?}, unknown: {:?})",
                        info.auth_methods, info.unknown_auth_methods
                    ),
                )
            });
        }

        let mut best: Option<(AuthFailure, TorControlError)> = None;
        for credential in candidates {
            let error = match self.authenticate(&credential).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            let Some(reason) = error.auth_failure() else {
                return Err(error);
            };
            debug!("{} authentication failed: {}", credential.method().as_str(), error);

            let more_specific = best
                .as_ref()
                .map_or(true, |(current, _)| failure_specificity(reason) > failure_specificity(*current));
            if more_specific {
                best = Some((reason, error));
            }
            if !self.is_alive() {
                break;
            }
        }

        Err(best.map_or(TorControlError::ConnectionClosed, |(_, error)| error))
    }

    // ==================== Event listeners ====================

    /// Register a listener for one event category and subscribe to it.
    ///
    /// Before authentication the subscription is only recorded; SETEVENTS is
    /// issued once authentication succeeds.
    pub async fn add_event_listener<F>(&self, category: EventType, callback: F) -> Result<ListenerId>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let _guard = self.events_lock.lock().await;
        let already_subscribed = self
            .shared
            .registry
            .subscribed_categories()
            .contains(&category);
        let id = self.shared.registry.add_listener(category, callback);

        if !already_subscribed {
            if let Err(e) = self.sync_events().await {
                self.shared.registry.remove_listener(id);
                return Err(e);
            }
        }
        Ok(id)
    }

    /// Remove a listener, unsubscribing from its category when it was the
    /// last one. Returns `false` for an unknown id.
    pub async fn remove_event_listener(&self, id: ListenerId) -> Result<bool> {
        let _guard = self.events_lock.lock().await;
        let before = self.shared.registry.subscribed_categories();
        if !self.shared.registry.remove_listener(id) {
            return Ok(false);
        }

        if self.shared.registry.subscribed_categories() != before {
            self.sync_events().await?;
        }
        Ok(true)
    }

    /// Register a listener for connection state changes.
    pub fn add_status_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        self.shared.registry.add_status_listener(callback)
    }

    /// Remove a connection state listener.
    pub fn remove_status_listener(&self, id: ListenerId) -> bool {
        self.shared.registry.remove_status_listener(id)
    }

    /// Categories with at least one listener.
    pub fn subscribed_events(&self) -> Vec<EventType> {
        self.shared.registry.subscribed_categories()
    }

    // Callers hold `events_lock` so SETEVENTS goes out in registry order.
    async fn sync_events(&self) -> Result<()> {
        if !self.is_authenticated() {
            return Ok(());
        }

        let categories = self.shared.registry.subscribed_categories();
        let names: Vec<&str> = categories.iter().map(|c| c.as_str()).collect();
        self.command(&format_command("SETEVENTS", &names)).await?;
        Ok(())
    }

    // ==================== Information ====================

    /// Get one GETINFO value. Multi-line values come from the data block.
    pub async fn get_info(&self, key: &str) -> Result<String> {
        let mut values = self.get_info_multi(&[key]).await?;
        values.remove(key).ok_or_else(|| {
            TorControlError::Parse(format!("Key '{}' not found in GETINFO reply", key))
        })
    }

    /// Get several GETINFO values at once.
    pub async fn get_info_multi(&self, keys: &[&str]) -> Result<HashMap<String, String>> {
        check_keys(keys)?;
        let reply = self.command(&format_command("GETINFO", keys)).await?;

        let mut values = HashMap::new();
        for line in &reply.lines {
            if line.is_end() && line.text == "OK" {
                continue;
            }
            let (key, value) = split_key_value(&line.text).ok_or_else(|| {
                TorControlError::Parse(format!("GETINFO line is not key=value: '{}'", line.text))
            })?;
            let value = line.data.clone().unwrap_or_else(|| value.to_string());
            values.insert(key.to_string(), value);
        }
        Ok(values)
    }

    /// Get the Tor version.
    pub async fn get_version(&self) -> Result<TorVersion> {
        TorVersion::from_str(&self.get_info("version").await?)
    }

    // ==================== Configuration ====================

    /// Get a configuration value. `None` when the option is unset.
    pub async fn get_conf(&self, key: &str) -> Result<Option<String>> {
        let values = self.get_conf_multi(&[key]).await?;
        Ok(values
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .and_then(|(_, mut values)| (!values.is_empty()).then(|| values.remove(0))))
    }

    /// Get several configuration values. Options that may appear more than
    /// once (e.g. `ExitPolicy`) accumulate every value; unset options map to
    /// an empty list.
    pub async fn get_conf_multi(&self, keys: &[&str]) -> Result<HashMap<String, Vec<String>>> {
        check_keys(keys)?;
        let reply = self.command(&format_command("GETCONF", keys)).await?;

        let mut values: HashMap<String, Vec<String>> = HashMap::new();
        for line in &reply.lines {
            match split_key_value(&line.text) {
                Some((key, value)) => values
                    .entry(key.to_string())
                    .or_default()
                    .push(value.to_string()),
                None => {
                    values.entry(line.text.clone()).or_default();
                }
            }
        }
        Ok(values)
    }

    /// Set a configuration value.
    pub async fn set_conf(&self, key: &str, value: &str) -> Result<()> {
        self.set_conf_multi(&[(key, value)]).await
    }

    /// Set multiple configuration values atomically.
    pub async fn set_conf_multi(&self, settings: &[(&str, &str)]) -> Result<()> {
        let keys: Vec<&str> = settings.iter().map(|(key, _)| *key).collect();
        check_keys(&keys)?;

        let args: Vec<String> = settings
            .iter()
            .map(|(key, value)| format!("{}={}", key, quote_string(value)))
            .collect();
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.command(&format_command("SETCONF", &arg_refs)).await?;
        Ok(())
    }

    /// Reset a configuration value to its default.
    pub async fn reset_conf(&self, key: &str) -> Result<()> {
        check_keys(&[key])?;
        self.command(&format_command("RESETCONF", &[key])).await?;
        Ok(())
    }

    /// Save configuration to the torrc.
    pub async fn save_conf(&self, force: bool) -> Result<()> {
        let args: &[&str] = if force { &["FORCE"] } else { &[] };
        self.command(&format_command("SAVECONF", args)).await?;
        Ok(())
    }

    /// Replace the running configuration with the given torrc text.
    pub async fn load_conf(&self, config_text: &str) -> Result<()> {
        self.command(&format_command_with_data("LOADCONF", &[], config_text))
            .await?;
        Ok(())
    }

    // ==================== Signals ====================

    /// Send a signal to Tor.
    pub async fn signal(&self, signal: Signal) -> Result<()> {
        self.command(&format_command("SIGNAL", &[signal.as_str()]))
            .await?;
        Ok(())
    }

    /// Request a new identity (new circuits).
    pub async fn new_identity(&self) -> Result<()> {
        self.signal(Signal::NewNym).await
    }

    /// Clear the DNS cache.
    pub async fn clear_dns_cache(&self) -> Result<()> {
        self.signal(Signal::ClearDnsCache).await
    }

    // ==================== Circuits and streams ====================

    /// Snapshot of every circuit Tor knows about.
    pub async fn get_circuits(&self) -> Result<Vec<Circuit>> {
        let status = self.get_info("circuit-status").await?;
        status
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(Circuit::parse)
            .collect()
    }

    /// Snapshot of one circuit.
    pub async fn get_circuit(&self, id: CircuitId) -> Result<Circuit> {
        self.get_circuits()
            .await?
            .into_iter()
            .find(|circuit| circuit.id == id)
            .ok_or_else(|| {
                TorControlError::InvalidArgument(format!("Tor has no circuit with id {}", id))
            })
    }

    /// Snapshot of every stream Tor knows about.
    pub async fn get_streams(&self) -> Result<Vec<StreamInfo>> {
        let status = self.get_info("stream-status").await?;
        status
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(StreamInfo::parse)
            .collect()
    }

    /// Build a new circuit, or extend an existing one, through `path`.
    /// An empty path lets Tor pick the relays.
    pub async fn extend_circuit(
        &self,
        circuit_id: Option<CircuitId>,
        path: &[ServerSpec],
        purpose: Option<CircuitPurpose>,
    ) -> Result<CircuitId> {
        let mut args = vec![circuit_id.map_or(0, |id| id.0).to_string()];
        if !path.is_empty() {
            let hops: Vec<String> = path.iter().map(ServerSpec::to_string).collect();
            args.push(hops.join(","));
        }
        if let Some(purpose) = purpose {
            args.push(format!("purpose={}", purpose.to_string().to_lowercase()));
        }

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let reply = self.command(&format_command("EXTENDCIRCUIT", &arg_refs)).await?;

        let text = reply.first_line();
        text.strip_prefix("EXTENDED ")
            .and_then(|id| id.trim().parse().ok())
            .map(CircuitId)
            .ok_or_else(|| TorControlError::Parse(format!("Unexpected EXTENDCIRCUIT reply: '{}'", text)))
    }

    /// Close a circuit.
    pub async fn close_circuit(&self, circuit_id: CircuitId, if_unused: bool) -> Result<()> {
        let id = circuit_id.to_string();
        let mut args = vec![id.as_str()];
        if if_unused {
            args.push("IfUnused");
        }
        self.command(&format_command("CLOSECIRCUIT", &args)).await?;
        Ok(())
    }

    /// Attach a stream to a circuit. Circuit id 0 hands the stream back to
    /// Tor.
    pub async fn attach_stream(&self, stream_id: StreamId, circuit_id: CircuitId) -> Result<()> {
        let stream = stream_id.to_string();
        let circuit = circuit_id.to_string();
        self.command(&format_command("ATTACHSTREAM", &[&stream, &circuit]))
            .await?;
        Ok(())
    }

    /// Close a stream with a RELAY_END reason code.
    pub async fn close_stream(&self, stream_id: StreamId, reason: u8) -> Result<()> {
        let stream = stream_id.to_string();
        let reason = reason.to_string();
        self.command(&format_command("CLOSESTREAM", &[&stream, &reason]))
            .await?;
        Ok(())
    }

    /// Map addresses. Returns the mappings Tor accepted, which differ from
    /// the request when Tor picked a virtual address.
    pub async fn map_address(&self, mappings: &[(&str, &str)]) -> Result<HashMap<String, String>> {
        if mappings.is_empty() {
            return Err(TorControlError::InvalidArgument(
                "MAPADDRESS needs at least one mapping".to_string(),
            ));
        }

        let args: Vec<String> = mappings
            .iter()
            .map(|(from, to)| format!("{}={}", from, to))
            .collect();
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let reply = self.command(&format_command("MAPADDRESS", &arg_refs)).await?;

        Ok(reply
            .lines
            .iter()
            .filter_map(|line| split_key_value(&line.text))
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect())
    }

    /// Forget all guard nodes.
    pub async fn drop_guards(&self) -> Result<()> {
        self.command("DROPGUARDS").await?;
        Ok(())
    }

    // ==================== Relays ====================

    /// Consensus entry of a relay, by fingerprint or nickname.
    pub async fn get_network_status(&self, relay: &str) -> Result<NetworkStatusEntry> {
        let document = self.get_info(&relay_query("ns", relay)?).await?;
        NetworkStatusEntry::parse(&document)
    }

    /// Every consensus entry Tor holds.
    pub async fn get_network_statuses(&self) -> Result<Vec<NetworkStatusEntry>> {
        NetworkStatusEntry::parse_all(&self.get_info("ns/all").await?)
    }

    /// Server descriptor of a relay, by fingerprint or nickname.
    pub async fn get_relay_descriptor(&self, relay: &str) -> Result<RelayDescriptor> {
        let document = self.get_info(&relay_query("desc", relay)?).await?;
        RelayDescriptor::parse(&document)
    }

    // ==================== Onion services ====================

    /// Create an ephemeral onion service.
    ///
    /// `ports` maps virtual ports to optional targets. `key` is an existing
    /// `TYPE:BLOB` key, a new service key is generated when `None`.
    pub async fn add_onion(
        &self,
        ports: &[(u16, Option<&str>)],
        key: Option<&str>,
        flags: &[&str],
    ) -> Result<OnionService> {
        if ports.is_empty() {
            return Err(TorControlError::InvalidArgument(
                "ADD_ONION needs at least one port".to_string(),
            ));
        }

        let mut args = vec![key.unwrap_or("NEW:BEST").to_string()];
        if !flags.is_empty() {
            args.push(format!("Flags={}", flags.join(",")));
        }
        for (virt_port, target) in ports {
            match target {
                Some(target) => args.push(format!("Port={},{}", virt_port, target)),
                None => args.push(format!("Port={}", virt_port)),
            }
        }

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let reply = self.command(&format_command("ADD_ONION", &arg_refs)).await?;

        let mut service_id = None;
        let mut private_key = None;
        for line in &reply.lines {
            if let Some(id) = line.text.strip_prefix("ServiceID=") {
                service_id = Some(id.to_string());
            } else if let Some(key) = line.text.strip_prefix("PrivateKey=") {
                private_key = Some(key.to_string());
            }
        }

        let service_id = service_id
            .ok_or_else(|| TorControlError::Parse("ADD_ONION reply without ServiceID".to_string()))?;
        Ok(OnionService {
            address: OnionAddress::new(service_id),
            private_key,
        })
    }

    /// Delete an ephemeral onion service.
    pub async fn del_onion(&self, service_id: &str) -> Result<()> {
        check_keys(&[service_id])?;
        self.command(&format_command("DEL_ONION", &[service_id]))
            .await?;
        Ok(())
    }

    /// Send QUIT, then close the connection.
    pub async fn quit(&self) -> Result<()> {
        match self.msg("QUIT").await {
            Ok(_) | Err(TorControlError::ConnectionClosed) => {}
            Err(e) => debug!("QUIT failed: {}", e),
        }
        self.close().await
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

/// A command being written. Unless completed, dropping it removes the
/// command from the queue and closes the connection.
struct InFlightWrite<'a> {
    controller: &'a Controller,
    id: u64,
    done: bool,
}

impl<'a> InFlightWrite<'a> {
    fn new(controller: &'a Controller, id: u64) -> Self {
        Self {
            controller,
            id,
            done: false,
        }
    }

    fn complete(&mut self) {
        self.done = true;
    }
}

impl Drop for InFlightWrite<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.controller.shared.remove(self.id);
            debug!("Command #{} not fully written, closing connection", self.id);
            self.controller.shutdown.send_replace(true);
        }
    }
}

/// `timeout` from now, saturating far in the future.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(86400 * 365 * 30))
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("loop_state", &self.shared.loop_state())
            .field("auth_state", &self.shared.auth_state())
            .field("pending", &self.shared.pending_count())
            .field("registry", &self.shared.registry)
            .finish()
    }
}

/// Keys and ids are sent bare, so they must be single words.
fn check_keys(keys: &[&str]) -> Result<()> {
    if keys.is_empty() {
        return Err(TorControlError::InvalidArgument(
            "At least one key is required".to_string(),
        ));
    }
    for key in keys {
        if key.is_empty() || key.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(TorControlError::InvalidArgument(format!(
                "Invalid key '{}'",
                key.escape_default()
            )));
        }
    }
    Ok(())
}

/// Build `<prefix>/id/<fp>` or `<prefix>/name/<nickname>`.
fn relay_query(prefix: &str, relay: &str) -> Result<String> {
    let candidate = relay.strip_prefix('$').unwrap_or(relay);
    if candidate.len() == 40 && candidate.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(format!("{}/id/{}", prefix, candidate.to_uppercase()))
    } else if is_valid_nickname(relay) {
        Ok(format!("{}/name/{}", prefix, relay))
    } else {
        Err(TorControlError::InvalidArgument(format!(
            "'{}' is neither a relay fingerprint nor a nickname",
            relay
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::compute_server_hash;
    use crate::test_utils::{fixtures, mock_controller, mock_controller_with, MockDaemon};
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn authenticate_null(controller: &Controller, daemon: &mut MockDaemon) {
        let (result, _) = tokio::join!(
            controller.authenticate(&AuthCredential::None),
            daemon.respond("AUTHENTICATE", "250 OK\r\n"),
        );
        result.unwrap();
    }

    #[tokio::test]
    async fn test_get_version() {
        let (controller, mut daemon) = mock_controller();
        let (version, _) = tokio::join!(
            controller.get_version(),
            daemon.respond("GETINFO version", fixtures::version_response()),
        );

        let version = version.unwrap();
        assert_eq!((version.major, version.minor, version.micro, version.patch), (0, 4, 8, 12));
    }

    #[tokio::test]
    async fn test_concurrent_commands_get_their_own_replies() {
        let (controller, mut daemon) = mock_controller();

        let server = async {
            for _ in 0..3 {
                let command = daemon.read_command().await.unwrap().unwrap();
                let key = command.trim_start_matches("GETINFO ").to_string();
                daemon
                    .send(&format!("650 BW 1 1\r\n250-{key}=value-of-{key}\r\n250 OK\r\n"))
                    .await
                    .unwrap();
            }
        };
        let (a, b, c, _) = tokio::join!(
            controller.get_info("alpha"),
            controller.get_info("beta"),
            controller.get_info("gamma"),
            server,
        );

        assert_eq!(a.unwrap(), "value-of-alpha");
        assert_eq!(b.unwrap(), "value-of-beta");
        assert_eq!(c.unwrap(), "value-of-gamma");
    }

    #[tokio::test]
    async fn test_timed_out_command_does_not_shift_replies() {
        let (controller, mut daemon) = mock_controller();

        let (timed_out, _) = tokio::join!(
            controller.send_and_wait("GETINFO slow", Duration::from_millis(50)),
            daemon.expect("GETINFO slow"),
        );
        assert!(matches!(timed_out, Err(TorControlError::Timeout)));

        let (value, _) = tokio::join!(controller.get_info("version"), async {
            daemon.expect("GETINFO version").await;
            daemon
                .send("250-slow=late\r\n250 OK\r\n250-version=0.4.8.10\r\n250 OK\r\n")
                .await
                .unwrap();
        });
        assert_eq!(value.unwrap(), "0.4.8.10");
        assert!(controller.is_alive());
    }

    /// A controller whose daemon end never reads, so writes back up.
    fn stalled_controller() -> (Controller, tokio::io::DuplexStream) {
        let (client, daemon_end) = tokio::io::duplex(16);
        let config = TorControlConfig::new().command_timeout(Duration::from_millis(200));
        (Controller::from_stream(client, &config), daemon_end)
    }

    async fn wait_until_stopped(controller: &Controller) {
        for _ in 0..100 {
            if !controller.is_alive() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_stalled_write_times_out() {
        let (controller, _daemon_end) = stalled_controller();
        let large = format!("GETINFO {}", "a".repeat(20_000));

        let (first, second) = tokio::time::timeout(Duration::from_secs(2), async {
            tokio::join!(
                controller.send_and_wait(&large, Duration::from_millis(50)),
                async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    controller
                        .send_and_wait("GETINFO version", Duration::from_millis(50))
                        .await
                },
            )
        })
        .await
        .expect("commands stuck behind a stalled writer");

        assert!(matches!(first, Err(TorControlError::Timeout)));
        assert!(matches!(
            second,
            Err(TorControlError::Timeout) | Err(TorControlError::ConnectionClosed)
        ));
        assert_eq!(controller.pending_commands(), 0);

        // A partly written command leaves the connection unusable.
        wait_until_stopped(&controller).await;
        assert!(!controller.is_alive());
        assert_eq!(controller.auth_state(), AuthState::Closed);

        tokio::time::timeout(Duration::from_secs(2), controller.close())
            .await
            .expect("close blocked on the writer")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_write_closes_connection() {
        let (controller, _daemon_end) = stalled_controller();
        let large = format!("GETINFO {}", "a".repeat(20_000));

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), controller.msg(&large)).await;
        assert!(abandoned.is_err());
        assert_eq!(controller.pending_commands(), 0);

        wait_until_stopped(&controller).await;
        assert!(matches!(
            controller.get_info("version").await,
            Err(TorControlError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_unauthenticated_command_fails_fast() {
        let (controller, mut daemon) = mock_controller();
        let (result, _) = tokio::join!(
            controller.get_conf("ControlPort"),
            daemon.respond("GETCONF ControlPort", "514 Authentication required.\r\n"),
        );
        assert!(matches!(
            result,
            Err(TorControlError::AuthenticationRequired(_))
        ));
    }

    #[tokio::test]
    async fn test_command_with_newline_is_rejected_locally() {
        let (controller, _daemon) = mock_controller();
        let result = controller.msg("GETINFO version\r\nSIGNAL HALT").await;
        assert!(matches!(result, Err(TorControlError::InvalidArgument(_))));
        assert_eq!(controller.shared.pending_count(), 0);

        assert!(matches!(
            controller.get_info("version info").await,
            Err(TorControlError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_fails_pending_and_later_commands() {
        let (controller, mut daemon) = mock_controller();
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closed);
        controller.add_status_listener(move |status| {
            if matches!(status, ConnectionStatus::Closed { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let (result, _) = tokio::join!(controller.get_info("version"), async {
            daemon.expect("GETINFO version").await;
            drop(daemon);
        });
        assert!(matches!(result, Err(TorControlError::ConnectionClosed)));
        assert!(matches!(
            controller.get_info("version").await,
            Err(TorControlError::ConnectionClosed)
        ));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(controller.auth_state(), AuthState::Closed);
    }

    #[tokio::test]
    async fn test_close_stops_dispatch_loop() {
        let (controller, mut daemon) = mock_controller();
        controller.close().await.unwrap();

        assert!(!controller.is_alive());
        assert_eq!(daemon.read_command().await.unwrap(), None);
        assert!(matches!(
            controller.signal(Signal::NewNym).await,
            Err(TorControlError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_drop_releases_connection() {
        let (controller, mut daemon) = mock_controller();
        drop(controller);
        assert_eq!(daemon.read_command().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_protocol_info_is_cached() {
        let (controller, mut daemon) = mock_controller();
        let (info, _) = tokio::join!(
            controller.protocol_info(),
            daemon.respond("PROTOCOLINFO 1", fixtures::protocolinfo_response()),
        );
        let info = info.unwrap();
        assert_eq!(info.tor_version, "0.4.8.12");

        assert_eq!(controller.protocol_info().await.unwrap(), info);
    }

    #[tokio::test]
    async fn test_password_authentication_rejected() {
        let (controller, mut daemon) = mock_controller();
        let credential = AuthCredential::password("secret");
        let (result, _) = tokio::join!(
            controller.authenticate(&credential),
            daemon.respond(
                "AUTHENTICATE 736563726574",
                "515 Authentication failed: Password did not match HashedControlPassword value from configuration\r\n",
            ),
        );

        let err = result.unwrap_err();
        assert_eq!(err.auth_failure(), Some(AuthFailure::IncorrectPassword));
        assert_eq!(controller.auth_state(), AuthState::Unauthenticated);
    }

    fn cookie_file(cookie: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(cookie).unwrap();
        file
    }

    async fn safecookie_daemon(daemon: &mut MockDaemon, cookie: &[u8], tamper: bool) {
        let command = daemon.read_command().await.unwrap().unwrap();
        let client_nonce = hex::decode(command.trim_start_matches("AUTHCHALLENGE SAFECOOKIE ")).unwrap();
        let server_nonce = [9u8; 32];
        let mut server_hash = compute_server_hash(cookie, &client_nonce, &server_nonce).unwrap();
        if tamper {
            server_hash[0] ^= 0xff;
        }
        daemon
            .send(&format!(
                "250 AUTHCHALLENGE SERVERHASH={} SERVERNONCE={}\r\n",
                hex::encode_upper(&server_hash),
                hex::encode_upper(server_nonce)
            ))
            .await
            .unwrap();

        if !tamper {
            let client_hash = compute_client_hash(cookie, &client_nonce, &server_nonce).unwrap();
            daemon
                .respond(
                    &format!("AUTHENTICATE {}", hex::encode_upper(client_hash)),
                    "250 OK\r\n",
                )
                .await;
        }
    }

    #[tokio::test]
    async fn test_safecookie_authentication() {
        let cookie = [3u8; 32];
        let file = cookie_file(&cookie);
        let (controller, mut daemon) = mock_controller();

        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&statuses);
        controller.add_status_listener(move |status| sink.lock().push(status.clone()));

        let credential = AuthCredential::safe_cookie(file.path());
        let (result, _) = tokio::join!(
            controller.authenticate(&credential),
            safecookie_daemon(&mut daemon, &cookie, false),
        );
        result.unwrap();
        assert!(controller.is_authenticated());
        assert_eq!(*statuses.lock(), vec![ConnectionStatus::Authenticated]);
    }

    #[tokio::test]
    async fn test_safecookie_rejects_bad_server_hash() {
        let cookie = [3u8; 32];
        let file = cookie_file(&cookie);
        let (controller, mut daemon) = mock_controller();

        let credential = AuthCredential::safe_cookie(file.path());
        let (result, _) = tokio::join!(
            controller.authenticate(&credential),
            safecookie_daemon(&mut daemon, &cookie, true),
        );
        assert_eq!(
            result.unwrap_err().auth_failure(),
            Some(AuthFailure::CookieMismatch)
        );
        assert!(!controller.is_authenticated());
    }

    #[tokio::test]
    async fn test_cookie_with_wrong_size_is_not_sent() {
        let file = cookie_file(&[1u8; 16]);
        let (controller, _daemon) = mock_controller();
        let err = controller
            .authenticate(&AuthCredential::cookie_file(file.path()))
            .await
            .unwrap_err();
        assert_eq!(err.auth_failure(), Some(AuthFailure::IncorrectCookieSize));
        assert_eq!(controller.shared.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_auto_authenticate_prefers_null() {
        let (controller, mut daemon) = mock_controller();
        let (result, _) = tokio::join!(controller.auto_authenticate(Some("unused")), async {
            daemon
                .respond("PROTOCOLINFO 1", fixtures::protocolinfo_response())
                .await;
            daemon.respond("AUTHENTICATE", "250 OK\r\n").await;
        });
        result.unwrap();
        assert!(controller.is_authenticated());
    }

    #[tokio::test]
    async fn test_auto_authenticate_needs_password() {
        let (controller, mut daemon) = mock_controller();
        let (result, _) = tokio::join!(
            controller.auto_authenticate(None),
            daemon.respond(
                "PROTOCOLINFO 1",
                "250-PROTOCOLINFO 1\r\n250-AUTH METHODS=HASHEDPASSWORD\r\n250-VERSION Tor=\"0.4.8.12\"\r\n250 OK\r\n",
            ),
        );
        assert_eq!(
            result.unwrap_err().auth_failure(),
            Some(AuthFailure::MissingCredentials)
        );
    }

    #[tokio::test]
    async fn test_auto_authenticate_falls_back_to_cookie() {
        let cookie = [5u8; 32];
        let file = cookie_file(&cookie);
        let protocolinfo = format!(
            "250-PROTOCOLINFO 1\r\n250-AUTH METHODS=COOKIE COOKIEFILE=\"{}\"\r\n250-VERSION Tor=\"0.4.8.12\"\r\n250 OK\r\n",
            file.path().display()
        );
        let (controller, mut daemon) = mock_controller();

        let (result, _) = tokio::join!(controller.auto_authenticate(None), async {
            daemon.respond("PROTOCOLINFO 1", &protocolinfo).await;
            daemon
                .respond(&format!("AUTHENTICATE {}", hex::encode_upper(cookie)), "250 OK\r\n")
                .await;
        });
        result.unwrap();
        assert!(controller.is_authenticated());
    }

    #[tokio::test]
    async fn test_listeners_subscribe_after_authentication() {
        let (controller, mut daemon) = mock_controller();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);

        let id = controller
            .add_event_listener(EventType::Stream, move |event| {
                if matches!(event, Event::StreamStatus(_)) {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await
            .unwrap();
        assert_eq!(controller.subscribed_events(), vec![EventType::Stream]);

        let (result, _) = tokio::join!(controller.authenticate(&AuthCredential::None), async {
            daemon.respond("AUTHENTICATE", "250 OK\r\n").await;
            daemon.respond("SETEVENTS STREAM", "250 OK\r\n").await;
        });
        result.unwrap();

        let (first, second, _) = tokio::join!(
            controller.get_info("version"),
            controller.get_info("address"),
            async {
                daemon.expect("GETINFO version").await;
                daemon.expect("GETINFO address").await;
                let event = fixtures::stream_event();
                daemon
                    .send(&format!(
                        "{event}250-version=0.4.8.12\r\n250 OK\r\n{event}{event}250-address=1.2.3.4\r\n250 OK\r\n"
                    ))
                    .await
                    .unwrap();
            },
        );
        assert_eq!(first.unwrap(), "0.4.8.12");
        assert_eq!(second.unwrap(), "1.2.3.4");
        assert_eq!(seen.load(Ordering::SeqCst), 3);

        let (removed, _) = tokio::join!(
            controller.remove_event_listener(id),
            daemon.respond("SETEVENTS", "250 OK\r\n"),
        );
        assert!(removed.unwrap());
        assert!(controller.subscribed_events().is_empty());
    }

    #[tokio::test]
    async fn test_event_subscription_union() {
        let (controller, mut daemon) = mock_controller();
        authenticate_null(&controller, &mut daemon).await;

        let (bw, _) = tokio::join!(
            controller.add_event_listener(EventType::Bw, |_| {}),
            daemon.respond("SETEVENTS BW", "250 OK\r\n"),
        );
        bw.unwrap();

        let (circ, _) = tokio::join!(
            controller.add_event_listener(EventType::Circ, |_| {}),
            daemon.respond("SETEVENTS BW CIRC", "250 OK\r\n"),
        );
        let circ = circ.unwrap();

        // A second listener on a subscribed category sends nothing.
        controller
            .add_event_listener(EventType::Bw, |_| {})
            .await
            .unwrap();

        let (removed, _) = tokio::join!(
            controller.remove_event_listener(circ),
            daemon.respond("SETEVENTS BW", "250 OK\r\n"),
        );
        assert!(removed.unwrap());
    }

    #[tokio::test]
    async fn test_rejected_subscription_is_rolled_back() {
        let (controller, mut daemon) = mock_controller();
        authenticate_null(&controller, &mut daemon).await;

        let (result, _) = tokio::join!(
            controller.add_event_listener(EventType::HsDesc, |_| {}),
            daemon.respond("SETEVENTS HS_DESC", "552 Unrecognized event \"HS_DESC\"\r\n"),
        );
        assert!(result.is_err());
        assert!(controller.subscribed_events().is_empty());
    }

    #[tokio::test]
    async fn test_get_conf_multi_accumulates() {
        let (controller, mut daemon) = mock_controller();
        let (values, _) = tokio::join!(
            controller.get_conf_multi(&["ExitPolicy", "DirPort"]),
            daemon.respond(
                "GETCONF ExitPolicy DirPort",
                "250-ExitPolicy=accept *:80\r\n250-ExitPolicy=reject *:*\r\n250 DirPort\r\n",
            ),
        );
        let values = values.unwrap();
        assert_eq!(values["ExitPolicy"], vec!["accept *:80", "reject *:*"]);
        assert!(values["DirPort"].is_empty());
    }

    #[tokio::test]
    async fn test_get_conf_case_insensitive_and_unset() {
        let (controller, mut daemon) = mock_controller();
        let (value, _) = tokio::join!(
            controller.get_conf("socksport"),
            daemon.respond("GETCONF socksport", fixtures::socksport_response()),
        );
        assert_eq!(value.unwrap().as_deref(), Some("9050"));

        let (value, _) = tokio::join!(
            controller.get_conf("DirPort"),
            daemon.respond("GETCONF DirPort", "250 DirPort\r\n"),
        );
        assert_eq!(value.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_conf_quotes_values() {
        let (controller, mut daemon) = mock_controller();
        let (result, _) = tokio::join!(
            controller.set_conf_multi(&[("Nickname", "relay"), ("ContactInfo", "tor admin")]),
            daemon.respond(
                "SETCONF Nickname=relay ContactInfo=\"tor admin\"",
                "250 OK\r\n"
            ),
        );
        result.unwrap();
    }

    #[tokio::test]
    async fn test_unrecognized_key() {
        let (controller, mut daemon) = mock_controller();
        let (result, _) = tokio::join!(
            controller.get_info("unknown-key"),
            daemon.respond("GETINFO unknown-key", fixtures::error_response()),
        );
        match result {
            Err(TorControlError::InvalidArguments { arguments, .. }) => {
                assert_eq!(arguments, vec!["unknown-key"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_load_conf_sends_data_command() {
        let (controller, mut daemon) = mock_controller();
        let (result, _) = tokio::join!(
            controller.load_conf("SocksPort 9050\nLog notice stdout"),
            daemon.respond("+LOADCONF\nSocksPort 9050\nLog notice stdout\n.", "250 OK\r\n"),
        );
        result.unwrap();
    }

    #[tokio::test]
    async fn test_get_circuits_from_data_block() {
        let (controller, mut daemon) = mock_controller();
        let (circuits, _) = tokio::join!(
            controller.get_circuits(),
            daemon.respond("GETINFO circuit-status", fixtures::circuit_status_response()),
        );
        let circuits = circuits.unwrap();
        assert_eq!(circuits.len(), 2);
        assert_eq!(circuits[0].id, CircuitId(7));
        assert_eq!(circuits[0].path.len(), 2);
        assert_eq!(circuits[0].path[1].nickname(), Some("tor26"));
        assert_eq!(circuits[1].status, CircuitStatus::Launched);
        assert!(circuits[1].path.is_empty());
    }

    #[tokio::test]
    async fn test_get_circuit_missing() {
        let (controller, mut daemon) = mock_controller();
        let (result, _) = tokio::join!(
            controller.get_circuit(CircuitId(99)),
            daemon.respond("GETINFO circuit-status", fixtures::circuit_status_response()),
        );
        assert!(matches!(result, Err(TorControlError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_get_streams() {
        let (controller, mut daemon) = mock_controller();
        let (streams, _) = tokio::join!(
            controller.get_streams(),
            daemon.respond(
                "GETINFO stream-status",
                "250-stream-status=18 SUCCEEDED 7 www.example.com:443\r\n250 OK\r\n",
            ),
        );
        let streams = streams.unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].circuit_id, Some(CircuitId(7)));
    }

    #[tokio::test]
    async fn test_get_network_status_by_nickname() {
        let (controller, mut daemon) = mock_controller();
        let (entry, _) = tokio::join!(
            controller.get_network_status("moria1"),
            daemon.respond("GETINFO ns/name/moria1", fixtures::network_status_response()),
        );
        let entry = entry.unwrap();
        assert_eq!(entry.fingerprint, fixtures::sample_fingerprint());
        assert_eq!(entry.or_port, 9101);
        assert_eq!(entry.bandwidth, Some(20));
        assert!(entry.has_flag("Authority"));
    }

    #[tokio::test]
    async fn test_get_relay_descriptor_by_fingerprint() {
        let (controller, mut daemon) = mock_controller();
        let reply = "250+desc/id/9695DFC35FFEB861329B9F1AB04C46397020CE31=\r\n\
            router moria1 128.31.0.34 9101 0 9131\r\n\
            platform Tor 0.4.8.10 on Linux\r\n\
            fingerprint 9695 DFC3 5FFE B861 329B 9F1A B04C 4639 7020 CE31\r\n\
            .\r\n\
            250 OK\r\n";
        let (descriptor, _) = tokio::join!(
            controller.get_relay_descriptor("$9695dfc35ffeb861329b9f1ab04c46397020ce31"),
            daemon.respond("GETINFO desc/id/9695DFC35FFEB861329B9F1AB04C46397020CE31", reply),
        );
        let descriptor = descriptor.unwrap();
        assert_eq!(descriptor.nickname, "moria1");
        assert_eq!(descriptor.dir_port, Some(9131));
        assert_eq!(descriptor.fingerprint, Some(fixtures::sample_fingerprint()));
    }

    #[test]
    fn test_relay_query() {
        assert_eq!(relay_query("ns", "moria1").unwrap(), "ns/name/moria1");
        assert!(relay_query("ns", "not a relay").is_err());
        assert!(relay_query("desc", "$ABC").is_err());
    }

    #[tokio::test]
    async fn test_extend_circuit() {
        let (controller, mut daemon) = mock_controller();
        let path = vec![
            ServerSpec::from_str("$9695DFC35FFEB861329B9F1AB04C46397020CE31~moria1").unwrap(),
        ];
        let (id, _) = tokio::join!(
            controller.extend_circuit(None, &path, Some(CircuitPurpose::General)),
            daemon.respond(
                "EXTENDCIRCUIT 0 $9695DFC35FFEB861329B9F1AB04C46397020CE31~moria1 purpose=general",
                "250 EXTENDED 42\r\n",
            ),
        );
        assert_eq!(id.unwrap(), CircuitId(42));
    }

    #[tokio::test]
    async fn test_circuit_and_stream_commands() {
        let (controller, mut daemon) = mock_controller();
        let (closed, attached, stream_closed, _) = tokio::join!(
            controller.close_circuit(CircuitId(5), true),
            controller.attach_stream(StreamId(18), CircuitId(5)),
            controller.close_stream(StreamId(18), 6),
            async {
                daemon.respond("CLOSECIRCUIT 5 IfUnused", "250 OK\r\n").await;
                daemon.respond("ATTACHSTREAM 18 5", "250 OK\r\n").await;
                daemon.respond("CLOSESTREAM 18 6", "250 OK\r\n").await;
            },
        );
        closed.unwrap();
        attached.unwrap();
        stream_closed.unwrap();
    }

    #[tokio::test]
    async fn test_map_address() {
        let (controller, mut daemon) = mock_controller();
        let (mapped, _) = tokio::join!(
            controller.map_address(&[("0.0.0.0", "torproject.org")]),
            daemon.respond("MAPADDRESS 0.0.0.0=torproject.org", "250 127.192.10.10=torproject.org\r\n"),
        );
        assert_eq!(
            mapped.unwrap().get("127.192.10.10").map(String::as_str),
            Some("torproject.org")
        );
    }

    #[tokio::test]
    async fn test_add_and_delete_onion() {
        let (controller, mut daemon) = mock_controller();
        let service_id = "pg6mmjiyjmcrsslvykfwnntlaru7p5svn6y2ymmju6nubxndf4pscryd";
        let added = format!(
            "250-ServiceID={service_id}\r\n250-PrivateKey=ED25519-V3:secret\r\n250 OK\r\n"
        );
        let (service, _) = tokio::join!(
            controller.add_onion(&[(80, Some("127.0.0.1:8080"))], None, &[]),
            daemon.respond("ADD_ONION NEW:BEST Port=80,127.0.0.1:8080", &added),
        );
        let service = service.unwrap();
        assert!(service.address.is_v3());
        assert_eq!(service.private_key.as_deref(), Some("ED25519-V3:secret"));

        let del_command = format!("DEL_ONION {service_id}");
        let (deleted, _) = tokio::join!(
            controller.del_onion(service.address.service_id()),
            daemon.respond(&del_command, "250 OK\r\n"),
        );
        deleted.unwrap();

        assert!(matches!(
            controller.add_onion(&[], None, &[]).await,
            Err(TorControlError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_network_statuses_and_maintenance_commands() {
        let (controller, mut daemon) = mock_controller();
        let consensus = "250+ns/all=\r\n\
            r moria1 lpXfw1/+uGEym58asExGOXAgzjE 6ogpXh9QZM1CIu4TOWebTmn96Lg 2024-01-01 12:00:00 128.31.0.34 9101 9131\r\n\
            s Authority Fast Running\r\n\
            r tor26 hHsfhQNE14dkkaVIkvkEk05OuF0 7fJpMp/yIfPbLVdzMbrM/XY4W4s 2024-01-01 12:00:00 86.59.21.38 443 80\r\n\
            s Authority Running Stable\r\n\
            w Bandwidth=30\r\n\
            .\r\n\
            250 OK\r\n";

        let (entries, reset, saved, dropped, _) = tokio::join!(
            controller.get_network_statuses(),
            controller.reset_conf("MaxCircuitDirtiness"),
            controller.save_conf(true),
            controller.drop_guards(),
            async {
                daemon.respond("GETINFO ns/all", consensus).await;
                daemon.respond("RESETCONF MaxCircuitDirtiness", "250 OK\r\n").await;
                daemon.respond("SAVECONF FORCE", "250 OK\r\n").await;
                daemon.respond("DROPGUARDS", "250 OK\r\n").await;
            },
        );

        let entries = entries.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].nickname, "moria1");
        assert_eq!(entries[1].nickname, "tor26");
        assert!(entries[1].has_flag("Stable"));
        assert_eq!(entries[1].bandwidth, Some(30));
        reset.unwrap();
        saved.unwrap();
        dropped.unwrap();
    }

    #[tokio::test]
    async fn test_signals() {
        let (controller, mut daemon) = mock_controller();
        let (newnym, dns, _) = tokio::join!(
            controller.new_identity(),
            controller.clear_dns_cache(),
            async {
                daemon.respond("SIGNAL NEWNYM", "250 OK\r\n").await;
                daemon.respond("SIGNAL CLEARDNSCACHE", "250 OK\r\n").await;
            },
        );
        newnym.unwrap();
        dns.unwrap();
    }

    #[tokio::test]
    async fn test_quit_closes_connection() {
        let config = TorControlConfig::new().command_timeout(Duration::from_secs(5));
        let (controller, mut daemon) = mock_controller_with(&config);
        let (result, _) = tokio::join!(controller.quit(), async {
            daemon.respond("QUIT", "250 closing connection\r\n").await;
        });
        result.unwrap();
        assert!(!controller.is_alive());
    }
}
