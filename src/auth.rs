//! Authentication primitives for the Tor control protocol.
//!
//! PROTOCOLINFO parsing, credentials, cookie handling and the SAFECOOKIE
//! HMAC exchange. The controller drives the handshake itself; this module
//! only holds the pieces that do not touch the socket.

use crate::error::{AuthFailure, Result, TorControlError};
use crate::protocol::{parse_key_value_pairs, Reply};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::{Path, PathBuf};

type HmacSha256 = Hmac<Sha256>;

/// Length of the authentication cookie and of both SAFECOOKIE nonces.
pub const COOKIE_LENGTH: usize = 32;

const SERVER_HASH_KEY: &[u8] = b"Tor safe cookie authentication server-to-controller hash";
const CLIENT_HASH_KEY: &[u8] = b"Tor safe cookie authentication controller-to-server hash";

/// Authentication methods supported by Tor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    /// No authentication required.
    Null,
    /// Password authentication.
    HashedPassword,
    /// Cookie file authentication.
    Cookie,
    /// Safe cookie authentication (HMAC-based).
    SafeCookie,
}

impl AuthMethod {
    /// Parse an auth method from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "NULL" => Some(AuthMethod::Null),
            "HASHEDPASSWORD" => Some(AuthMethod::HashedPassword),
            "COOKIE" => Some(AuthMethod::Cookie),
            "SAFECOOKIE" => Some(AuthMethod::SafeCookie),
            _ => None,
        }
    }

    /// The method name as Tor spells it.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Null => "NULL",
            AuthMethod::HashedPassword => "HASHEDPASSWORD",
            AuthMethod::Cookie => "COOKIE",
            AuthMethod::SafeCookie => "SAFECOOKIE",
        }
    }
}

/// Authentication progress of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No successful AUTHENTICATE yet.
    Unauthenticated,
    /// A handshake is in flight.
    Authenticating,
    /// The daemon accepted our credentials.
    Authenticated,
    /// The connection is gone.
    Closed,
}

/// Information retrieved from PROTOCOLINFO command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolInfo {
    /// Protocol version (currently always 1).
    pub protocol_version: u32,
    /// Tor version string.
    pub tor_version: String,
    /// Supported authentication methods, in the daemon's order.
    pub auth_methods: Vec<AuthMethod>,
    /// Method names this client does not know.
    pub unknown_auth_methods: Vec<String>,
    /// Path to the cookie file, if applicable.
    pub cookie_file: Option<PathBuf>,
}

impl ProtocolInfo {
    /// Parse a PROTOCOLINFO reply.
    pub fn from_reply(reply: &Reply) -> Result<Self> {
        let lines: Vec<&str> = reply.lines.iter().map(|l| l.text.as_str()).collect();
        Self::parse(&lines)
    }

    /// Parse PROTOCOLINFO response lines.
    pub fn parse(lines: &[&str]) -> Result<Self> {
        let mut protocol_version = None;
        let mut tor_version = String::new();
        let mut auth_methods = Vec::new();
        let mut unknown_auth_methods = Vec::new();
        let mut cookie_file = None;

        for line in lines {
            let line = line.trim();

            if let Some(rest) = line.strip_prefix("PROTOCOLINFO ") {
                let version = rest.split_whitespace().next().unwrap_or_default();
                protocol_version = Some(version.parse().map_err(|_| {
                    TorControlError::Parse(format!("Invalid PROTOCOLINFO version: '{}'", version))
                })?);
            } else if let Some(rest) = line.strip_prefix("AUTH ") {
                let fields = parse_key_value_pairs(rest);
                let methods = fields.get("METHODS").ok_or_else(|| {
                    TorControlError::Parse(format!("AUTH line without METHODS: '{}'", line))
                })?;
                for method in methods.split(',').filter(|m| !m.is_empty()) {
                    match AuthMethod::parse(method) {
                        Some(m) => auth_methods.push(m),
                        None => unknown_auth_methods.push(method.to_string()),
                    }
                }
                cookie_file = fields.get("COOKIEFILE").map(PathBuf::from);
            } else if let Some(rest) = line.strip_prefix("VERSION ") {
                if let Some(version) = parse_key_value_pairs(rest).remove("Tor") {
                    tor_version = version;
                }
            }
        }

        Ok(ProtocolInfo {
            protocol_version: protocol_version.ok_or_else(|| {
                TorControlError::Parse("PROTOCOLINFO reply without version line".to_string())
            })?,
            tor_version,
            auth_methods,
            unknown_auth_methods,
            cookie_file,
        })
    }

    /// Check if NULL authentication is supported.
    pub fn supports_null(&self) -> bool {
        self.auth_methods.contains(&AuthMethod::Null)
    }

    /// Check if password authentication is supported.
    pub fn supports_password(&self) -> bool {
        self.auth_methods.contains(&AuthMethod::HashedPassword)
    }

    /// Check if cookie authentication is supported.
    pub fn supports_cookie(&self) -> bool {
        self.auth_methods.contains(&AuthMethod::Cookie)
    }

    /// Check if safe cookie authentication is supported.
    pub fn supports_safe_cookie(&self) -> bool {
        self.auth_methods.contains(&AuthMethod::SafeCookie)
    }
}

/// Authentication credentials for connecting to Tor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthCredential {
    /// No authentication (for NULL method).
    #[default]
    None,
    /// Password for HASHEDPASSWORD method.
    Password(String),
    /// Cookie file path, read when authenticating.
    CookieFile(PathBuf),
    /// Raw cookie data (32 bytes).
    CookieData(Vec<u8>),
    /// Use SAFECOOKIE authentication.
    SafeCookie {
        /// Path to the cookie file.
        cookie_path: PathBuf,
    },
}

impl AuthCredential {
    /// Create password credentials.
    pub fn password(password: impl Into<String>) -> Self {
        AuthCredential::Password(password.into())
    }

    /// Create cookie file credentials.
    pub fn cookie_file(path: impl Into<PathBuf>) -> Self {
        AuthCredential::CookieFile(path.into())
    }

    /// Create safe cookie credentials.
    pub fn safe_cookie(cookie_path: impl Into<PathBuf>) -> Self {
        AuthCredential::SafeCookie {
            cookie_path: cookie_path.into(),
        }
    }

    /// The method this credential authenticates with.
    pub fn method(&self) -> AuthMethod {
        match self {
            AuthCredential::None => AuthMethod::Null,
            AuthCredential::Password(_) => AuthMethod::HashedPassword,
            AuthCredential::CookieFile(_) | AuthCredential::CookieData(_) => AuthMethod::Cookie,
            AuthCredential::SafeCookie { .. } => AuthMethod::SafeCookie,
        }
    }
}

/// Read the authentication cookie from a file.
pub fn read_cookie_file(path: &Path) -> Result<Vec<u8>> {
    let data = std::fs::read(path).map_err(|e| {
        TorControlError::auth(
            AuthFailure::UnreadableCookie,
            format!("Failed to read cookie file '{}': {}", path.display(), e),
        )
    })?;

    check_cookie_length(&data, &path.display().to_string())?;
    Ok(data)
}

/// Reject cookies that are not exactly [`COOKIE_LENGTH`] bytes.
pub fn check_cookie_length(cookie: &[u8], origin: &str) -> Result<()> {
    if cookie.len() != COOKIE_LENGTH {
        return Err(TorControlError::auth(
            AuthFailure::IncorrectCookieSize,
            format!(
                "Cookie from '{}' has invalid length {} (expected {})",
                origin,
                cookie.len(),
                COOKIE_LENGTH
            ),
        ));
    }
    Ok(())
}

/// Generate a random client nonce for SAFECOOKIE authentication.
pub fn generate_client_nonce() -> [u8; COOKIE_LENGTH] {
    use rand::Rng;
    let mut nonce = [0u8; COOKIE_LENGTH];
    rand::rng().fill(&mut nonce);
    nonce
}

fn safecookie_hmac(key: &[u8], cookie: &[u8], client_nonce: &[u8], server_nonce: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| TorControlError::auth(AuthFailure::Rejected, format!("HMAC setup failed: {}", e)))?;
    mac.update(cookie);
    mac.update(client_nonce);
    mac.update(server_nonce);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Compute the server hash for SAFECOOKIE authentication.
pub fn compute_server_hash(cookie: &[u8], client_nonce: &[u8], server_nonce: &[u8]) -> Result<Vec<u8>> {
    safecookie_hmac(SERVER_HASH_KEY, cookie, client_nonce, server_nonce)
}

/// Compute the client hash for SAFECOOKIE authentication.
pub fn compute_client_hash(cookie: &[u8], client_nonce: &[u8], server_nonce: &[u8]) -> Result<Vec<u8>> {
    safecookie_hmac(CLIENT_HASH_KEY, cookie, client_nonce, server_nonce)
}

/// Format cookie data as hex for the AUTHENTICATE command.
pub fn format_cookie_hex(cookie: &[u8]) -> String {
    hex::encode_upper(cookie)
}

/// The server's half of a SAFECOOKIE challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    /// HMAC the daemon computed over the cookie and both nonces.
    pub server_hash: Vec<u8>,
    /// The daemon's nonce.
    pub server_nonce: Vec<u8>,
}

/// Parse the AUTHCHALLENGE response.
pub fn parse_authchallenge_response(text: &str) -> Result<AuthChallenge> {
    let rest = text.strip_prefix("AUTHCHALLENGE ").ok_or_else(|| {
        TorControlError::Protocol(format!("Unexpected AUTHCHALLENGE reply: '{}'", text))
    })?;
    let fields = parse_key_value_pairs(rest);

    let decode = |key: &str| -> Result<Vec<u8>> {
        let value = fields
            .get(key)
            .ok_or_else(|| TorControlError::Protocol(format!("AUTHCHALLENGE reply missing {}", key)))?;
        let bytes = hex::decode(value)
            .map_err(|e| TorControlError::Protocol(format!("Invalid {} hex: {}", key, e)))?;
        if bytes.len() != COOKIE_LENGTH {
            return Err(TorControlError::Protocol(format!(
                "Invalid {} length: {}",
                key,
                bytes.len()
            )));
        }
        Ok(bytes)
    };

    Ok(AuthChallenge {
        server_hash: decode("SERVERHASH")?,
        server_nonce: decode("SERVERNONCE")?,
    })
}

/// Verify the server's response in SAFECOOKIE authentication.
pub fn verify_server_hash(cookie: &[u8], client_nonce: &[u8], challenge: &AuthChallenge) -> Result<()> {
    let computed = compute_server_hash(cookie, client_nonce, &challenge.server_nonce)?;
    if constant_time_compare(&computed, &challenge.server_hash) {
        Ok(())
    } else {
        Err(TorControlError::auth(
            AuthFailure::CookieMismatch,
            "Tor provided the wrong server nonce hash",
        ))
    }
}

/// Constant-time comparison to prevent timing attacks.
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Map a rejected AUTHENTICATE reply to a failure reason.
pub fn classify_rejection(method: AuthMethod, message: &str) -> AuthFailure {
    let lower = message.to_lowercase();
    if lower.contains("wrong length") {
        AuthFailure::IncorrectCookieSize
    } else if lower.contains("password did not match") {
        AuthFailure::IncorrectPassword
    } else if lower.contains("cookie did not match") || lower.contains("safecookie") {
        AuthFailure::CookieMismatch
    } else {
        match method {
            AuthMethod::Null => AuthFailure::MissingCredentials,
            AuthMethod::HashedPassword => AuthFailure::IncorrectPassword,
            AuthMethod::Cookie | AuthMethod::SafeCookie => AuthFailure::Rejected,
        }
    }
}

/// Rank failures by how much they tell the caller. Higher is more specific.
pub(crate) fn failure_specificity(reason: AuthFailure) -> u8 {
    match reason {
        AuthFailure::IncorrectPassword
        | AuthFailure::CookieMismatch
        | AuthFailure::IncorrectCookieSize => 3,
        AuthFailure::UnreadableCookie => 2,
        AuthFailure::Rejected | AuthFailure::MissingCredentials => 1,
        AuthFailure::UnsupportedMethod => 0,
    }
}
