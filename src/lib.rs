//! # torctl
//!
//! An async client for the Tor control protocol.
//!
//! A [`Controller`] holds one connection to Tor's control port and lets any
//! number of tasks use it at once:
//!
//! - Commands from concurrent callers are serialised on the wire and each
//!   caller receives exactly its own reply
//! - Asynchronous events are decoded and delivered to listeners registered
//!   per event category, on the connection's reader task
//! - Authentication covers NULL, HASHEDPASSWORD, COOKIE and SAFECOOKIE
//! - Typed calls cover configuration, signals, circuits, streams, relay
//!   lookups and ephemeral onion services
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use torctl::{Controller, Result, TorControlConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let controller = Controller::open(TorControlConfig::default()).await?;
//!     controller.auto_authenticate(None).await?;
//!
//!     let version = controller.get_version().await?;
//!     println!("Connected to Tor {}", version);
//!
//!     controller.new_identity().await?;
//!     controller.close().await
//! }
//! ```
//!
//! ## Authentication
//!
//! ```rust,no_run
//! use torctl::{AuthCredential, Controller, TorControlConfig};
//!
//! # async fn example() -> torctl::Result<()> {
//! // Authenticate while opening.
//! let config = TorControlConfig::new().safe_cookie("/run/tor/control.authcookie");
//! let controller = Controller::open(config).await?;
//!
//! // Or later, with an explicit credential.
//! let other = Controller::open(TorControlConfig::default()).await?;
//! other.authenticate(&AuthCredential::password("secret")).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Events
//!
//! Listeners run on the reader task and must not block. Subscriptions made
//! before authentication are sent to Tor once authentication succeeds.
//!
//! ```rust,no_run
//! use torctl::{Controller, Event, EventType, TorControlConfig};
//!
//! # async fn example() -> torctl::Result<()> {
//! let controller = Controller::open(TorControlConfig::from_env()?).await?;
//! controller.auto_authenticate(None).await?;
//!
//! let id = controller
//!     .add_event_listener(EventType::Bw, |event| {
//!         if let Event::Bandwidth(bw) = event {
//!             println!("read {} written {}", bw.bytes_read, bw.bytes_written);
//!         }
//!     })
//!     .await?;
//!
//! tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//! controller.remove_event_listener(id).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `tokio-runtime` (default): the connection engine. Without it only the
//!   protocol codec, event decoding and authentication helpers are built.
//! - `test-utils`: [`test_utils`] with fixtures and a scripted mock daemon.
//!
//! ## Protocol Compatibility
//!
//! Implements version 1 of the
//! [Tor control protocol](https://spec.torproject.org/control-spec/).

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod types;

#[cfg(feature = "tokio-runtime")]
pub mod controller;
#[cfg(feature = "tokio-runtime")]
pub mod dispatch;
#[cfg(feature = "tokio-runtime")]
pub mod registry;
#[cfg(feature = "tokio-runtime")]
pub mod transport;

#[cfg(all(feature = "tokio-runtime", any(test, feature = "test-utils")))]
pub mod test_utils;

pub use error::{AuthFailure, Result, TorControlError};

#[cfg(feature = "tokio-runtime")]
pub use controller::Controller;
#[cfg(feature = "tokio-runtime")]
pub use dispatch::LoopState;
#[cfg(feature = "tokio-runtime")]
pub use registry::{ConnectionStatus, ListenerId};

pub use auth::{AuthCredential, AuthMethod, AuthState, ProtocolInfo};
pub use config::{ConnectionAddress, TorControlConfig};
pub use events::{Event, EventType};
pub use protocol::{Reply, ReplyLine};
pub use types::{
    Circuit, CircuitId, CircuitPurpose, CircuitStatus, Fingerprint, NetworkStatusEntry,
    OnionAddress, OnionService, OrConnStatus, RelayDescriptor, ServerSpec, Signal, StreamId,
    StreamInfo, StreamStatus, TorVersion,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Tor control protocol version supported.
pub const PROTOCOL_VERSION: u32 = 1;
