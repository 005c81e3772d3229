//! Starcom Link
//!
//! Manages one BLE connection to a Starcom peripheral: connect, discover the
//! UART service, arm notifications, answer the challenge-response handshake
//! and then exchange commands and data.
//!
//! # Example
//!
//! ```ignore
//! use starcom_link::{Link, LinkConfig, LinkService, transport::btle::BtleTransport};
//! use starcom_proto::Command;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LinkConfig::default();
//!     let (transport_tx, transport_rx) = mpsc::unbounded_channel();
//!     let (event_tx, mut events) = mpsc::unbounded_channel();
//!
//!     let transport = BtleTransport::new(&config, transport_tx).await;
//!     let mut link = Link::new(transport, config.device_key()?, event_tx);
//!     link.initialize()?;
//!
//!     let (client, _task) = LinkService::spawn(link, transport_rx);
//!     client.connect("AA:BB:CC:DD:EE:FF").await?;
//!
//!     while let Some(event) = events.recv().await {
//!         if event == starcom_link::LinkEvent::Authenticated {
//!             client.send_command(Command::ReadVersion).await?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod digest;
mod error;
pub mod event;
mod link;
pub mod service;
pub mod transport;

pub use config::{ConfigError, LinkConfig};
pub use digest::{DigestEngine, DigestError, Sha256Engine, Token, compute_token};
pub use error::LinkError;
pub use event::{DataAvailable, LinkEvent};
pub use link::{ConnectionState, HandshakePhase, Link};
pub use service::{LinkClient, LinkService};
pub use transport::{LinkId, Transport, TransportError, TransportEvent, TransportEventKind};
