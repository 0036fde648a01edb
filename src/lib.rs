//! Client library for the cloud event-delivery Push protocol.
//!
//! Two collaborators make up the public surface:
//!
//! - [`monitor::MonitorClient`] manages monitors (the server-side objects
//!   that select which topics get delivered) over a small HTTP API.
//! - [`client::PushClient`] opens long-lived, binary-framed push sessions
//!   that stream published events to a user-supplied callback.
//!
//! Most applications only need [`client::PushClient`]; it wraps a
//! [`monitor::MonitorClient`] internally and exposes the monitor operations
//! directly.
//!
//! ```rust,no_run
//! use push_client::client::PushClient;
//! use push_client::config::PushConfig;
//! use push_client::monitor::MonitorDescriptor;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PushConfig::builder("user", "pass").hostname("login.etherios.com").build();
//!     let client = PushClient::new(config);
//!
//!     let monitor_id = client.create_monitor(&MonitorDescriptor::new(["DeviceCore[U]"])).await?;
//!     client
//!         .create_session(monitor_id, |payload| {
//!             println!("received {} bytes", payload.len());
//!             true
//!         })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod callback_pool;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod monitor;
pub mod reader;
pub mod session;
pub mod transport;
pub mod writer;

#[cfg(test)]
mod tests;

pub use client::PushClient;
pub use config::{CaCerts, PushConfig, PushConfigBuilder};
pub use error::{MonitorError, PushError, PushResult};
pub use monitor::{Compression, Format, MonitorClient, MonitorDescriptor};
pub use session::SessionId;
