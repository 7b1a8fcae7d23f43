#![doc(html_root_url = "https://docs.rs/wiregate/latest")]
//! Public API for the `wiregate` library.
//!
//! `wiregate` accepts MQTT-style clients over TCP and bridges their
//! publish/subscribe traffic onto a partitioned message bus. The building
//! blocks are usable on their own: the frame [`codec`], the
//! [`reassembly`] stage that recovers from corrupt input, the [`bus`]
//! bridge with its consumer pool and publish batcher, the per-client
//! [`connection`] state machine and the [`server`] listener.

pub mod bus;
pub mod byte_order;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod reassembly;
pub mod server;

pub use bus::{BusBridge, BusError, MessageBus};
pub use codec::{Frame, MqttCodec};
pub use connection::{CloseReason, ConnectionId, GatewayContext, serve_connection};
pub use error::{GatewayError, Result};
pub use metrics::{CONNECTIONS_ACTIVE, Direction, ERRORS_TOTAL, FRAMES_PROCESSED};
pub use server::GatewayServer;
