//! Utilities for driving a `wiregate` connection with in-memory streams
//! during tests.
//!
//! A [`Gateway`] serves each [`TestClient`] over a `tokio::io::duplex` pair
//! against a [`MemoryBus`](wiregate::bus::memory::MemoryBus), so complete
//! client sessions run without sockets or a broker.
//!
//! ```rust
//! use wiregate::codec::{Frame, QoS};
//! use wiregate_testing::{Gateway, frames};
//!
//! # async fn example(gateway: Gateway) {
//! let mut session = gateway.connect();
//! session.client.handshake(frames::connect("c1")).await;
//! session
//!     .client
//!     .send(frames::publish("events", b"hi", QoS::AtLeastOnce, 1))
//!     .await
//!     .unwrap();
//! assert_eq!(session.client.expect_frame().await, Frame::PubAck(1));
//! # }
//! ```

mod client;
pub mod frames;
mod harness;
pub mod logging;

pub use client::{RECV_TIMEOUT, TestClient};
pub use harness::{DEFAULT_CAPACITY, Gateway, Session, gateway};
pub use logging::{LoggerHandle, logger};
