//! Test helpers shared across server modules.

use std::{
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use rstest::fixture;

use super::GatewayServer;
use crate::{
    bus::{BridgeSettings, BusBridge, memory::MemoryBus},
    connection::{ConnectionSettings, GatewayContext},
};

#[fixture]
/// Returns a bound [`TcpListener`](StdTcpListener) on a free port.
///
/// Keeping the listener bound prevents another process from claiming the
/// port between discovery and use.
pub fn free_listener() -> StdTcpListener {
    let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    StdTcpListener::bind(addr).expect("Failed to bind free port listener")
}

/// A gateway context over a fresh single-partition [`MemoryBus`].
pub async fn memory_context() -> (MemoryBus, GatewayContext) {
    let bus = MemoryBus::default();
    let bridge = BusBridge::new(
        Arc::new(bus.clone()),
        BridgeSettings {
            consumer_pool_size: 2,
            ..BridgeSettings::default()
        },
    )
    .await
    .expect("memory bridge");
    let ctx = GatewayContext::new(Arc::new(bridge), ConnectionSettings::default());
    (bus, ctx)
}

pub async fn bind_server(listener: StdTcpListener) -> (MemoryBus, GatewayServer) {
    let (bus, ctx) = memory_context().await;
    let server = GatewayServer::from_std_listener(listener, ctx).expect("Failed to bind");
    (bus, server)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_listener_uses_localhost() {
        let addr = free_listener().local_addr().expect("failed to get address");
        assert_eq!(addr.ip(), std::net::IpAddr::from(Ipv4Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn memory_context_uses_a_small_pool() {
        let (bus, ctx) = memory_context().await;
        assert_eq!(ctx.bridge().pool().capacity(), 2);
        assert_eq!(bus.sessions_opened(), 2);
    }
}
