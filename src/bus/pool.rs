//! Fixed-capacity pool of reusable consumer sessions.
//!
//! Establishing a bus consumer session is expensive relative to the lifetime
//! of many client subscriptions, so sessions are opened once and lent out.
//! Acquisition never waits: when every slot is busy a transient session is
//! opened outside the pool and closed again on release.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use log::{debug, warn};
use tokio::runtime::Handle;

use super::{BusError, ConsumerSession, MessageBus};

struct Slot {
    session: Arc<dyn ConsumerSession>,
    busy: AtomicBool,
}

struct PoolInner {
    bus: Arc<dyn MessageBus>,
    slots: Vec<Slot>,
}

/// Pool of consumer sessions shared by every connection.
#[derive(Clone)]
pub struct ConsumerPool {
    inner: Arc<PoolInner>,
}

impl ConsumerPool {
    /// Open `capacity` sessions against `bus`.
    ///
    /// # Errors
    ///
    /// Returns the first [`BusError`] raised while opening a session. Sessions
    /// opened before the failure are closed again.
    pub async fn new(bus: Arc<dyn MessageBus>, capacity: usize) -> Result<Self, BusError> {
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            match bus.open_consumer().await {
                Ok(session) => slots.push(Slot {
                    session,
                    busy: AtomicBool::new(false),
                }),
                Err(err) => {
                    for slot in &slots {
                        slot.session.close().await;
                    }
                    return Err(err);
                }
            }
        }
        Ok(Self {
            inner: Arc::new(PoolInner { bus, slots }),
        })
    }

    #[must_use]
    pub fn capacity(&self) -> usize { self.inner.slots.len() }

    /// Number of pooled sessions not currently lent out.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.inner
            .slots
            .iter()
            .filter(|slot| !slot.busy.load(Ordering::Acquire))
            .count()
    }

    /// Borrow an idle pooled session, or open a transient one if none is idle.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] only when a transient session has to be opened and
    /// the bus refuses it.
    pub async fn acquire(&self) -> Result<ConsumerLease, BusError> {
        for (index, slot) in self.inner.slots.iter().enumerate() {
            if slot
                .busy
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(ConsumerLease {
                    session: Arc::clone(&slot.session),
                    origin: Origin::Pooled(index),
                    pool: Arc::clone(&self.inner),
                    released: false,
                });
            }
        }
        debug!(
            "consumer pool exhausted, opening transient session: capacity={}",
            self.capacity()
        );
        let session = self.inner.bus.open_consumer().await?;
        Ok(ConsumerLease {
            session,
            origin: Origin::Transient,
            pool: Arc::clone(&self.inner),
            released: false,
        })
    }

    /// Close every pooled session. Leases still outstanding keep their
    /// session handle but the bus side is gone.
    pub async fn close(&self) {
        for slot in &self.inner.slots {
            slot.session.close().await;
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Origin {
    Pooled(usize),
    Transient,
}

/// A consumer session borrowed from a [`ConsumerPool`].
///
/// Call [`release`](Self::release) to hand it back. A lease dropped without
/// release still frees its pool slot, and a transient session is closed on a
/// background task when a runtime is available.
pub struct ConsumerLease {
    session: Arc<dyn ConsumerSession>,
    origin: Origin,
    pool: Arc<PoolInner>,
    released: bool,
}

impl ConsumerLease {
    #[must_use]
    pub fn session(&self) -> &Arc<dyn ConsumerSession> { &self.session }

    #[must_use]
    pub fn is_pooled(&self) -> bool { matches!(self.origin, Origin::Pooled(_)) }

    /// Return a pooled session to idle, or close a transient one.
    pub async fn release(mut self) {
        self.released = true;
        match self.origin {
            Origin::Pooled(index) => self.pool.slots[index].busy.store(false, Ordering::Release),
            Origin::Transient => self.session.close().await,
        }
    }
}

impl Drop for ConsumerLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.origin {
            Origin::Pooled(index) => self.pool.slots[index].busy.store(false, Ordering::Release),
            Origin::Transient => match Handle::try_current() {
                Ok(handle) => {
                    let session = Arc::clone(&self.session);
                    handle.spawn(async move { session.close().await });
                }
                Err(_) => warn!("transient consumer session leaked: no runtime to close it"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::{fixture, rstest};

    use super::ConsumerPool;
    use crate::bus::memory::MemoryBus;

    #[fixture]
    fn bus() -> MemoryBus { MemoryBus::default() }

    #[rstest]
    #[tokio::test]
    async fn lends_pooled_sessions_then_transient_ones(bus: MemoryBus) {
        let pool = ConsumerPool::new(Arc::new(bus.clone()), 2).await.expect("pool");
        assert_eq!(bus.sessions_opened(), 2);

        let first = pool.acquire().await.expect("first");
        let second = pool.acquire().await.expect("second");
        assert!(first.is_pooled() && second.is_pooled());
        assert_eq!(pool.idle(), 0);

        let third = pool.acquire().await.expect("third");
        assert!(!third.is_pooled());
        assert_eq!(bus.sessions_opened(), 3);

        third.release().await;
        assert_eq!(bus.sessions_closed(), 1);
        first.release().await;
        assert_eq!(pool.idle(), 1);
        drop(second);
        assert_eq!(pool.idle(), 2);
    }

    #[rstest]
    #[tokio::test]
    async fn released_slot_is_reused(bus: MemoryBus) {
        let pool = ConsumerPool::new(Arc::new(bus.clone()), 1).await.expect("pool");
        pool.acquire().await.expect("lease").release().await;
        let again = pool.acquire().await.expect("lease");
        assert!(again.is_pooled());
        assert_eq!(bus.sessions_opened(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn exhausted_pool_surfaces_bus_failure(bus: MemoryBus) {
        let pool = ConsumerPool::new(Arc::new(bus.clone()), 0).await.expect("pool");
        bus.set_available(false);
        assert!(pool.acquire().await.is_err());
    }

    #[rstest]
    #[tokio::test]
    async fn dropped_transient_lease_is_closed(bus: MemoryBus) {
        let pool = ConsumerPool::new(Arc::new(bus.clone()), 0).await.expect("pool");
        drop(pool.acquire().await.expect("lease"));
        tokio::task::yield_now().await;
        assert_eq!(bus.sessions_closed(), 1);
    }
}
