//! In-process port reservations backed by OS bind checks.
//!
//! A port handed out by [`PortAllocator::allocate`] was free at the moment the
//! OS bound it and is then reserved in-process until released, so no two live
//! handles share a port. Races against unrelated processes remain possible;
//! a bind failure is retried once before giving up.

use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::errors::HarnessError;

const PORTS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::ports");

type PortSource = Box<dyn Fn() -> io::Result<u16> + Send + Sync>;

/// Hands out free TCP ports and tracks which ones are reserved.
pub struct PortAllocator {
    reserved: Mutex<BTreeSet<u16>>,
    attempts: u32,
    source: PortSource,
}

impl fmt::Debug for PortAllocator {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PortAllocator")
            .field("reserved", &*self.lock())
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

impl PortAllocator {
    /// Creates an allocator that asks the OS for ephemeral loopback ports.
    #[must_use]
    pub fn new(attempts: u32) -> Self {
        Self::with_source(attempts, bind_ephemeral)
    }

    /// Creates an allocator drawing candidate ports from `source`.
    pub fn with_source<F>(attempts: u32, source: F) -> Self
    where
        F: Fn() -> io::Result<u16> + Send + Sync + 'static,
    {
        Self {
            reserved: Mutex::new(BTreeSet::new()),
            attempts: attempts.max(1),
            source: Box::new(source),
        }
    }

    /// Returns an OS-verified free port and reserves it.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::PortExhaustion`] when every attempt yields a
    /// port that is already reserved, or when binding fails twice.
    pub fn allocate(&self) -> Result<u16, HarnessError> {
        let mut reserved = self.lock();
        let mut last_error = None;
        let mut made = 0;
        while made < self.attempts {
            made += 1;
            match (self.source)() {
                Ok(port) if reserved.contains(&port) => {
                    debug!(target: PORTS_TARGET, port, attempt = made, "port already reserved");
                }
                Ok(port) => {
                    reserved.insert(port);
                    debug!(target: PORTS_TARGET, port, attempt = made, "port reserved");
                    return Ok(port);
                }
                Err(error) => {
                    warn!(target: PORTS_TARGET, attempt = made, error = %error, "port bind failed");
                    let retried = last_error.is_some();
                    last_error = Some(error);
                    if retried {
                        break;
                    }
                }
            }
        }
        Err(HarnessError::PortExhaustion {
            attempts: made,
            last_error,
        })
    }

    /// Reserves a caller-chosen port.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::PortInUse`] when the port is already reserved
    /// in-process or cannot be bound on the loopback interface.
    pub fn reserve(&self, port: u16) -> Result<u16, HarnessError> {
        let mut reserved = self.lock();
        if reserved.contains(&port) {
            return Err(HarnessError::PortInUse { port });
        }
        if let Err(error) = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port))) {
            debug!(target: PORTS_TARGET, port, error = %error, "requested port is busy");
            return Err(HarnessError::PortInUse { port });
        }
        reserved.insert(port);
        debug!(target: PORTS_TARGET, port, "requested port reserved");
        Ok(port)
    }

    /// Releases a reservation; returns whether the port was reserved.
    pub fn release(&self, port: u16) -> bool {
        let released = self.lock().remove(&port);
        if released {
            debug!(target: PORTS_TARGET, port, "port released");
        }
        released
    }

    /// Whether `port` is currently reserved.
    #[must_use]
    pub fn is_reserved(&self, port: u16) -> bool {
        self.lock().contains(&port)
    }

    /// Number of live reservations.
    #[must_use]
    pub fn reserved_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<u16>> {
        // The set stays consistent even if a holder panicked mid-call.
        self.reserved.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn bind_ephemeral() -> io::Result<u16> {
    let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn allocated_ports_are_distinct_and_reserved() {
        let allocator = PortAllocator::new(16);
        let first = allocator.allocate().expect("first port");
        let second = allocator.allocate().expect("second port");
        assert_ne!(first, second);
        assert!(allocator.is_reserved(first));
        assert!(allocator.is_reserved(second));
        assert_eq!(allocator.reserved_count(), 2);
    }

    #[test]
    fn released_port_is_free_for_binding() {
        let allocator = PortAllocator::new(16);
        let port = allocator.allocate().expect("allocate");
        assert!(allocator.release(port));
        assert!(!allocator.is_reserved(port));
        assert!(!allocator.release(port), "second release is a no-op");
        TcpListener::bind(("127.0.0.1", port)).expect("released port binds");
    }

    #[test]
    fn reserved_collisions_exhaust_after_bounded_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let allocator = PortAllocator::with_source(5, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(40_000)
        });
        assert_eq!(allocator.allocate().expect("first"), 40_000);
        let error = allocator.allocate().expect_err("every candidate collides");
        assert!(matches!(
            error,
            HarnessError::PortExhaustion { attempts: 5, last_error: None }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn released_port_is_handed_out_again() {
        let allocator = PortAllocator::with_source(3, || Ok(40_500));
        let port = allocator.allocate().expect("first");
        assert!(allocator.allocate().is_err());

        assert!(allocator.release(port));

        assert_eq!(allocator.allocate().expect("after release"), port);
        assert!(allocator.is_reserved(port));
    }

    #[test]
    fn bind_failure_is_retried_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let allocator = PortAllocator::with_source(10, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::AddrInUse, "busy"))
        });
        let error = allocator.allocate().expect_err("bind keeps failing");
        assert!(matches!(
            error,
            HarnessError::PortExhaustion { attempts: 2, last_error: Some(_) }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn transient_bind_failure_recovers() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let allocator = PortAllocator::with_source(10, move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(io::Error::new(io::ErrorKind::AddrInUse, "busy"))
            } else {
                Ok(41_000)
            }
        });
        assert_eq!(allocator.allocate().expect("second attempt succeeds"), 41_000);
    }

    #[test]
    fn reserve_rejects_reserved_port() {
        let allocator = PortAllocator::new(16);
        let port = allocator.allocate().expect("allocate");
        let error = allocator.reserve(port).expect_err("duplicate reservation");
        assert!(matches!(error, HarnessError::PortInUse { port: p } if p == port));
    }

    #[test]
    fn reserve_rejects_externally_bound_port() {
        let allocator = PortAllocator::new(16);
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let port = listener.local_addr().expect("addr").port();
        assert!(matches!(
            allocator.reserve(port),
            Err(HarnessError::PortInUse { .. })
        ));
    }

    #[test]
    fn concurrent_allocations_never_collide() {
        let allocator = Arc::new(PortAllocator::new(32));
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                thread::spawn(move || {
                    (0..4)
                        .map(|_| allocator.allocate().expect("allocate"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut seen = HashSet::new();
        for worker in workers {
            for port in worker.join().expect("worker") {
                assert!(seen.insert(port), "port {port} handed out twice");
            }
        }
        assert_eq!(seen.len(), 32);
    }
}
