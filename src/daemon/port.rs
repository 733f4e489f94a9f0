use super::DaemonError;
use std::net::{Ipv4Addr, TcpListener};
use std::ops::RangeInclusive;

/// Dynamic/private port range scanned when the preferred port is taken.
pub const DYNAMIC_PORTS: RangeInclusive<u16> = 49152..=65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRequest {
    /// Use this port if free, otherwise any free port.
    Any(u16),
    /// Use exactly this port or fail.
    Pinned(u16),
}

/// Finds a bindable TCP port by probe-binding on the loopback interface.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    host: Ipv4Addr,
    range: RangeInclusive<u16>,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(Ipv4Addr::LOCALHOST, DYNAMIC_PORTS)
    }
}

impl PortAllocator {
    pub fn new(host: Ipv4Addr, range: RangeInclusive<u16>) -> Self {
        Self { host, range }
    }

    /// Binds and immediately releases `port`.
    pub fn is_available(&self, port: u16) -> bool {
        TcpListener::bind((self.host, port)).is_ok()
    }

    pub fn resolve(&self, request: PortRequest) -> Result<u16, DaemonError> {
        match request {
            PortRequest::Pinned(port) if self.is_available(port) => Ok(port),
            PortRequest::Pinned(port) => Err(DaemonError::PortUnavailable(port)),
            PortRequest::Any(preferred) => self.allocate(preferred),
        }
    }

    /// Returns `preferred` when bindable, else the first free port in range.
    pub fn allocate(&self, preferred: u16) -> Result<u16, DaemonError> {
        if preferred != 0 && self.is_available(preferred) {
            return Ok(preferred);
        }

        let port = self
            .range
            .clone()
            .find(|&port| port != preferred && self.is_available(port))
            .ok_or(DaemonError::PortsExhausted)?;
        tracing::info!(preferred, port, "Preferred port unavailable, using fallback");
        Ok(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound_port() -> (TcpListener, u16) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn free_port_is_returned_unchanged() {
        let (listener, port) = bound_port();
        drop(listener);

        let allocator = PortAllocator::default();
        assert_eq!(allocator.allocate(port).unwrap(), port);
    }

    #[test]
    fn taken_port_falls_back_to_a_bindable_one() {
        let (_listener, port) = bound_port();

        let allocator = PortAllocator::default();
        let allocated = allocator.allocate(port).unwrap();
        assert_ne!(allocated, port);
        assert!(TcpListener::bind((Ipv4Addr::LOCALHOST, allocated)).is_ok());
    }

    #[test]
    fn pinned_port_is_never_substituted() {
        let (_listener, port) = bound_port();

        let allocator = PortAllocator::default();
        assert!(matches!(
            allocator.resolve(PortRequest::Pinned(port)),
            Err(DaemonError::PortUnavailable(p)) if p == port
        ));
    }

    #[test]
    fn exhausted_range_is_reported() {
        let (_listener, port) = bound_port();

        let allocator = PortAllocator::new(Ipv4Addr::LOCALHOST, port..=port);
        assert!(matches!(
            allocator.allocate(port),
            Err(DaemonError::PortsExhausted)
        ));
    }
}
