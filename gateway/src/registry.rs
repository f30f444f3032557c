//! Port Registry: tracks which public ports the administrator has made
//! available (as ranges or individual pins) and which of those are currently
//! bound to a Mapping. Allocation policy is deterministic: a requested
//! preferred port wins if it is enabled and free, otherwise the numerically
//! smallest available port is handed out.

use std::collections::HashSet;

use ahash::AHashSet;
use parking_lot::Mutex;
use portpool::PortRange;
use serde::Serialize;

use crate::{
    config::{PortRangeSpec, SpecificPortSpec},
    error::AllocationError,
};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PortSpecKind {
    Range,
    Singleton,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailablePort {
    pub port: u16,
    pub kind: PortSpecKind,
    pub source_id: u64,
}

struct Inner {
    ranges: Vec<(u64, PortRange)>,
    singletons: Vec<(u64, u16)>,
    reserved: AHashSet<u16>,
    bound: AHashSet<u16>,
}

impl Inner {
    fn is_enabled(&self, port: u16) -> Option<(PortSpecKind, u64)> {
        if let Some((id, _)) = self.singletons.iter().find(|(_, p)| *p == port) {
            return Some((PortSpecKind::Singleton, *id));
        }
        self.ranges
            .iter()
            .find(|(_, range)| range.contains(port))
            .map(|(id, _)| (PortSpecKind::Range, *id))
    }

    fn is_available(&self, port: u16) -> bool {
        !self.reserved.contains(&port) && !self.bound.contains(&port) && self.is_enabled(port).is_some()
    }

    fn smallest_available(&self) -> Option<u16> {
        let mut candidates: Vec<u16> = Vec::new();
        for (_, range) in &self.ranges {
            for port in range.start..=range.end {
                if self.is_available(port) {
                    candidates.push(port);
                }
            }
        }
        for (_, port) in &self.singletons {
            if self.is_available(*port) {
                candidates.push(*port);
            }
        }
        candidates.into_iter().min()
    }
}

pub struct PortRegistry {
    inner: Mutex<Inner>,
}

impl PortRegistry {
    pub fn new(
        ranges: &[PortRangeSpec],
        singletons: &[SpecificPortSpec],
        reserved: HashSet<u16>,
    ) -> Self {
        let ranges = ranges
            .iter()
            .filter(|r| r.enabled)
            .map(|r| (r.id, PortRange { start: r.start, end: r.end }))
            .collect();
        let singletons = singletons
            .iter()
            .filter(|s| s.enabled)
            .map(|s| (s.id, s.port))
            .collect();

        Self {
            inner: Mutex::new(Inner {
                ranges,
                singletons,
                reserved: reserved.into_iter().collect(),
                bound: AHashSet::new(),
            }),
        }
    }

    /// List all enabled ports not currently bound or reserved.
    pub fn list_available(&self) -> Vec<AvailablePort> {
        let inner = self.inner.lock();
        let mut out = Vec::new();
        for (_, range) in &inner.ranges {
            for port in range.start..=range.end {
                if inner.is_available(port) {
                    let (kind, source_id) = inner.is_enabled(port).unwrap();
                    out.push(AvailablePort { port, kind, source_id });
                }
            }
        }
        for (id, port) in &inner.singletons {
            if inner.is_available(*port) {
                out.push(AvailablePort {
                    port: *port,
                    kind: PortSpecKind::Singleton,
                    source_id: *id,
                });
            }
        }
        out.sort_by_key(|p| p.port);
        out
    }

    /// Allocate a port. If `preferred` is enabled and free it is returned
    /// as-is; otherwise the smallest available port is returned. Marks the
    /// chosen port bound before returning it.
    pub fn allocate(&self, preferred: Option<u16>) -> Result<u16, AllocationError> {
        let mut inner = self.inner.lock();

        if let Some(port) = preferred {
            if inner.is_available(port) {
                inner.bound.insert(port);
                return Ok(port);
            }
        }

        let port = inner.smallest_available().ok_or(AllocationError::NoPortAvailable)?;
        inner.bound.insert(port);
        Ok(port)
    }

    /// Release a previously-allocated port. Idempotent.
    pub fn release(&self, port: u16) {
        self.inner.lock().bound.remove(&port);
    }

    pub fn is_bound(&self, port: u16) -> bool {
        self.inner.lock().bound.contains(&port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PortRegistry {
        PortRegistry::new(
            &[PortRangeSpec { id: 1, start: 20000, end: 20003, enabled: true }],
            &[SpecificPortSpec { id: 2, port: 25565, enabled: true }],
            [9000, 8088].into_iter().collect(),
        )
    }

    #[test]
    fn preferred_port_honored_when_free() {
        let reg = registry();
        assert_eq!(reg.allocate(Some(20002)).unwrap(), 20002);
    }

    #[test]
    fn falls_back_to_smallest_when_preferred_taken() {
        let reg = registry();
        assert_eq!(reg.allocate(Some(20000)).unwrap(), 20000);
        assert_eq!(reg.allocate(Some(20000)).unwrap(), 20001);
    }

    #[test]
    fn reserved_ports_are_never_handed_out() {
        let reg = registry();
        assert_eq!(reg.allocate(Some(9000)).unwrap(), 20000);
    }

    #[test]
    fn exhaustion_raises_no_port_available() {
        let reg = registry();
        for _ in 0..5 {
            let _ = reg.allocate(None);
        }
        assert!(matches!(reg.allocate(None), Err(AllocationError::NoPortAvailable)));
    }

    #[test]
    fn release_makes_the_port_available_again() {
        let reg = registry();
        let port = reg.allocate(None).unwrap();
        reg.release(port);
        reg.release(port);
        assert!(!reg.is_bound(port));
    }

    #[test]
    fn singleton_ports_are_allocatable_by_preference() {
        let reg = registry();
        assert_eq!(reg.allocate(Some(25565)).unwrap(), 25565);
    }
}
