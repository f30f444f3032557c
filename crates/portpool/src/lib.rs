//! Bitmap-backed tracking of which ports in a [`PortRange`] are currently in
//! use. [`PortAllocator`] only knows about bits; it has no notion of TCP vs.
//! UDP, ranges vs. singletons, or which ports are process-reserved — that
//! policy lives one layer up, in the Gateway's Port Registry.

use std::str::FromStr;

use rand::Rng;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn size(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 49152,
            end: 65535,
        }
    }
}

impl From<std::ops::Range<u16>> for PortRange {
    fn from(range: std::ops::Range<u16>) -> Self {
        assert!(range.start <= range.end);

        Self {
            start: range.start,
            end: range.end.saturating_sub(1).max(range.start),
        }
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[derive(Debug)]
pub struct PortRangeParseError(String);

impl std::error::Error for PortRangeParseError {}

impl std::fmt::Display for PortRangeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<std::num::ParseIntError> for PortRangeParseError {
    fn from(error: std::num::ParseIntError) -> Self {
        PortRangeParseError(error.to_string())
    }
}

impl FromStr for PortRange {
    type Err = PortRangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once("..")
            .ok_or_else(|| PortRangeParseError(s.to_string()))?;

        Ok(Self {
            start: start.parse()?,
            end: end.parse()?,
        })
    }
}

#[cfg(feature = "serde")]
impl Serialize for PortRange {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for PortRange {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(|e| serde::de::Error::custom(e.0))
    }
}

#[derive(PartialEq, Eq)]
enum Bit {
    Low,
    High,
}

/// A bitmap over a [`PortRange`], one bit per port, tracking which ports are
/// currently allocated.
pub struct PortAllocator {
    port_range: PortRange,
    buckets: Vec<u64>,
    allocated: usize,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(PortRange::default())
    }
}

impl PortAllocator {
    pub fn new(port_range: PortRange) -> Self {
        let capacity = port_range.size();
        let bucket_count = (capacity as f32 / 64.0).ceil() as usize;

        Self {
            buckets: vec![0; bucket_count.max(1)],
            allocated: 0,
            port_range,
        }
    }

    pub fn capacity(&self) -> usize {
        self.port_range.size()
    }

    pub fn port_range(&self) -> &PortRange {
        &self.port_range
    }

    pub fn len(&self) -> usize {
        self.allocated
    }

    pub fn is_empty(&self) -> bool {
        self.allocated == 0
    }

    fn locate(&self, port: u16) -> Option<(usize, usize)> {
        if !self.port_range.contains(port) {
            return None;
        }

        let offset = (port - self.port_range.start) as usize;
        Some((offset / 64, offset % 64))
    }

    fn get_bit(&self, bucket: usize, index: usize) -> Bit {
        if (self.buckets[bucket] >> (63 - index)) & 1 == 1 {
            Bit::High
        } else {
            Bit::Low
        }
    }

    fn set_bit(&mut self, bucket: usize, index: usize, bit: Bit) {
        let mask = 1u64 << (63 - index);
        self.buckets[bucket] = match bit {
            Bit::High => self.buckets[bucket] | mask,
            Bit::Low => self.buckets[bucket] & !mask,
        };
    }

    /// Is `port` inside the range and currently free?
    pub fn is_free(&self, port: u16) -> bool {
        match self.locate(port) {
            Some((bucket, index)) => self.get_bit(bucket, index) == Bit::Low,
            None => false,
        }
    }

    /// Reserve a specific port. Returns `false` if it is out of range or
    /// already reserved.
    ///
    /// # Examples
    ///
    /// ```
    /// use portpool::{PortAllocator, PortRange};
    ///
    /// let mut pool = PortAllocator::new(PortRange::from(50000..50010));
    /// assert!(pool.reserve_specific(50000));
    /// assert!(!pool.reserve_specific(50000));
    /// ```
    pub fn reserve_specific(&mut self, port: u16) -> bool {
        match self.locate(port) {
            Some((bucket, index)) if self.get_bit(bucket, index) == Bit::Low => {
                self.set_bit(bucket, index, Bit::High);
                self.allocated += 1;
                true
            }
            _ => false,
        }
    }

    /// Find the numerically smallest free port, without reserving it.
    ///
    /// # Examples
    ///
    /// ```
    /// use portpool::{PortAllocator, PortRange};
    ///
    /// let mut pool = PortAllocator::new(PortRange::from(50000..50010));
    /// assert_eq!(pool.lowest_free(), Some(50000));
    /// pool.reserve_specific(50000);
    /// assert_eq!(pool.lowest_free(), Some(50001));
    /// ```
    pub fn lowest_free(&self) -> Option<u16> {
        for port in self.port_range.start..=self.port_range.end {
            if self.is_free(port) {
                return Some(port);
            }
        }
        None
    }

    /// Release a port back to the free set. Idempotent: releasing an
    /// already-free port is a no-op.
    ///
    /// # Examples
    ///
    /// ```
    /// use portpool::{PortAllocator, PortRange};
    ///
    /// let mut pool = PortAllocator::new(PortRange::from(50000..50010));
    /// pool.reserve_specific(50000);
    /// pool.release(50000);
    /// pool.release(50000);
    /// assert_eq!(pool.lowest_free(), Some(50000));
    /// ```
    pub fn release(&mut self, port: u16) {
        if let Some((bucket, index)) = self.locate(port) {
            if self.get_bit(bucket, index) == Bit::High {
                self.set_bit(bucket, index, Bit::Low);
                self.allocated -= 1;
            }
        }
    }

    /// Reserve a pseudo-random free port, falling back to a linear scan when
    /// the random start is already taken. Not used by the deterministic Port
    /// Registry, but kept as a general-purpose allocation strategy.
    pub fn alloc_random(&mut self) -> Option<u16> {
        let capacity = self.capacity();
        if self.allocated >= capacity {
            return None;
        }

        let start = rand::rng().random_range(0..capacity) as u16;
        for delta in 0..capacity as u16 {
            let candidate = self.port_range.start + (start + delta) % capacity as u16;
            if self.reserve_specific(candidate) {
                return Some(candidate);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn exhausts_the_whole_range() {
        let mut pool = PortAllocator::new(PortRange::from(50000..50010));
        let mut seen = HashSet::new();

        while let Some(port) = pool.alloc_random() {
            assert!(seen.insert(port));
        }

        assert_eq!(seen.len(), pool.capacity());
        assert!(pool.lowest_free().is_none());
    }

    #[test]
    fn restore_then_allocate_returns_same_port() {
        let mut pool = PortAllocator::new(PortRange::from(50000..50010));
        assert!(pool.reserve_specific(50000));
        pool.release(50000);
        assert_eq!(pool.lowest_free(), Some(50000));
        assert!(pool.reserve_specific(50000));
    }

    #[test]
    fn capacity_matches_inclusive_range() {
        let pool = PortAllocator::new(PortRange::from(49152..65535));
        assert_eq!(pool.capacity(), 65535 - 49152);
    }

    #[test]
    fn port_range_string_round_trip() {
        let range = PortRange::from(49152..65535);
        let parsed: PortRange = range.to_string().parse().unwrap();
        assert_eq!(range, parsed);
    }
}
