//! Address allocation policy
//!
//! Binds a lease store to the deployment's address range. All state lives
//! in the store.

use crate::error::Result;
use crate::network::{AddressRange, LeaseRecord, LeaseStore};

/// Hands out MAC/IP identities from a fixed range
#[derive(Debug)]
pub struct AddressAllocator {
    store: LeaseStore,
    range: AddressRange,
}

impl AddressAllocator {
    pub fn new(store: LeaseStore, range: AddressRange) -> Self {
        Self { store, range }
    }

    pub fn range(&self) -> &AddressRange {
        &self.range
    }

    pub fn store(&self) -> &LeaseStore {
        &self.store
    }

    /// Maximum identities that can be leased at once
    pub fn capacity(&self) -> usize {
        self.range.capacity()
    }

    /// Lease a new identity
    pub fn acquire(&self) -> Result<LeaseRecord> {
        self.store.add(&self.range)
    }

    /// Return an identity; releasing twice is harmless
    pub fn release(&self, record: &LeaseRecord) -> Result<bool> {
        self.store.remove(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::net::Ipv4Addr;

    fn allocator(dir: &tempfile::TempDir, low: u8, high: u8) -> AddressAllocator {
        let store = LeaseStore::new(dir.path().join("leases"), dir.path().join("leases.new"));
        let range = AddressRange::new("192.168.23.0/24".parse().unwrap(), low, high).unwrap();
        AddressAllocator::new(store, range)
    }

    #[test]
    fn test_lowest_free_policy() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = allocator(&dir, 151, 253);

        let first = allocator.acquire().unwrap();
        assert_eq!(first.ip, Ipv4Addr::new(192, 168, 23, 151));

        let second = allocator.acquire().unwrap();
        assert_eq!(second.ip, Ipv4Addr::new(192, 168, 23, 152));
        assert_ne!(first.mac, second.mac);

        allocator.release(&first).unwrap();
        let third = allocator.acquire().unwrap();
        assert_eq!(third.ip, Ipv4Addr::new(192, 168, 23, 151));
    }

    #[test]
    fn test_exhaustion_is_loud() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = allocator(&dir, 10, 11);
        assert_eq!(allocator.capacity(), 2);

        allocator.acquire().unwrap();
        allocator.acquire().unwrap();
        let err = allocator.acquire().unwrap_err();
        assert!(matches!(err, Error::AddressSpaceExhausted { .. }));
        assert_eq!(err.exit_code(), 71);
    }
}
