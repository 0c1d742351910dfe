//! Network identity management
//!
//! Provides:
//! - MAC address generation
//! - The leasable address range
//! - The file-backed lease store and its allocator
//! - Tap interface and bridge operations through helper commands

pub mod allocator;
pub mod consumer;
pub mod lease;
pub mod mac;
pub mod range;
pub mod tap;

pub use allocator::AddressAllocator;
pub use consumer::CommandConsumer;
pub use lease::{LeaseRecord, LeaseStore};
pub use mac::MacAddr;
pub use range::AddressRange;
pub use tap::{CommandHelper, NetworkHelper, TapDevice};
