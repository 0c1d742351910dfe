//! Instance slots
//!
//! One invocation can run inside another (a test harness leasing a second
//! NIC for a VM that already has one). Each leased identity publishes its
//! variables under a slot: slot 1 uses the bare names (`MACADDR`), slot N
//! appends the number (`MACADDR2`). The first slot whose identity file
//! variable is unbound is free.

use crate::berth::Environment;
use crate::error::{Error, Result};
use std::fmt;

/// Path of the identity marker file
pub const MACFILE_VAR: &str = "MACFILE";
/// Colon-separated MAC address
pub const MACADDR_VAR: &str = "MACADDR";
/// Dotted IPv4 address
pub const IPADDR_VAR: &str = "IPADDR";
/// Tap interface name
pub const IFACE_VAR: &str = "IFACE";

/// Index of one leased identity in an environment, starting at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceSlot(usize);

impl InstanceSlot {
    pub const FIRST: Self = Self(1);

    /// Slot number `n`; zero is not a slot
    pub fn new(n: usize) -> Option<Self> {
        (n >= 1).then_some(Self(n))
    }

    pub fn get(&self) -> usize {
        self.0
    }

    /// Variable name for `base` in this slot
    pub fn var(&self, base: &str) -> String {
        if self.0 == 1 {
            base.to_string()
        } else {
            format!("{}{}", base, self.0)
        }
    }

    pub fn vars(&self) -> SlotVars {
        SlotVars {
            macfile: self.var(MACFILE_VAR),
            macaddr: self.var(MACADDR_VAR),
            ipaddr: self.var(IPADDR_VAR),
            iface: self.var(IFACE_VAR),
        }
    }
}

impl fmt::Display for InstanceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Variable names published for one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotVars {
    pub macfile: String,
    pub macaddr: String,
    pub ipaddr: String,
    pub iface: String,
}

/// Find the first slot up to `max` whose identity file variable is unbound
pub fn next_free_slot(env: &Environment, max: usize) -> Result<InstanceSlot> {
    (1..=max)
        .map(InstanceSlot)
        .find(|slot| !env.contains(slot.var(MACFILE_VAR)))
        .ok_or(Error::NoFreeSlot { max })
}
