//! Fixed IPv4 address block leases are drawn from
//!
//! The block is a network prefix of /24 or longer plus an inclusive range
//! of host octets. Addresses below `low` and above `high` stay free for
//! statically assigned hosts.

use crate::error::{Error, Result};
use ipnet::Ipv4Net;
use std::fmt;
use std::net::Ipv4Addr;

/// Default deployment network
pub const DEFAULT_NETWORK: &str = "192.168.23.0/24";
/// Default lowest leasable host octet
pub const DEFAULT_LOW: u8 = 151;
/// Default highest leasable host octet
pub const DEFAULT_HIGH: u8 = 253;

/// An inclusive range of leasable IPv4 host addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    network: Ipv4Net,
    low: u8,
    high: u8,
}

impl AddressRange {
    /// Create a new range, validating that both bounds are usable hosts
    pub fn new(network: Ipv4Net, low: u8, high: u8) -> Result<Self> {
        let network = network.trunc();

        if network.prefix_len() < 24 {
            return Err(Error::ConfigValidation(format!(
                "Network {} is wider than /24; only the last octet is leased",
                network
            )));
        }

        if low > high {
            return Err(Error::ConfigValidation(format!(
                "Range low bound {} is above high bound {}",
                low, high
            )));
        }

        let range = Self { network, low, high };
        for bound in [low, high] {
            let addr = range.host(bound);
            if !network.contains(&addr) || addr == network.network() || addr == network.broadcast()
            {
                return Err(Error::ConfigValidation(format!(
                    "Address {} is not a usable host in {}",
                    addr, network
                )));
            }
        }

        Ok(range)
    }

    pub fn network(&self) -> Ipv4Net {
        self.network
    }

    pub fn low(&self) -> u8 {
        self.low
    }

    pub fn high(&self) -> u8 {
        self.high
    }

    /// Address with the given host octet in this network
    pub fn host(&self, octet: u8) -> Ipv4Addr {
        let [a, b, c, _] = self.network.network().octets();
        Ipv4Addr::new(a, b, c, octet)
    }

    /// Check whether an address is leasable from this range
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let [.., last] = addr.octets();
        self.network.contains(&addr) && (self.low..=self.high).contains(&last)
    }

    /// Number of leasable addresses
    pub fn capacity(&self) -> usize {
        usize::from(self.high - self.low) + 1
    }

    /// Leasable addresses in ascending order
    pub fn iter(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        (self.low..=self.high).map(|octet| self.host(octet))
    }
}

impl Default for AddressRange {
    fn default() -> Self {
        Self {
            network: Ipv4Net::new_assert(Ipv4Addr::new(192, 168, 23, 0), 24),
            low: DEFAULT_LOW,
            high: DEFAULT_HIGH,
        }
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.host(self.low), self.host(self.high))
    }
}
