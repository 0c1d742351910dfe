//! Lease ownership token and ordered teardown
//!
//! Each acquisition step fills one field. Teardown undoes exactly the
//! filled fields in reverse order: bridge membership, interface, identity
//! file, lease. Every step runs even if an earlier one failed.

use crate::berth::{IdentityFile, InstanceSlot};
use crate::error::Result;
use crate::network::{AddressAllocator, LeaseRecord, NetworkHelper, TapDevice};
use std::fmt;
use tracing::{debug, warn};

/// Resources held by one lifecycle run
#[derive(Debug, Default)]
pub struct LeaseToken {
    pub slot: Option<InstanceSlot>,
    pub lease: Option<LeaseRecord>,
    pub marker: Option<IdentityFile>,
    pub interface: Option<TapDevice>,
    /// Bridge the interface was added to
    pub bridge: Option<String>,
}

/// One undo action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    DetachBridge,
    DestroyInterface,
    RemoveIdentityFile,
    ReleaseLease,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TeardownStep::DetachBridge => "detach bridge",
            TeardownStep::DestroyInterface => "destroy interface",
            TeardownStep::RemoveIdentityFile => "remove identity file",
            TeardownStep::ReleaseLease => "release lease",
        };
        write!(f, "{}", s)
    }
}

/// What teardown did, in execution order
#[derive(Debug, Default)]
pub struct TeardownReport {
    entries: Vec<(TeardownStep, Option<String>)>,
}

impl TeardownReport {
    fn record(&mut self, step: TeardownStep, result: Result<()>) {
        let failure = result.err().map(|e| {
            warn!(step = %step, error = %e, "Teardown step failed");
            e.to_string()
        });
        if failure.is_none() {
            debug!(step = %step, "Teardown step done");
        }
        self.entries.push((step, failure));
    }

    /// Steps attempted, in order
    pub fn steps(&self) -> Vec<TeardownStep> {
        self.entries.iter().map(|(step, _)| *step).collect()
    }

    /// Steps that failed with their messages
    pub fn failures(&self) -> impl Iterator<Item = (TeardownStep, &str)> {
        self.entries
            .iter()
            .filter_map(|(step, err)| err.as_deref().map(|e| (*step, e)))
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

impl LeaseToken {
    /// Undo everything this token holds
    ///
    /// Fields are taken as they are undone, so a second call does nothing.
    pub fn teardown(
        &mut self,
        helper: &dyn NetworkHelper,
        allocator: &AddressAllocator,
    ) -> TeardownReport {
        let mut report = TeardownReport::default();

        if let Some(bridge) = self.bridge.take()
            && let Some(iface) = &self.interface
        {
            report.record(TeardownStep::DetachBridge, helper.detach(&bridge, &iface.name));
        }

        if let Some(iface) = self.interface.take() {
            report.record(
                TeardownStep::DestroyInterface,
                helper.destroy_interface(&iface.name),
            );
        }

        if let Some(marker) = self.marker.take() {
            report.record(TeardownStep::RemoveIdentityFile, marker.remove());
        }

        if let Some(lease) = self.lease.take() {
            report.record(TeardownStep::ReleaseLease, allocator.release(&lease).map(drop));
        }

        self.slot = None;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::tap::tests::FakeHelper;
    use crate::network::{AddressRange, LeaseStore};
    use nix::unistd::Uid;

    fn allocator(dir: &tempfile::TempDir) -> AddressAllocator {
        AddressAllocator::new(
            LeaseStore::new(dir.path().join("leases"), dir.path().join("leases.new")),
            AddressRange::default(),
        )
    }

    #[test]
    fn test_empty_token_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let helper = FakeHelper::default();
        let report = LeaseToken::default().teardown(&helper, &allocator(&dir));

        assert!(report.steps().is_empty());
        assert!(report.is_clean());
        assert!(helper.calls().is_empty());
    }

    #[test]
    fn test_full_token_reverse_order() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = allocator(&dir);
        let helper = FakeHelper::default();

        let lease = allocator.acquire().unwrap();
        let marker = IdentityFile::publish(dir.path(), &lease.mac, Uid::current()).unwrap();
        let marker_path = marker.path().to_path_buf();
        let mut token = LeaseToken {
            slot: Some(InstanceSlot::FIRST),
            lease: Some(lease),
            marker: Some(marker),
            interface: Some(TapDevice {
                name: "tap7".to_string(),
                owner: 1000,
            }),
            bridge: Some("br1".to_string()),
        };

        let report = token.teardown(&helper, &allocator);
        assert_eq!(
            report.steps(),
            vec![
                TeardownStep::DetachBridge,
                TeardownStep::DestroyInterface,
                TeardownStep::RemoveIdentityFile,
                TeardownStep::ReleaseLease,
            ]
        );
        assert!(report.is_clean());
        assert_eq!(helper.calls(), vec!["detach br1 tap7", "destroy tap7"]);
        assert!(!marker_path.exists());
        assert!(allocator.store().records().unwrap().is_empty());

        // Idempotent
        assert!(token.teardown(&helper, &allocator).steps().is_empty());
    }

    #[test]
    fn test_failed_step_does_not_stop_later_steps() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = allocator(&dir);
        let helper = FakeHelper {
            fail_destroy: true,
            ..Default::default()
        };

        let lease = allocator.acquire().unwrap();
        let mut token = LeaseToken {
            lease: Some(lease),
            interface: Some(TapDevice {
                name: "tap7".to_string(),
                owner: 1000,
            }),
            ..Default::default()
        };

        let report = token.teardown(&helper, &allocator);
        assert_eq!(
            report.steps(),
            vec![TeardownStep::DestroyInterface, TeardownStep::ReleaseLease]
        );
        let failures: Vec<_> = report.failures().map(|(step, _)| step).collect();
        assert_eq!(failures, vec![TeardownStep::DestroyInterface]);
        assert!(allocator.store().records().unwrap().is_empty());
    }
}
