//! Acquire, run, tear down
//!
//! A run moves forward one stage at a time:
//!
//! 1. resolve a free instance slot
//! 2. lease a MAC and IP
//! 3. publish the identity file
//! 4. publish MAC, IP and identity file path into the child's environment
//! 5. create a tap device for the invoking user
//! 6. attach it to the bridge and bring it up
//! 7. publish the interface name
//! 8. run the command as the invoking user and wait for it
//!
//! Whatever happens, the lease token is torn down afterwards. The first
//! error is the one reported; teardown failures are only logged.

use crate::berth::signals;
use crate::berth::state::{BerthMachineEvent, Progress, Stage};
use crate::berth::{Environment, IdentityFile, LeaseToken, TeardownReport, next_free_slot};
use crate::error::{Error, Result};
use crate::network::{AddressAllocator, NetworkHelper};
use nix::unistd::{Gid, Uid};
use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use tracing::{debug, error, info};

/// The user the protected command runs as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invoker {
    pub uid: Uid,
    pub gid: Gid,
    /// Running with an effective identity other than the real one
    pub elevated: bool,
}

impl Invoker {
    /// The real user of this process
    pub fn current() -> Self {
        let uid = Uid::current();
        let gid = Gid::current();
        Self {
            uid,
            gid,
            elevated: Uid::effective() != uid || Gid::effective() != gid,
        }
    }
}

/// Result of one lifecycle run
#[derive(Debug)]
pub struct Outcome {
    /// Furthest stage reached
    pub stage: Stage,
    /// Child exit status, or the error that stopped forward progress
    pub result: Result<ExitStatus>,
    /// Undo actions performed afterwards
    pub teardown: TeardownReport,
}

impl Outcome {
    /// Status to exit with
    ///
    /// The child's own code when it exited, 128 + signal when it was
    /// killed, otherwise the stage-specific failure code.
    pub fn exit_code(&self) -> i32 {
        match &self.result {
            Ok(status) => status
                .code()
                .or_else(|| status.signal().map(|sig| 128 + sig))
                .unwrap_or(1),
            Err(e) => e.exit_code(),
        }
    }
}

/// Runs commands with a leased network identity
pub struct Lifecycle<H: NetworkHelper> {
    allocator: AddressAllocator,
    helper: H,
    bridge: String,
    identity_dir: PathBuf,
    invoker: Invoker,
}

impl<H: NetworkHelper> Lifecycle<H> {
    pub fn new(
        allocator: AddressAllocator,
        helper: H,
        bridge: impl Into<String>,
        identity_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            allocator,
            helper,
            bridge: bridge.into(),
            identity_dir: identity_dir.into(),
            invoker: Invoker::current(),
        }
    }

    /// Override the user the command runs as
    pub fn invoker(mut self, invoker: Invoker) -> Self {
        self.invoker = invoker;
        self
    }

    pub fn allocator(&self) -> &AddressAllocator {
        &self.allocator
    }

    /// Run `command` with a fresh identity layered over `env`
    pub fn run(&self, env: Environment, command: &[String]) -> Outcome {
        let mut progress = Progress::new();
        let mut token = LeaseToken::default();

        let result = self.acquire_and_run(&mut progress, &mut token, env, command);
        let stage = progress.stage();

        if let Err(e) = &result {
            error!(stage = %stage, step = stage.next_step(), error = %e, "Lifecycle failed");
        }

        let teardown = token.teardown(&self.helper, &self.allocator);
        if let Err(e) = progress.advance(BerthMachineEvent::Release) {
            debug!(error = %e, "Release transition rejected");
        }

        Outcome {
            stage,
            result,
            teardown,
        }
    }

    fn acquire_and_run(
        &self,
        progress: &mut Progress,
        token: &mut LeaseToken,
        mut env: Environment,
        command: &[String],
    ) -> Result<ExitStatus> {
        let slot = next_free_slot(&env, self.allocator.capacity())?;
        token.slot = Some(slot);
        progress.advance(BerthMachineEvent::Resolve)?;
        let vars = slot.vars();

        let lease = self.allocator.acquire()?;
        token.lease = Some(lease);
        progress.advance(BerthMachineEvent::Lease)?;

        let marker = IdentityFile::publish(&self.identity_dir, &lease.mac, self.invoker.uid)?;
        let marker_path = marker.path().to_path_buf();
        token.marker = Some(marker);
        progress.advance(BerthMachineEvent::Mark)?;

        env.set(&vars.macfile, &marker_path);
        env.set(&vars.macaddr, lease.mac.to_string());
        env.set(&vars.ipaddr, lease.ip.to_string());
        progress.advance(BerthMachineEvent::Expose)?;

        let tap = self.helper.create_interface(self.invoker.uid.as_raw())?;
        let iface = tap.name.clone();
        token.interface = Some(tap);
        progress.advance(BerthMachineEvent::Create)?;

        self.helper.attach(&self.bridge, &iface)?;
        token.bridge = Some(self.bridge.clone());
        self.helper.set_up(&iface)?;
        progress.advance(BerthMachineEvent::Attach)?;

        env.set(&vars.iface, &iface);
        progress.advance(BerthMachineEvent::Announce)?;

        info!(
            slot = %slot,
            mac = %lease.mac,
            ip = %lease.ip,
            iface = %iface,
            bridge = %self.bridge,
            "Identity ready"
        );

        let status = self.execute(&env, command)?;
        progress.advance(BerthMachineEvent::Execute)?;
        Ok(status)
    }

    /// Start the command as the invoking user and wait for it
    fn execute(&self, env: &Environment, command: &[String]) -> Result<ExitStatus> {
        let Some((program, args)) = command.split_first() else {
            return Err(Error::ChildLaunch {
                program: String::new(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "no command given"),
            });
        };

        let mut cmd = Command::new(program);
        cmd.args(args).env_clear().envs(env.iter());

        if self.invoker.elevated {
            cmd.uid(self.invoker.uid.as_raw())
                .gid(self.invoker.gid.as_raw());
        }

        let deferred = signals::defer_forwarded()?;
        let spawned = cmd.spawn();
        if let Ok(child) = &spawned {
            signals::track_child(child.id());
        }
        drop(deferred);

        let mut child = spawned.map_err(|e| Error::ChildLaunch {
            program: program.clone(),
            source: e,
        })?;

        let pid = child.id();
        let waited = child.wait();
        signals::untrack_child();

        let status = waited?;
        info!(pid, status = %status, "Command finished");
        Ok(status)
    }
}
