//! Lifecycle progress state machine
//!
//! Tracks how far acquisition got, using the state-machines crate in
//! dynamic dispatch mode. The state is diagnostic: what to undo is decided
//! by the lease token, not by the state name.

use crate::error::Error;
use state_machines::state_machine;
use std::fmt;

state_machine! {
    name: BerthMachine,
    dynamic: true,
    initial: Idle,
    states: [
        Idle,
        SlotResolved,
        LeaseAcquired,
        IdentityFilePublished,
        EnvironmentPublished,
        InterfaceAcquired,
        BridgeAttached,
        InterfaceEnvironmentPublished,
        ChildExecuted,
        Released
    ],
    events {
        resolve {
            transition: { from: Idle, to: SlotResolved }
        }
        lease {
            transition: { from: SlotResolved, to: LeaseAcquired }
        }
        mark {
            transition: { from: LeaseAcquired, to: IdentityFilePublished }
        }
        expose {
            transition: { from: IdentityFilePublished, to: EnvironmentPublished }
        }
        create {
            transition: { from: EnvironmentPublished, to: InterfaceAcquired }
        }
        attach {
            transition: { from: InterfaceAcquired, to: BridgeAttached }
        }
        announce {
            transition: { from: BridgeAttached, to: InterfaceEnvironmentPublished }
        }
        execute {
            transition: { from: InterfaceEnvironmentPublished, to: ChildExecuted }
        }
        release {
            transition: {
                from: [
                    Idle,
                    SlotResolved,
                    LeaseAcquired,
                    IdentityFilePublished,
                    EnvironmentPublished,
                    InterfaceAcquired,
                    BridgeAttached,
                    InterfaceEnvironmentPublished,
                    ChildExecuted
                ],
                to: Released
            }
        }
    }
}

/// Lifecycle stage, in forward order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Idle,
    SlotResolved,
    LeaseAcquired,
    IdentityFilePublished,
    EnvironmentPublished,
    InterfaceAcquired,
    BridgeAttached,
    InterfaceEnvironmentPublished,
    ChildExecuted,
    Released,
}

impl Stage {
    /// Parse stage from the machine's state name
    pub fn from_name(s: &str) -> Option<Self> {
        Some(match s {
            "Idle" => Stage::Idle,
            "SlotResolved" => Stage::SlotResolved,
            "LeaseAcquired" => Stage::LeaseAcquired,
            "IdentityFilePublished" => Stage::IdentityFilePublished,
            "EnvironmentPublished" => Stage::EnvironmentPublished,
            "InterfaceAcquired" => Stage::InterfaceAcquired,
            "BridgeAttached" => Stage::BridgeAttached,
            "InterfaceEnvironmentPublished" => Stage::InterfaceEnvironmentPublished,
            "ChildExecuted" => Stage::ChildExecuted,
            "Released" => Stage::Released,
            _ => return None,
        })
    }

    /// The step that runs after this stage, for diagnostics
    pub fn next_step(&self) -> &'static str {
        match self {
            Stage::Idle => "resolve instance slot",
            Stage::SlotResolved => "acquire lease",
            Stage::LeaseAcquired => "publish identity file",
            Stage::IdentityFilePublished => "publish environment",
            Stage::EnvironmentPublished => "create interface",
            Stage::InterfaceAcquired => "attach bridge",
            Stage::BridgeAttached => "publish interface",
            Stage::InterfaceEnvironmentPublished => "execute command",
            Stage::ChildExecuted | Stage::Released => "teardown",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Progress of one lifecycle run
pub struct Progress {
    machine: DynamicBerthMachine<()>,
}

impl Progress {
    pub fn new() -> Self {
        Self {
            machine: BerthMachine::new(()).into_dynamic(),
        }
    }

    /// Current stage
    pub fn stage(&self) -> Stage {
        Stage::from_name(self.machine.current_state()).unwrap_or(Stage::Idle)
    }

    /// Fire an event, failing on an out-of-order transition
    pub fn advance(&mut self, event: BerthMachineEvent) -> crate::error::Result<Stage> {
        let from = self.stage();
        self.machine.handle(event).map_err(|e| {
            Error::Transition(format!("from {}: {:?}", from, e))
        })?;
        Ok(self.stage())
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}
