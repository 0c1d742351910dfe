//! Per-invocation identity lifecycle
//!
//! A berth is one leased identity (slot, MAC, IP, tap device) held for the
//! lifetime of a single protected command.

pub mod env;
pub mod identity;
pub mod lifecycle;
pub mod signals;
pub mod slot;
pub mod state;
pub mod token;

pub use env::Environment;
pub use identity::IdentityFile;
pub use lifecycle::{Invoker, Lifecycle};
pub use signals::SignalGuard;
pub use slot::{InstanceSlot, next_free_slot};
pub use token::{LeaseToken, TeardownReport, TeardownStep};
