//! Notifications to the process that consumes the lease store
//!
//! A DHCP server typically reads the lease file. It is paused while the
//! store is rewritten and resumed afterwards, even if the rewrite fails.

use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// A process that watches the lease store
pub trait StoreConsumer {
    /// Stop reading the store before it is replaced
    fn pause(&self);

    /// Resume reading the store after replacement
    fn resume(&self);
}

/// Consumer controlled by a pair of external commands
///
/// An empty command disables that notification.
#[derive(Debug, Clone, Default)]
pub struct CommandConsumer {
    pause: Vec<String>,
    resume: Vec<String>,
}

impl CommandConsumer {
    pub fn new(pause: Vec<String>, resume: Vec<String>) -> Self {
        Self { pause, resume }
    }

    fn run(&self, what: &str, argv: &[String]) {
        let Some((program, args)) = argv.split_first() else {
            return;
        };

        debug!(command = %argv.join(" "), "{} lease consumer", what);

        match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => {}
            Ok(status) => warn!(command = %argv.join(" "), %status, "Lease consumer {} failed", what),
            Err(e) => warn!(command = %argv.join(" "), error = %e, "Lease consumer {} failed", what),
        }
    }
}

impl StoreConsumer for CommandConsumer {
    fn pause(&self) {
        self.run("pause", &self.pause);
    }

    fn resume(&self) {
        self.run("resume", &self.resume);
    }
}

/// Keeps a consumer paused until dropped
pub struct Paused<'a> {
    consumer: &'a dyn StoreConsumer,
}

impl<'a> Paused<'a> {
    pub fn new(consumer: &'a dyn StoreConsumer) -> Self {
        consumer.pause();
        Self { consumer }
    }
}

impl Drop for Paused<'_> {
    fn drop(&mut self) {
        self.consumer.resume();
    }
}
