//! Tap interfaces and bridge membership via privileged helper commands
//!
//! The helpers (`tunctl`, `brctl`, `ifconfig`) do the actual work; this
//! module only builds their command lines, checks exit status and parses
//! the one line of output `tunctl` prints when it creates a device.

use crate::error::{Error, Result};
use nom::{
    Parser,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1, multispace0, space1},
    combinator::map_res,
    sequence::{delimited, preceded},
};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// A tap device created for the invoking user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapDevice {
    /// Interface name (e.g., "tap3")
    pub name: String,
    /// Owning uid reported by the helper
    pub owner: u32,
}

/// Privileged operations on virtual interfaces
///
/// Implementations must treat destroying or detaching an interface that
/// no longer exists as success.
pub trait NetworkHelper {
    /// Create a persistent tap device owned by `uid`
    fn create_interface(&self, uid: u32) -> Result<TapDevice>;

    /// Add an interface to a bridge
    fn attach(&self, bridge: &str, iface: &str) -> Result<()>;

    /// Bring an interface administratively up
    fn set_up(&self, iface: &str) -> Result<()>;

    /// Remove an interface from a bridge
    fn detach(&self, bridge: &str, iface: &str) -> Result<()>;

    /// Destroy a tap device
    fn destroy_interface(&self, iface: &str) -> Result<()>;
}

/// Helper backed by the classic bridge-utils/uml-utilities binaries
#[derive(Debug, Clone)]
pub struct CommandHelper {
    pub tunctl: PathBuf,
    pub brctl: PathBuf,
    pub ifconfig: PathBuf,
}

impl Default for CommandHelper {
    fn default() -> Self {
        Self {
            tunctl: PathBuf::from("/usr/sbin/tunctl"),
            brctl: PathBuf::from("/usr/sbin/brctl"),
            ifconfig: PathBuf::from("/sbin/ifconfig"),
        }
    }
}

impl CommandHelper {
    /// Run a helper, returning stdout on success
    fn run(&self, program: &Path, args: &[&str]) -> Result<String> {
        let command = format!("{} {}", program.display(), args.join(" "));
        debug!(command = %command, "Running network helper");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::HelperFailed {
                command: command.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::HelperFailed {
                command,
                message: format!("{}: {}", output.status, stderr.trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl NetworkHelper for CommandHelper {
    fn create_interface(&self, uid: u32) -> Result<TapDevice> {
        let uid_arg = uid.to_string();
        let stdout = self.run(&self.tunctl, &["-u", &uid_arg])?;

        let device = parse_tunctl_output(&stdout).ok_or_else(|| Error::HelperOutput {
            command: format!("{} -u {}", self.tunctl.display(), uid),
            output: stdout.clone(),
        })?;

        if device.owner != uid {
            return Err(Error::HelperOutput {
                command: format!("{} -u {}", self.tunctl.display(), uid),
                output: stdout,
            });
        }

        Ok(device)
    }

    fn attach(&self, bridge: &str, iface: &str) -> Result<()> {
        self.run(&self.brctl, &["addif", bridge, iface]).map(drop)
    }

    fn set_up(&self, iface: &str) -> Result<()> {
        self.run(&self.ifconfig, &[iface, "up"]).map(drop)
    }

    fn detach(&self, bridge: &str, iface: &str) -> Result<()> {
        self.run(&self.brctl, &["delif", bridge, iface]).map(drop)
    }

    fn destroy_interface(&self, iface: &str) -> Result<()> {
        self.run(&self.tunctl, &["-d", iface]).map(drop)
    }
}

/// Parse `Set 'tap3' persistent and owned by uid 1000`
pub fn parse_tunctl_output(output: &str) -> Option<TapDevice> {
    parse_tunctl_line(output).ok().map(|(_, device)| device)
}

fn parse_tunctl_line(input: &str) -> nom::IResult<&str, TapDevice> {
    let (input, _) = preceded(multispace0, tag("Set")).parse(input)?;
    let (input, name) = preceded(
        space1,
        delimited(
            char('\''),
            take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'),
            char('\''),
        ),
    )
    .parse(input)?;
    let (input, _) = preceded(space1, tag("persistent and owned by uid")).parse(input)?;
    let (input, owner) =
        preceded(space1, map_res(digit1, |s: &str| s.parse::<u32>())).parse(input)?;

    Ok((
        input,
        TapDevice {
            name: name.to_string(),
            owner,
        },
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_parse_tunctl_output() {
        let device = parse_tunctl_output("Set 'tap3' persistent and owned by uid 1000\n").unwrap();
        assert_eq!(
            device,
            TapDevice {
                name: "tap3".to_string(),
                owner: 1000
            }
        );
    }

    #[test]
    fn test_parse_tunctl_output_rejects_garbage() {
        assert!(parse_tunctl_output("").is_none());
        assert!(parse_tunctl_output("TUNSETIFF: Operation not permitted").is_none());
        assert!(parse_tunctl_output("Set 'tap3' persistent").is_none());
        assert!(parse_tunctl_output("Set 'tap3' persistent and owned by uid abc").is_none());
        assert!(parse_tunctl_output("Set '' persistent and owned by uid 1").is_none());
    }

    #[test]
    fn test_command_helper_reports_missing_binary() {
        let helper = CommandHelper {
            tunctl: PathBuf::from("/nonexistent/tunctl"),
            ..Default::default()
        };
        let err = helper.create_interface(1000).unwrap_err();
        assert!(matches!(err, Error::HelperFailed { .. }));
    }

    #[test]
    fn test_command_helper_rejects_unparseable_output() {
        let helper = CommandHelper {
            tunctl: PathBuf::from("/bin/echo"),
            ..Default::default()
        };
        let err = helper.create_interface(1000).unwrap_err();
        assert!(matches!(err, Error::HelperOutput { .. }));
    }

    #[test]
    fn test_command_helper_nonzero_exit() {
        let helper = CommandHelper {
            ifconfig: PathBuf::from("/bin/false"),
            ..Default::default()
        };
        let err = helper.set_up("tap0").unwrap_err();
        assert!(matches!(err, Error::HelperFailed { .. }));
    }

    /// Helper double that records calls and fails on demand
    #[derive(Debug, Clone, Default)]
    pub struct FakeHelper {
        pub calls: Rc<RefCell<Vec<String>>>,
        pub fail_create: bool,
        pub fail_attach: bool,
        pub fail_up: bool,
        pub fail_destroy: bool,
    }

    impl FakeHelper {
        pub fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }

        fn record(&self, call: String) {
            self.calls.borrow_mut().push(call);
        }

        fn outcome(&self, fail: bool, what: &str) -> Result<()> {
            if fail {
                Err(Error::HelperFailed {
                    command: what.to_string(),
                    message: "exit status: 1".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    impl NetworkHelper for FakeHelper {
        fn create_interface(&self, uid: u32) -> Result<TapDevice> {
            self.record(format!("create {}", uid));
            self.outcome(self.fail_create, "tunctl")?;
            Ok(TapDevice {
                name: "tap7".to_string(),
                owner: uid,
            })
        }

        fn attach(&self, bridge: &str, iface: &str) -> Result<()> {
            self.record(format!("attach {} {}", bridge, iface));
            self.outcome(self.fail_attach, "brctl addif")
        }

        fn set_up(&self, iface: &str) -> Result<()> {
            self.record(format!("up {}", iface));
            self.outcome(self.fail_up, "ifconfig up")
        }

        fn detach(&self, bridge: &str, iface: &str) -> Result<()> {
            self.record(format!("detach {} {}", bridge, iface));
            Ok(())
        }

        fn destroy_interface(&self, iface: &str) -> Result<()> {
            self.record(format!("destroy {}", iface));
            self.outcome(self.fail_destroy, "tunctl -d")
        }
    }
}
