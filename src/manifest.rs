//! Configuration file parsing for mooring
//!
//! Parses `mooring.toml` using serde. Every section is optional and falls
//! back to the defaults of a single-bridge test host.

use crate::error::{Error, Result};
use crate::network::range::{DEFAULT_HIGH, DEFAULT_LOW};
use crate::network::{
    AddressAllocator, AddressRange, CommandConsumer, CommandHelper, LeaseStore,
};
use ipnet::Ipv4Net;
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{self, Read};
use std::net::Ipv4Addr;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Config file read when none is given on the command line
pub const DEFAULT_CONFIG: &str = "/etc/mooring.toml";

/// Owner required of the config file when running elevated
const TRUSTED_OWNER: u32 = 0;

/// Load configuration from a file
pub fn load(path: &Path) -> Result<MooringConfig> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse(&content)
}

fn parse(content: &str) -> Result<MooringConfig> {
    let config: MooringConfig = toml::from_str(content)?;
    config.validate()?;

    Ok(config)
}

fn defaults() -> Result<MooringConfig> {
    let config = MooringConfig::default();
    config.validate()?;
    Ok(config)
}

/// Load an explicit config, or the default one if it exists
///
/// A missing default file means built-in defaults; a missing explicit file
/// is an error.
pub fn load_or_default(path: Option<&Path>) -> Result<MooringConfig> {
    match path {
        Some(path) => load(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG);
            if default.exists() {
                load(default)
            } else {
                defaults()
            }
        }
    }
}

/// Load configuration for a process that may be running setuid
///
/// The config names the helpers run with elevated privileges and the files
/// rewritten on the caller's behalf. When elevated, only the system config
/// is read, and only if it is owned by root and not writable by group or
/// others.
pub fn load_for(path: Option<&Path>, elevated: bool) -> Result<MooringConfig> {
    if !elevated {
        return load_or_default(path);
    }

    if let Some(path) = path {
        return Err(Error::UntrustedConfig {
            path: path.to_path_buf(),
            reason: "--config is not accepted when running with elevated privileges".to_string(),
        });
    }

    match load_trusted(Path::new(DEFAULT_CONFIG), TRUSTED_OWNER) {
        Err(Error::ConfigRead { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            defaults()
        }
        other => other,
    }
}

/// Read `path` only if it is a regular file owned by `owner` with no
/// group or world write bit
///
/// Ownership is checked on the open handle, so the file read is the file
/// checked.
pub fn load_trusted(path: &Path, owner: u32) -> Result<MooringConfig> {
    let read_error = |e: io::Error| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    };

    let mut file = File::open(path).map_err(read_error)?;
    let meta = file.metadata().map_err(read_error)?;

    let untrusted = |reason: String| Error::UntrustedConfig {
        path: path.to_path_buf(),
        reason,
    };
    if !meta.is_file() {
        return Err(untrusted("not a regular file".to_string()));
    }
    if meta.uid() != owner {
        return Err(untrusted(format!("owned by uid {}, expected {}", meta.uid(), owner)));
    }
    if meta.mode() & 0o022 != 0 {
        return Err(untrusted(format!(
            "writable by group or others (mode {:o})",
            meta.mode() & 0o7777
        )));
    }

    let mut content = String::new();
    file.read_to_string(&mut content).map_err(read_error)?;
    parse(&content)
}

/// Root configuration structure
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MooringConfig {
    pub leases: LeaseConfig,
    pub range: RangeConfig,
    pub bridge: BridgeConfig,
    pub identity: IdentityConfig,
    pub helper: HelperConfig,
    pub consumer: ConsumerConfig,
}

/// Lease store location and format
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LeaseConfig {
    /// Live store shared with the DHCP server
    pub path: PathBuf,
    /// Replacement file (defaults to `<path>.new`)
    pub staging: Option<PathBuf>,
    /// Line tag for leases
    pub tag: String,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/misc/mooring.dnsmasq"),
            staging: None,
            tag: crate::network::lease::DEFAULT_TAG.to_string(),
        }
    }
}

impl LeaseConfig {
    pub fn staging_path(&self) -> PathBuf {
        self.staging.clone().unwrap_or_else(|| {
            let mut staging = self.path.clone().into_os_string();
            staging.push(".new");
            PathBuf::from(staging)
        })
    }
}

/// Leasable address block
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RangeConfig {
    /// Network prefix, /24 or longer
    pub network: Ipv4Net,
    /// Lowest leasable host octet
    pub low: u8,
    /// Highest leasable host octet
    pub high: u8,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            network: Ipv4Net::new_assert(Ipv4Addr::new(192, 168, 23, 0), 24),
            low: DEFAULT_LOW,
            high: DEFAULT_HIGH,
        }
    }
}

/// Bridge tap devices join
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub name: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: "br1".to_string(),
        }
    }
}

/// Identity marker directory
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentityConfig {
    pub dir: PathBuf,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/tftpboot/pxelinux.cfg"),
        }
    }
}

/// Privileged helper binaries
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HelperConfig {
    pub tunctl: PathBuf,
    pub brctl: PathBuf,
    pub ifconfig: PathBuf,
}

impl Default for HelperConfig {
    fn default() -> Self {
        let helper = CommandHelper::default();
        Self {
            tunctl: helper.tunctl,
            brctl: helper.brctl,
            ifconfig: helper.ifconfig,
        }
    }
}

/// Commands that pause and resume the lease store reader
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsumerConfig {
    pub pause: Vec<String>,
    pub resume: Vec<String>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            pause: vec!["/etc/init.d/dnsmasq".to_string(), "stop".to_string()],
            resume: vec!["/etc/init.d/dnsmasq".to_string(), "start".to_string()],
        }
    }
}

impl MooringConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.address_range()?;

        if self.leases.tag.is_empty() || self.leases.tag.contains(['=', '\n']) {
            return Err(Error::ConfigValidation(format!(
                "Invalid lease tag {:?}",
                self.leases.tag
            )));
        }

        if self.leases.staging_path() == self.leases.path {
            return Err(Error::ConfigValidation(
                "Lease staging path must differ from the lease store path".to_string(),
            ));
        }

        if self.bridge.name.is_empty() {
            return Err(Error::ConfigValidation("Bridge name is empty".to_string()));
        }

        Ok(())
    }

    pub fn address_range(&self) -> Result<AddressRange> {
        AddressRange::new(self.range.network, self.range.low, self.range.high)
    }

    pub fn lease_store(&self) -> LeaseStore {
        LeaseStore::new(&self.leases.path, self.leases.staging_path())
            .tag(&self.leases.tag)
            .consumer(CommandConsumer::new(
                self.consumer.pause.clone(),
                self.consumer.resume.clone(),
            ))
    }

    pub fn allocator(&self) -> Result<AddressAllocator> {
        Ok(AddressAllocator::new(self.lease_store(), self.address_range()?))
    }

    pub fn network_helper(&self) -> CommandHelper {
        CommandHelper {
            tunctl: self.helper.tunctl.clone(),
            brctl: self.helper.brctl.clone(),
            ifconfig: self.helper.ifconfig.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MooringConfig::default();
        config.validate().unwrap();

        let range = config.address_range().unwrap();
        assert_eq!(range.to_string(), "192.168.23.151-192.168.23.253");
        assert_eq!(
            config.leases.staging_path(),
            PathBuf::from("/var/lib/misc/mooring.dnsmasq.new")
        );
        assert_eq!(config.bridge.name, "br1");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[leases]
path = "/srv/leases"
staging = "/srv/leases.tmp"
tag = "host"

[range]
network = "10.20.30.0/24"
low = 100
high = 120

[bridge]
name = "virbr9"

[identity]
dir = "/srv/tftp/pxelinux.cfg"

[helper]
tunctl = "/opt/bin/tunctl"
brctl = "/opt/bin/brctl"
ifconfig = "/opt/bin/ifconfig"

[consumer]
pause = []
resume = []
"#;

        let config: MooringConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.leases.staging_path(), PathBuf::from("/srv/leases.tmp"));
        assert_eq!(config.address_range().unwrap().capacity(), 21);
        assert_eq!(config.bridge.name, "virbr9");
        assert_eq!(config.network_helper().brctl, PathBuf::from("/opt/bin/brctl"));
        assert!(config.consumer.pause.is_empty());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: MooringConfig = toml::from_str("[range]\nlow = 200\n").unwrap();
        config.validate().unwrap();
        assert_eq!(config.range.low, 200);
        assert_eq!(config.range.high, DEFAULT_HIGH);
        assert_eq!(config.identity.dir, PathBuf::from("/tftpboot/pxelinux.cfg"));
    }

    #[test]
    fn test_validation_errors() {
        let config: MooringConfig = toml::from_str("[range]\nlow = 200\nhigh = 100\n").unwrap();
        assert!(matches!(config.validate(), Err(Error::ConfigValidation(_))));

        let config: MooringConfig = toml::from_str("[range]\nnetwork = \"10.0.0.0/16\"\n").unwrap();
        assert!(config.validate().is_err());

        let config: MooringConfig = toml::from_str("[bridge]\nname = \"\"\n").unwrap();
        assert!(config.validate().is_err());

        let config: MooringConfig = toml::from_str("[leases]\ntag = \"a=b\"\n").unwrap();
        assert!(config.validate().is_err());

        let config: MooringConfig =
            toml::from_str("[leases]\npath = \"/x\"\nstaging = \"/x\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(toml::from_str::<MooringConfig>("[bridge]\nnmae = \"br0\"\n").is_err());
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, Error::ConfigRead { .. }));
        assert_eq!(err.exit_code(), 78);
    }

    #[test]
    fn test_elevated_rejects_explicit_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mooring.toml");
        fs::write(&path, "[helper]\ntunctl = \"/tmp/not-tunctl\"\n").unwrap();

        let err = load_for(Some(&path), true).unwrap_err();
        assert!(matches!(err, Error::UntrustedConfig { .. }));
        assert_eq!(err.exit_code(), 78);

        let config = load_for(Some(&path), false).unwrap();
        assert_eq!(config.network_helper().tunctl, PathBuf::from("/tmp/not-tunctl"));
    }

    #[test]
    fn test_trusted_load_checks_owner_and_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mooring.toml");
        fs::write(&path, "[bridge]\nname = \"br5\"\n").unwrap();
        let me = nix::unistd::Uid::current().as_raw();

        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        assert_eq!(load_trusted(&path, me).unwrap().bridge.name, "br5");

        let err = load_trusted(&path, me.wrapping_add(1)).unwrap_err();
        assert!(matches!(err, Error::UntrustedConfig { .. }));

        fs::set_permissions(&path, fs::Permissions::from_mode(0o664)).unwrap();
        assert!(matches!(
            load_trusted(&path, me),
            Err(Error::UntrustedConfig { .. })
        ));

        fs::set_permissions(&path, fs::Permissions::from_mode(0o646)).unwrap();
        assert!(matches!(
            load_trusted(&path, me),
            Err(Error::UntrustedConfig { .. })
        ));
    }

    #[test]
    fn test_trusted_load_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let me = nix::unistd::Uid::current().as_raw();
        assert!(load_trusted(dir.path(), me).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mooring.toml");
        fs::write(&path, "[bridge]\nname = \"br7\"\n").unwrap();

        let config = load_or_default(Some(&path)).unwrap();
        assert_eq!(config.bridge.name, "br7");
    }
}
