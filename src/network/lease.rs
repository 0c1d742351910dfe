//! File-backed lease store
//!
//! The store is a line-oriented text file shared with a DHCP server:
//!
//! ```text
//! dhcp-host=02:5e:11:a0:3c:9d,192.168.23.151
//! ```
//!
//! Lines that do not parse as a lease are preserved verbatim. Every mutation
//! writes a complete new file to an exclusively created staging path and
//! renames it over the live store, so readers see either the old or the new
//! table, never a mix. A staging file that already exists means another
//! writer is in flight or a previous run died mid-update; the operation then
//! fails instead of clobbering it.
//!
//! The staging file is created before the live store is read, so it also
//! acts as the writer's claim: a concurrent add or remove fails with a
//! retryable [`Error::LeaseStoreIo`] rather than racing the rename. There is
//! no waiting; callers that need to queue writers serialize externally.

use crate::error::{Error, Result};
use crate::network::consumer::{CommandConsumer, Paused, StoreConsumer};
use crate::network::{AddressRange, MacAddr};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, Write};
use std::net::Ipv4Addr;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default tag in front of each lease line
pub const DEFAULT_TAG: &str = "dhcp-host";

/// A committed MAC/IP pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct LeaseRecord {
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
}

impl LeaseRecord {
    pub fn new(mac: MacAddr, ip: Ipv4Addr) -> Self {
        Self { mac, ip }
    }

    /// Parse a `<tag>=<mac>,<ip>[,...]` line
    ///
    /// Returns `None` for anything else, including leases with another tag.
    pub fn parse(tag: &str, line: &str) -> Option<Self> {
        let body = line.trim_end().strip_prefix(tag)?.strip_prefix('=')?;
        let mut fields = body.split(',');
        let mac = fields.next()?.trim().parse().ok()?;
        let ip = fields.next()?.trim().parse().ok()?;
        Some(Self { mac, ip })
    }

    /// Render as a store line, newline included
    pub fn to_line(&self, tag: &str) -> String {
        format!("{}={},{}\n", tag, self.mac, self.ip)
    }
}

impl fmt::Display for LeaseRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.mac, self.ip)
    }
}

/// The lease table shared between invocations
pub struct LeaseStore {
    /// Live store path
    path: PathBuf,
    /// Exclusively created replacement path
    staging: PathBuf,
    /// Line tag for recognized leases
    tag: String,
    /// Process that reads the store
    consumer: Box<dyn StoreConsumer>,
}

impl fmt::Debug for LeaseStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseStore")
            .field("path", &self.path)
            .field("staging", &self.staging)
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

impl LeaseStore {
    /// Create a store handle; nothing is touched on disk
    pub fn new(path: impl Into<PathBuf>, staging: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            staging: staging.into(),
            tag: DEFAULT_TAG.to_string(),
            consumer: Box::new(CommandConsumer::default()),
        }
    }

    /// Set the lease line tag
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Set the process notified around rewrites
    pub fn consumer(mut self, consumer: impl StoreConsumer + 'static) -> Self {
        self.consumer = Box::new(consumer);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging
    }

    /// All recognized leases, in file order
    pub fn records(&self) -> Result<Vec<LeaseRecord>> {
        Ok(self
            .read_lines()?
            .iter()
            .filter_map(|line| LeaseRecord::parse(&self.tag, line))
            .collect())
    }

    /// Lease a fresh random MAC and the lowest free address in `range`
    pub fn add(&self, range: &AddressRange) -> Result<LeaseRecord> {
        self.add_with_mac(range, MacAddr::random(&mut rand::rng()))
    }

    /// Lease `mac` with the lowest free address in `range`
    ///
    /// A MAC already in the store aborts the whole operation; the caller
    /// decides whether to rerun.
    pub fn add_with_mac(&self, range: &AddressRange, mac: MacAddr) -> Result<LeaseRecord> {
        let _paused = Paused::new(self.consumer.as_ref());
        let mut staging = Staging::create(&self.staging)?;

        let lines = self.read_lines()?;
        let mut used = HashSet::new();
        for record in lines.iter().filter_map(|l| LeaseRecord::parse(&self.tag, l)) {
            if record.mac == mac {
                return Err(Error::MacCollision(mac));
            }
            used.insert(record.ip);
        }

        let ip = range
            .iter()
            .find(|ip| !used.contains(ip))
            .ok_or_else(|| Error::AddressSpaceExhausted {
                range: range.to_string(),
                store: self.path.clone(),
            })?;
        let record = LeaseRecord::new(mac, ip);

        for line in &lines {
            staging.write(line.as_bytes())?;
        }
        if lines.last().is_some_and(|l| !l.ends_with('\n')) {
            staging.write(b"\n")?;
        }
        staging.write(record.to_line(&self.tag).as_bytes())?;
        staging.commit(&self.path)?;

        info!(mac = %record.mac, ip = %record.ip, store = %self.path.display(), "Lease added");
        Ok(record)
    }

    /// Release a lease, matching both MAC and IP
    ///
    /// Returns whether a line was removed. An absent lease leaves the store
    /// untouched and is not an error.
    pub fn remove(&self, record: &LeaseRecord) -> Result<bool> {
        let _paused = Paused::new(self.consumer.as_ref());
        let mut staging = Staging::create(&self.staging)?;

        let mut removed = false;
        for line in self.read_lines()? {
            if LeaseRecord::parse(&self.tag, &line).as_ref() == Some(record) {
                removed = true;
                continue;
            }
            staging.write(line.as_bytes())?;
        }

        if !removed {
            warn!(mac = %record.mac, ip = %record.ip, store = %self.path.display(), "Lease not present, nothing to release");
            return Ok(false);
        }

        staging.commit(&self.path)?;
        info!(mac = %record.mac, ip = %record.ip, store = %self.path.display(), "Lease released");
        Ok(true)
    }

    /// Read the store line by line with terminators kept
    ///
    /// A missing store is an empty table.
    fn read_lines(&self) -> Result<Vec<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content.split_inclusive('\n').map(str::to_string).collect()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(Error::LeaseStoreIo {
                action: "read",
                path: self.path.clone(),
                source: e,
            }),
        }
    }
}

/// Exclusively created replacement file
///
/// Removed on drop unless committed, so a failed operation never leaves a
/// staging file behind. One left behind by a killed process stays put.
struct Staging {
    path: PathBuf,
    file: Option<File>,
}

impl Staging {
    fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o644)
            .open(path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    warn!(
                        staging = %path.display(),
                        "Staging file exists: either a concurrent update collided and rerunning will succeed, \
                         or it was abandoned mid-update and must be deleted"
                    );
                }
                Error::LeaseStoreIo {
                    action: "create staging file",
                    path: path.to_path_buf(),
                    source: e,
                }
            })?;

        let staging = Self {
            path: path.to_path_buf(),
            file: Some(file),
        };

        // umask may have stripped the read bits the DHCP server needs
        fs::set_permissions(&staging.path, Permissions::from_mode(0o644))
            .map_err(|e| staging.error("chmod", e))?;

        Ok(staging)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        file.write_all(bytes).map_err(|e| Error::LeaseStoreIo {
            action: "write",
            path: self.path.clone(),
            source: e,
        })
    }

    fn commit(mut self, live: &Path) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all().map_err(|e| self.error("sync", e))?;
        }

        fs::rename(&self.path, live).map_err(|e| self.error("rename", e))?;
        self.path = PathBuf::new();
        Ok(())
    }

    fn error(&self, action: &'static str, source: io::Error) -> Error {
        Error::LeaseStoreIo {
            action,
            path: self.path.clone(),
            source,
        }
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if !self.path.as_os_str().is_empty() {
            self.file.take();
            let _ = fs::remove_file(&self.path);
        }
    }
}
