//! Typed environment handed to the protected command
//!
//! The lifecycle never mutates the process environment. It reads a
//! snapshot, adds the identity variables to it and passes the result to the
//! child explicitly.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};

/// An owned set of environment variables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<OsString, OsString>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current process environment
    pub fn from_process() -> Self {
        std::env::vars_os().collect()
    }

    pub fn get(&self, key: impl AsRef<OsStr>) -> Option<&OsStr> {
        self.vars.get(key.as_ref()).map(OsString::as_os_str)
    }

    pub fn contains(&self, key: impl AsRef<OsStr>) -> bool {
        self.vars.contains_key(key.as_ref())
    }

    pub fn set(&mut self, key: impl Into<OsString>, value: impl Into<OsString>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Builder-style `set`
    pub fn with(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.set(key, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
        self.vars.iter().map(|(k, v)| (k.as_os_str(), v.as_os_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<OsString>, V: Into<OsString>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut env = Environment::new();
        assert!(env.is_empty());

        env.set("IPADDR", "192.168.23.151");
        assert!(env.contains("IPADDR"));
        assert_eq!(env.get("IPADDR"), Some(OsStr::new("192.168.23.151")));
        assert!(!env.contains("IPADDR2"));

        env.set("IPADDR", "192.168.23.152");
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("IPADDR"), Some(OsStr::new("192.168.23.152")));
    }

    #[test]
    fn test_from_iter() {
        let env: Environment = [("A", "1"), ("B", "2")].into_iter().collect();
        let keys: Vec<_> = env.iter().map(|(k, _)| k.to_owned()).collect();
        assert_eq!(keys, vec![OsString::from("A"), OsString::from("B")]);
    }

    #[test]
    fn test_from_process_sees_path() {
        let env = Environment::from_process();
        assert_eq!(env.get("PATH"), std::env::var_os("PATH").as_deref());
    }
}
