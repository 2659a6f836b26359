//! Known-hosts persistence for trust-on-first-use.
//!
//! The store is a JSON object mapping `host_lower:port` to the 64-hex SHA-256
//! of the peer's certificate DER, written pretty-printed with sorted keys and
//! a trailing newline. Callers must not share one file across concurrent
//! sender batches; read-modify-write is not atomic against other processes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::hash::is_sha256_hex;

/// Result of a fingerprint lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostStatus {
    /// Endpoint is recorded and the fingerprint matches.
    Known,
    /// Endpoint has no entry.
    Unknown,
    /// Endpoint is recorded with a different fingerprint.
    Changed {
        /// The fingerprint on record.
        expected: String,
    },
}

/// Known-hosts database bound to its backing file.
#[derive(Debug)]
pub struct KnownHosts {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl KnownHosts {
    /// Default store location: `<home>/.local-sent/known_hosts.json`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".local-sent")
            .join("known_hosts.json")
    }

    /// Load the store; a missing file yields an empty database.
    pub fn load(path: &Path) -> Result<Self> {
        let entries = match std::fs::read_to_string(path) {
            Ok(text) => {
                let raw: BTreeMap<String, String> =
                    serde_json::from_str(&text).map_err(|e| Error::config(format!(
                        "malformed known-hosts file {}: {e}",
                        path.display()
                    )))?;
                let mut entries = BTreeMap::new();
                for (endpoint, fingerprint) in raw {
                    if is_sha256_hex(&fingerprint) {
                        entries.insert(endpoint, fingerprint);
                    } else {
                        warn!(endpoint, "skipping known-hosts entry with invalid fingerprint");
                    }
                }
                debug!(path = %path.display(), count = entries.len(), "loaded known hosts");
                entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Canonical key for an endpoint.
    pub fn endpoint_key(host: &str, port: u16) -> String {
        format!("{}:{port}", host.to_lowercase())
    }

    /// Compare an observed fingerprint against the store.
    pub fn check(&self, host: &str, port: u16, fingerprint: &str) -> HostStatus {
        match self.entries.get(&Self::endpoint_key(host, port)) {
            None => HostStatus::Unknown,
            Some(expected) if expected == fingerprint => HostStatus::Known,
            Some(expected) => HostStatus::Changed {
                expected: expected.clone(),
            },
        }
    }

    /// Record a fingerprint for an endpoint and write the store back.
    pub fn record(&mut self, host: &str, port: u16, fingerprint: &str) -> Result<()> {
        self.entries
            .insert(Self::endpoint_key(host, port), fingerprint.to_string());
        self.save()
    }

    /// Fingerprint on record for an endpoint.
    pub fn get(&self, host: &str, port: u16) -> Option<&str> {
        self.entries
            .get(&Self::endpoint_key(host, port))
            .map(String::as_str)
    }

    /// Number of recorded endpoints.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no endpoint is recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // BTreeMap keeps keys sorted; pretty-print plus trailing newline.
        let mut text = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| Error::config(format!("failed to encode known hosts: {e}")))?;
        text.push('\n');
        std::fs::write(&self.path, text)?;
        debug!(path = %self.path.display(), count = self.entries.len(), "wrote known hosts");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(seed: u8) -> String {
        format!("{:02x}", seed).repeat(32)
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let kh = KnownHosts::load(&dir.path().join("absent.json")).unwrap();
        assert!(kh.is_empty());
    }

    #[test]
    fn record_then_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts.json");

        let mut kh = KnownHosts::load(&path).unwrap();
        kh.record("192.168.1.9", 37373, &fp(0xaa)).unwrap();

        let kh = KnownHosts::load(&path).unwrap();
        assert_eq!(kh.check("192.168.1.9", 37373, &fp(0xaa)), HostStatus::Known);
        assert_eq!(
            kh.check("192.168.1.9", 37373, &fp(0xbb)),
            HostStatus::Changed { expected: fp(0xaa) }
        );
        assert_eq!(kh.check("192.168.1.9", 37374, &fp(0xaa)), HostStatus::Unknown);
    }

    #[test]
    fn endpoint_keys_are_lowercased() {
        assert_eq!(
            KnownHosts::endpoint_key("Receiver.LOCAL", 37373),
            "receiver.local:37373"
        );
    }

    #[test]
    fn file_is_sorted_pretty_with_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts.json");

        let mut kh = KnownHosts::load(&path).unwrap();
        kh.record("192.168.1.20", 37373, &fp(0x22)).unwrap();
        kh.record("192.168.1.10", 37373, &fp(0x11)).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.ends_with('\n'));
        let first = text.find("192.168.1.10").unwrap();
        let second = text.find("192.168.1.20").unwrap();
        assert!(first < second);
    }

    #[test]
    fn invalid_fingerprints_are_skipped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts.json");
        std::fs::write(
            &path,
            format!(r#"{{"10.0.0.1:37373":"not-a-digest","10.0.0.2:37373":"{}"}}"#, fp(0xcc)),
        )
        .unwrap();

        let kh = KnownHosts::load(&path).unwrap();
        assert_eq!(kh.len(), 1);
        assert_eq!(kh.get("10.0.0.2", 37373), Some(fp(0xcc).as_str()));
    }

    #[test]
    fn parent_directories_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("known_hosts.json");

        let mut kh = KnownHosts::load(&path).unwrap();
        kh.record("10.1.1.1", 1, &fp(0x01)).unwrap();
        assert!(path.exists());
    }
}
