//! SSH known-hosts identity cache.
//!
//! Maps node addresses to their SSH host keys so that SSH tooling does not
//! trip over stale identities when cloud instances are replaced and their
//! addresses reused.
//!
//! # Format
//!
//! ```text
//! 10.0.0.5 ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAI...
//! node-5,10.0.0.6 ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAI...
//! |1|DoM3hY36v/l4Ab7coSlWZqI3PUM=|0VakFWTEOEYAO7riiDsFVEjMaCI= ssh-ed25519 AAAAC3...
//! ```
//!
//! One line per key per host field. Blank lines and `#` comments are skipped
//! on read; trailing fields are ignored.
//!
//! Host fields are kept as written, so aliases stay on one line and hashed
//! names stay hashed. An address matches a field when it equals one of the
//! comma-separated patterns, or when a `|1|salt|hash` pattern carries the
//! HMAC-SHA1 of the address keyed by the salt.

mod cache;

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use thiserror::Error;

pub use cache::{EntryRemoval, HostIdentityCache, Rebuild};

/// Prefix of a hashed host pattern.
const HASHED_PREFIX: &str = "|1|";

/// Known-hosts errors.
#[derive(Debug, Error)]
pub enum KnownHostsError {
    /// Content could not be parsed.
    #[error("parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    /// Cache file exists but could not be parsed.
    #[error("identity cache {} is unreadable: line {line}: {reason}", .path.display())]
    Unreadable {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Host keys of one host field, keyed by key type.
pub type HostKeys = BTreeMap<String, Vec<u8>>;

/// Check whether `address` matches a known-hosts host field.
pub fn host_matches(hosts: &str, address: &str) -> bool {
    hosts
        .split(',')
        .any(|pattern| match pattern.strip_prefix(HASHED_PREFIX) {
            Some(hashed) => hashed_matches(hashed, address),
            None => pattern == address,
        })
}

/// Verify a `salt|hash` pair against an address. Malformed pairs never match.
fn hashed_matches(hashed: &str, address: &str) -> bool {
    let Some((salt, hash)) = hashed.split_once('|') else {
        return false;
    };
    let (Ok(salt), Ok(hash)) = (STANDARD.decode(salt), STANDARD.decode(hash)) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(&salt) else {
        return false;
    };
    mac.update(address.as_bytes());
    mac.verify_slice(&hash).is_ok()
}

/// In-memory known-hosts content.
///
/// Entries are kept in host-field then key-type order, so serialization is
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownHosts {
    entries: BTreeMap<String, HostKeys>,
}

impl KnownHosts {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a key under a host field.
    ///
    /// Returns the previous key material for this host field and key type.
    pub fn insert(
        &mut self,
        hosts: impl Into<String>,
        key_type: impl Into<String>,
        key: impl Into<Vec<u8>>,
    ) -> Option<Vec<u8>> {
        self.entries
            .entry(hosts.into())
            .or_default()
            .insert(key_type.into(), key.into())
    }

    /// All keys of every host field matching `address`.
    pub fn lookup(&self, address: &str) -> Option<HostKeys> {
        let mut found: Option<HostKeys> = None;
        for keys in self.matching(address) {
            found
                .get_or_insert_with(HostKeys::new)
                .extend(keys.iter().map(|(t, k)| (t.clone(), k.clone())));
        }
        found
    }

    /// Check if an address has any key.
    pub fn contains(&self, address: &str) -> bool {
        self.matching(address).next().is_some()
    }

    /// Remove every host field matching `address`, aliases included.
    ///
    /// Returns the number of keys removed.
    pub fn remove_address(&mut self, address: &str) -> usize {
        let mut removed = 0;
        self.entries.retain(|hosts, keys| {
            if host_matches(hosts, address) {
                removed += keys.len();
                false
            } else {
                true
            }
        });
        removed
    }

    /// Copy holding only host fields that match an address in
    /// `authoritative`. Fields are kept whole and keys unchanged.
    pub fn retain_authoritative(&self, authoritative: &BTreeSet<String>) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(hosts, _)| {
                    authoritative
                        .iter()
                        .any(|address| host_matches(hosts, address))
                })
                .map(|(hosts, keys)| (hosts.clone(), keys.clone()))
                .collect(),
        }
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.values().map(|keys| keys.len()).sum()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Host fields in sorted order, as written.
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|h| h.as_str())
    }

    /// Iterate over `(hosts, key_type, key)` in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &[u8])> {
        self.entries.iter().flat_map(|(hosts, keys)| {
            keys.iter()
                .map(move |(key_type, key)| (hosts.as_str(), key_type.as_str(), key.as_slice()))
        })
    }

    /// Serialize to the known-hosts line format.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for (hosts, key_type, key) in self.iter() {
            out.push_str(hosts);
            out.push(' ');
            out.push_str(key_type);
            out.push(' ');
            out.push_str(&STANDARD.encode(key));
            out.push('\n');
        }
        out
    }

    /// Parse known-hosts content.
    pub fn parse(content: &str) -> Result<Self, KnownHostsError> {
        let mut known = Self::new();

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            parse_line(line_num + 1, line, &mut known)?;
        }

        Ok(known)
    }

    fn matching<'a>(&'a self, address: &'a str) -> impl Iterator<Item = &'a HostKeys> {
        self.entries
            .iter()
            .filter(move |(hosts, _)| host_matches(hosts, address))
            .map(|(_, keys)| keys)
    }
}

/// Parse a single non-empty line.
fn parse_line(line_num: usize, line: &str, known: &mut KnownHosts) -> Result<(), KnownHostsError> {
    let mut fields = line.split_whitespace();
    let (Some(hosts), Some(key_type), Some(encoded)) = (fields.next(), fields.next(), fields.next())
    else {
        return Err(KnownHostsError::Parse {
            line: line_num,
            reason: "expected '<hosts> <key-type> <base64-key>'".to_string(),
        });
    };

    if hosts.starts_with('@') {
        return Err(KnownHostsError::Parse {
            line: line_num,
            reason: format!("unsupported marker '{hosts}'"),
        });
    }

    let key = STANDARD
        .decode(encoded)
        .map_err(|e| KnownHostsError::Parse {
            line: line_num,
            reason: format!("invalid base64 key material: {e}"),
        })?;

    known.insert(hosts, key_type, key);

    Ok(())
}
