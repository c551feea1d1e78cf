//! File-backed identity cache.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::{KnownHosts, KnownHostsError};

/// Outcome of removing one address from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryRemoval {
    /// Keys were removed and the file rewritten.
    Purged(usize),

    /// The address had no keys (or there was no file); nothing written.
    NotCached,

    /// No address was given. The cache can no longer be trusted to match
    /// the cluster, so the caller should delete the whole file.
    NoAddress,
}

impl EntryRemoval {
    /// Returns true if any entry existed for the address.
    pub fn existed(&self) -> bool {
        matches!(self, Self::Purged(_))
    }
}

/// Outcome of rebuilding the cache from an authoritative address list.
///
/// Counts are host fields, so an alias line or a hashed line counts once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rebuild {
    /// There was no cache file; nothing to rebuild.
    Missing,

    /// File rewritten.
    Rewritten {
        kept_hosts: usize,
        kept_keys: usize,
        dropped_hosts: usize,
    },
}

/// Known-hosts file with atomic rewrite.
///
/// Assumes a single writer; there is no file locking.
#[derive(Debug, Clone)]
pub struct HostIdentityCache {
    path: PathBuf,
}

impl HostIdentityCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cache.
    ///
    /// Returns `None` if the file does not exist, and an `Unreadable` error
    /// if it exists but cannot be parsed.
    pub fn load(&self) -> Result<Option<KnownHosts>, KnownHostsError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No identity cache file");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match KnownHosts::parse(&content) {
            Ok(known) => Ok(Some(known)),
            Err(KnownHostsError::Parse { line, reason }) => Err(KnownHostsError::Unreadable {
                path: self.path.clone(),
                line,
                reason,
            }),
            Err(e) => Err(e),
        }
    }

    /// Write the cache atomically.
    ///
    /// Content goes to a temp file in the same directory, is synced, then
    /// renamed over the cache file. The temp file is removed on any error,
    /// so readers only ever see the old or the new content.
    pub fn save(&self, known: &KnownHosts) -> Result<(), KnownHostsError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(known.serialize().as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!(
            path = %self.path.display(),
            keys = known.len(),
            "Saved identity cache"
        );

        Ok(())
    }

    /// Remove every key of `address`, including alias and hashed lines
    /// that match it.
    ///
    /// The file is rewritten only when something was removed.
    pub fn remove_entry(&self, address: Option<&str>) -> Result<EntryRemoval, KnownHostsError> {
        let Some(address) = address.filter(|a| !a.is_empty()) else {
            return Ok(EntryRemoval::NoAddress);
        };

        let Some(mut known) = self.load()? else {
            return Ok(EntryRemoval::NotCached);
        };

        let removed = known.remove_address(address);
        if removed == 0 {
            debug!(address = %address, "No identity cache entry for address");
            return Ok(EntryRemoval::NotCached);
        }

        self.save(&known)?;
        info!(
            path = %self.path.display(),
            address = %address,
            keys = removed,
            "Removed identity cache entry"
        );

        Ok(EntryRemoval::Purged(removed))
    }

    /// Rewrite the cache keeping only host fields that match an address in
    /// `authoritative`.
    pub fn rebuild_from_authoritative(
        &self,
        authoritative: &BTreeSet<String>,
    ) -> Result<Rebuild, KnownHostsError> {
        let Some((kept, summary)) = self.rebuilt(authoritative)? else {
            info!(path = %self.path.display(), "No identity cache to sanitize");
            return Ok(Rebuild::Missing);
        };

        self.save(&kept)?;
        info!(path = %self.path.display(), ?summary, "Saved sanitized identity cache");

        Ok(summary)
    }

    /// Same outcome as [`Self::rebuild_from_authoritative`], without writing.
    pub fn preview_rebuild(
        &self,
        authoritative: &BTreeSet<String>,
    ) -> Result<Rebuild, KnownHostsError> {
        Ok(self
            .rebuilt(authoritative)?
            .map(|(_, summary)| summary)
            .unwrap_or(Rebuild::Missing))
    }

    fn rebuilt(
        &self,
        authoritative: &BTreeSet<String>,
    ) -> Result<Option<(KnownHosts, Rebuild)>, KnownHostsError> {
        let Some(known) = self.load()? else {
            return Ok(None);
        };

        let kept = known.retain_authoritative(authoritative);
        let kept_hosts = kept.hosts().count();
        let summary = Rebuild::Rewritten {
            kept_hosts,
            kept_keys: kept.len(),
            dropped_hosts: known.hosts().count() - kept_hosts,
        };

        Ok(Some((kept, summary)))
    }

    /// Delete the cache file.
    ///
    /// Returns false if there was no file, which is not an error.
    pub fn delete(&self) -> Result<bool, KnownHostsError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Deleted identity cache");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
