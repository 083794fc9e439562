//! On-disk LOC cache.
//!
//! One file per tracked account, named by the sha256 of the username. The
//! file is `header_size` raw passthrough lines (kept verbatim, never
//! regenerated) followed by one line per tracked repository:
//!
//! ```text
//! <sha256 of owner/name, lowercase hex> <remote commits> <authored commits> <lines added> <lines deleted>
//! ```
//!
//! Records are positionally aligned with the repository listing that built
//! them; the hash exists to verify that correspondence, never as a lookup
//! key.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

/// Header lines written when a cache file is created from scratch.
pub const DEFAULT_HEADER_SIZE: usize = 7;

const PLACEHOLDER_HEADER_LINE: &str =
    "This line is a comment block. Write whatever you want here.";

/// sha256 of a repository's canonical `owner/name` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityHash([u8; 32]);

impl IdentityHash {
    pub fn of(name_with_owner: &str) -> Self {
        let digest = Sha256::digest(name_with_owner.as_bytes());
        Self(digest.into())
    }

    pub fn parse_hex(text: &str) -> Option<Self> {
        let bytes: [u8; 32] = hex::decode(text).ok()?.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for IdentityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Cached aggregate for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRecord {
    pub identity: IdentityHash,
    /// Default-branch commit count at the last sync; the staleness signal.
    pub remote_commits: u64,
    pub authored_commits: u64,
    pub lines_added: u64,
    pub lines_deleted: u64,
}

impl RepoRecord {
    pub fn zeroed(identity: IdentityHash) -> Self {
        Self {
            identity,
            remote_commits: 0,
            authored_commits: 0,
            lines_added: 0,
            lines_deleted: 0,
        }
    }

    fn to_line(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.identity,
            self.remote_commits,
            self.authored_commits,
            self.lines_added,
            self.lines_deleted
        )
    }

    fn parse_line(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let identity = IdentityHash::parse_hex(tokens.next()?)?;
        let remote_commits = tokens.next()?.parse().ok()?;
        let authored_commits = tokens.next()?.parse().ok()?;
        let lines_added = tokens.next()?.parse().ok()?;
        let lines_deleted = tokens.next()?.parse().ok()?;
        Some(Self {
            identity,
            remote_commits,
            authored_commits,
            lines_added,
            lines_deleted,
        })
    }
}

/// In-memory image of the cache file. A `None` record is a line that failed
/// to parse; the aggregator repairs it before anything is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheFile {
    pub header: Vec<String>,
    pub records: Vec<Option<RepoRecord>>,
}

impl CacheFile {
    /// Sum of (lines added, lines deleted) across all records.
    pub fn loc_totals(&self) -> (u64, u64) {
        self.records.iter().flatten().fold((0, 0), |(add, del), r| {
            (add + r.lines_added, del + r.lines_deleted)
        })
    }

    /// Sum of authored commits across all records.
    pub fn commit_total(&self) -> u64 {
        self.records.iter().flatten().map(|r| r.authored_commits).sum()
    }
}

/// Loads, initializes and persists the cache file for one account.
pub struct CacheStore {
    path: PathBuf,
    header_size: usize,
}

impl CacheStore {
    pub fn new(cache_dir: &Path, username: &str, header_size: usize) -> Self {
        let file_name = format!("{}.txt", hex::encode(Sha256::digest(username.as_bytes())));
        Self {
            path: cache_dir.join(file_name),
            header_size,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the cache file. `Ok(None)` when it does not exist yet.
    pub fn load(&self) -> Result<Option<CacheFile>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to read cache file {}", self.path.display())
                });
            }
        };

        let mut lines = content.lines();
        let header: Vec<String> = lines
            .by_ref()
            .take(self.header_size)
            .map(str::to_string)
            .collect();
        let records = lines.map(RepoRecord::parse_line).collect();
        Ok(Some(CacheFile { header, records }))
    }

    /// Create a fresh cache file: placeholder header, no records.
    pub fn initialize(&self) -> Result<CacheFile> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create cache directory {}", parent.display())
            })?;
        }

        let cache = CacheFile {
            header: vec![PLACEHOLDER_HEADER_LINE.to_string(); self.header_size],
            records: Vec::new(),
        };
        self.persist(&cache)?;
        Ok(cache)
    }

    /// Full overwrite: header verbatim, then one record per line. A malformed
    /// slot only survives until reconciliation repairs it; if one is flushed
    /// early it is written out as an all-zero record.
    pub fn persist(&self, cache: &CacheFile) -> Result<()> {
        let mut out = String::new();
        for line in &cache.header {
            out.push_str(line);
            out.push('\n');
        }
        for record in &cache.records {
            match record {
                Some(record) => out.push_str(&record.to_line()),
                None => out.push_str(&RepoRecord::zeroed(IdentityHash([0; 32])).to_line()),
            }
            out.push('\n');
        }
        fs::write(&self.path, out)
            .with_context(|| format!("failed to write cache file {}", self.path.display()))
    }
}
