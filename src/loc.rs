//! Incremental LOC accounting.
//!
//! Reconciles the on-disk cache against the live repository listing and
//! walks commit history only for repositories whose upstream commit count
//! changed. A transport failure mid-run flushes every record finalized so
//! far before the error propagates, so the cache is never left truncated or
//! holding a half-written record.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cache::{CacheFile, CacheStore, IdentityHash, RepoRecord};
use crate::github::{
    Affiliation, AuthorIdentity, HistoryPage, RemoteSource, TransportError,
};

/// Outcome of one aggregation pass. `cache_hit` is true iff no rebuild
/// occurred and no record required a history walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Aggregation {
    pub lines_added: u64,
    pub lines_deleted: u64,
    pub net_loc: i64,
    pub cache_hit: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct HistoryTotals {
    authored_commits: u64,
    lines_added: u64,
    lines_deleted: u64,
}

/// Flushes best-known cache state before a transport error escapes.
struct CrashGuard<'a> {
    store: &'a CacheStore,
}

impl CrashGuard<'_> {
    /// Persist the header plus every record finalized so far, then convert
    /// the transport error for propagation. Rate limiting keeps its distinct
    /// variant in the chain so callers can branch on it.
    fn flush_and_raise(&self, cache: &CacheFile, err: TransportError) -> anyhow::Error {
        if let Err(flush_err) = self.store.persist(cache) {
            eprintln!(
                "⚠️  Failed to flush partial cache to {}: {flush_err:#}",
                self.store.path().display()
            );
        } else {
            eprintln!(
                "Partial progress saved to {} before aborting.",
                self.store.path().display()
            );
        }
        anyhow::Error::new(err).context("remote call failed during reconciliation")
    }
}

/// Drain every page of the repository listing. No partial listings are acted
/// upon; a failure here aborts before the cache is touched.
pub async fn drain_listing<R: RemoteSource + ?Sized>(
    remote: &R,
    login: &str,
    affiliations: &[Affiliation],
) -> Result<Vec<crate::github::RepoListing>, TransportError> {
    let mut repos = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = remote
            .repository_page(login, affiliations, cursor.as_deref())
            .await?;
        repos.extend(page.repos);
        if !page.has_next {
            return Ok(repos);
        }
        cursor = page.end_cursor;
    }
}

/// Walk one repository's default-branch history page by page, accumulating
/// additions, deletions and commit count for entries authored by `author`.
/// Returns `None` for a repository with no default branch.
///
/// Iterative on purpose: a high-activity repository may have arbitrarily
/// many pages.
async fn walk_history<R: RemoteSource + ?Sized>(
    remote: &R,
    owner: &str,
    name: &str,
    author: &AuthorIdentity,
) -> Result<Option<HistoryTotals>, TransportError> {
    let mut totals = HistoryTotals::default();
    let mut cursor: Option<String> = None;
    loop {
        let page = remote.history_page(owner, name, cursor.as_deref()).await?;
        let (entries, has_next, end_cursor) = match page {
            HistoryPage::Missing => return Ok(None),
            HistoryPage::Commits {
                entries,
                has_next,
                end_cursor,
            } => (entries, has_next, end_cursor),
        };

        let page_was_empty = entries.is_empty();
        for entry in entries {
            if entry.author.as_ref() == Some(author) {
                totals.authored_commits += 1;
                totals.lines_added += entry.additions;
                totals.lines_deleted += entry.deletions;
            }
        }

        if page_was_empty || !has_next {
            return Ok(Some(totals));
        }
        cursor = end_cursor;
    }
}

/// Run one full aggregation pass: listing, cache reconciliation, persist,
/// totals.
pub async fn aggregate<R: RemoteSource + ?Sized>(
    remote: &R,
    store: &CacheStore,
    login: &str,
    author: &AuthorIdentity,
    affiliations: &[Affiliation],
    force_rebuild: bool,
) -> Result<Aggregation> {
    let listing = drain_listing(remote, login, affiliations)
        .await
        .context("failed to list repositories")?;

    let mut cache = match store.load()? {
        Some(cache) => cache,
        None => store.initialize()?,
    };

    let mut cache_hit = true;

    // Rebuild trigger: record count drifted from the listing, or forced.
    if cache.records.len() != listing.len() || force_rebuild {
        cache_hit = false;
        cache.records = listing
            .iter()
            .map(|repo| Some(RepoRecord::zeroed(IdentityHash::of(&repo.name_with_owner))))
            .collect();
        store.persist(&cache)?;
    }

    // Repair malformed lines before any remote call: rebuild exactly that
    // record, keyed to the listing entry at the same index. Its zero commit
    // count makes the staleness check below refetch it.
    for (index, repo) in listing.iter().enumerate() {
        if cache.records[index].is_none() {
            eprintln!(
                "⚠️  Cache record {index} is malformed; rebuilding it for {}",
                repo.name_with_owner
            );
            cache.records[index] =
                Some(RepoRecord::zeroed(IdentityHash::of(&repo.name_with_owner)));
        }
    }

    let guard = CrashGuard { store };

    for (index, repo) in listing.iter().enumerate() {
        let expected = IdentityHash::of(&repo.name_with_owner);
        let Some(record) = &cache.records[index] else {
            continue;
        };

        if record.identity != expected {
            // Positional correspondence broke for this record. Leaving it
            // untouched matches the historical behavior; it heals on the
            // next full rebuild.
            eprintln!(
                "⚠️  Cache record {index} does not match {}; skipping it",
                repo.name_with_owner
            );
            continue;
        }

        if record.remote_commits == repo.commit_count {
            continue;
        }

        cache_hit = false;
        let (owner, name) = repo.split();
        let walked = match walk_history(remote, owner, name, author).await {
            Ok(walked) => walked,
            Err(err) => return Err(guard.flush_and_raise(&cache, err)),
        };

        if let Some(record) = &mut cache.records[index] {
            match walked {
                Some(totals) => {
                    record.authored_commits = totals.authored_commits;
                    record.lines_added = totals.lines_added;
                    record.lines_deleted = totals.lines_deleted;
                }
                // No default branch: zero the counters but still record the
                // upstream commit count so the repository stays settled.
                None => {
                    record.authored_commits = 0;
                    record.lines_added = 0;
                    record.lines_deleted = 0;
                }
            }
            record.remote_commits = repo.commit_count;
        }
    }

    store.persist(&cache)?;

    let (lines_added, lines_deleted) = cache.loc_totals();
    Ok(Aggregation {
        lines_added,
        lines_deleted,
        net_loc: lines_added as i64 - lines_deleted as i64,
        cache_hit,
    })
}

/// Total commits authored by the tracked account, summed from the cache.
pub fn authored_commit_total(store: &CacheStore) -> Result<u64> {
    let cache = store
        .load()?
        .context("cache file missing; run an aggregation pass first")?;
    Ok(cache.commit_total())
}
