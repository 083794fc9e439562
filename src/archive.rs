//! Static archive of contributions to repositories that are no longer
//! reachable through the live listing.
//!
//! The archive file is maintained by hand and only ever read here: a fixed
//! 7-line header, one data line per archived repository in the cache-record
//! shape, then a 3-line footer whose final line carries a supplemental
//! authored-commit correction as its fifth whitespace-separated token.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};

const HEADER_LINES: usize = 7;
const FOOTER_LINES: usize = 3;

/// Sums across the archive, folded additively into the aggregation output.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ArchiveTotals {
    pub lines_added: u64,
    pub lines_deleted: u64,
    pub net_loc: i64,
    pub authored_commits: u64,
    pub repos: u64,
}

/// Read and sum the archive. `Ok(None)` when the file does not exist, in
/// which case nothing is merged.
pub fn read_archive(path: &Path) -> Result<Option<ArchiveTotals>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to read archive file {}", path.display()));
        }
    };

    let lines: Vec<&str> = content.lines().collect();
    if lines.len() < HEADER_LINES + FOOTER_LINES {
        bail!(
            "archive file {} is too short: {} lines, need at least {}",
            path.display(),
            lines.len(),
            HEADER_LINES + FOOTER_LINES
        );
    }

    let mut totals = ArchiveTotals::default();
    for line in &lines[HEADER_LINES..lines.len() - FOOTER_LINES] {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let [_hash, _remote_commits, authored, added, deleted] = tokens.as_slice() else {
            bail!("malformed archive line: {line:?}");
        };
        totals.lines_added += added
            .parse::<u64>()
            .with_context(|| format!("bad added-LOC token in archive line {line:?}"))?;
        totals.lines_deleted += deleted
            .parse::<u64>()
            .with_context(|| format!("bad deleted-LOC token in archive line {line:?}"))?;
        // Some historical lines carry a placeholder here instead of a count.
        if let Ok(commits) = authored.parse::<u64>() {
            totals.authored_commits += commits;
        }
        totals.repos += 1;
    }

    totals.authored_commits += footer_correction(lines[lines.len() - 1]);
    totals.net_loc = totals.lines_added as i64 - totals.lines_deleted as i64;
    Ok(Some(totals))
}

/// The footer's fifth whitespace-separated token, trailing punctuation
/// stripped, is an authored-commit correction for commits the data lines
/// cannot attribute.
fn footer_correction(last_line: &str) -> u64 {
    last_line
        .split_whitespace()
        .nth(4)
        .map(|token| token.trim_end_matches(|c: char| !c.is_ascii_digit()))
        .and_then(|token| token.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_archive(dir: &TempDir, data_lines: &[&str], footer_last: &str) -> PathBuf {
        let path = dir.path().join("repository_archive.txt");
        let mut content = String::new();
        for i in 0..HEADER_LINES {
            content.push_str(&format!("header line {i}\n"));
        }
        for line in data_lines {
            content.push_str(line);
            content.push('\n');
        }
        content.push_str("footer line 1\n");
        content.push_str("footer line 2\n");
        content.push_str(footer_last);
        content.push('\n');
        fs::write(&path, content).expect("write archive");
        path
    }

    #[test]
    fn missing_archive_reads_as_none() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("absent.txt");
        assert_eq!(read_archive(&path).expect("read"), None);
    }

    #[test]
    fn sums_data_lines_and_footer_correction() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_archive(
            &dir,
            &[
                "aaaa 50 3 60 10",
                "bbbb 20 2 30 5",
                "cccc 10 2 10 5",
            ],
            "Commits in deleted repos: 7.",
        );

        let totals = read_archive(&path).expect("read").expect("archive exists");
        assert_eq!(
            totals,
            ArchiveTotals {
                lines_added: 100,
                lines_deleted: 20,
                net_loc: 80,
                authored_commits: 7 + 7,
                repos: 3,
            }
        );
    }

    #[test]
    fn non_numeric_commit_token_is_skipped() {
        let dir = TempDir::new().expect("tempdir");
        let path = write_archive(
            &dir,
            &["aaaa 50 unknown 60 10"],
            "no correction token here",
        );

        let totals = read_archive(&path).expect("read").expect("archive exists");
        assert_eq!(totals.authored_commits, 0);
        assert_eq!(totals.lines_added, 60);
        assert_eq!(totals.lines_deleted, 10);
        assert_eq!(totals.repos, 1);
    }

    #[test]
    fn header_and_footer_lines_are_never_summed() {
        let dir = TempDir::new().expect("tempdir");
        // A single data line surrounded by header/footer text that would
        // explode the totals if it were parsed as data.
        let path = write_archive(&dir, &["aaaa 1 1 5 2"], "x x x x 0");

        let totals = read_archive(&path).expect("read").expect("archive exists");
        assert_eq!(totals.repos, 1);
        assert_eq!(totals.lines_added, 5);
        assert_eq!(totals.lines_deleted, 2);
    }

    #[test]
    fn too_short_archive_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("short.txt");
        fs::write(&path, "only\nthree\nlines\n").expect("write");
        let err = read_archive(&path).expect_err("short archive must fail");
        assert!(format!("{err:#}").contains("too short"));
    }
}
