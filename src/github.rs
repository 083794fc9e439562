//! GitHub GraphQL v4 client.
//!
//! Everything the rest of the crate knows about GitHub goes through the
//! [`RemoteSource`] trait, so the aggregation engine can be exercised against
//! a stub in tests. [`GithubClient`] is the real implementation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const GRAPHQL_ENDPOINT: &str = "https://api.github.com/graphql";
const USER_AGENT: &str = concat!("octocard/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A failed remote call. 403 is GitHub's undocumented anti-abuse status and
/// gets its own variant so callers can back off instead of treating it as a
/// generic failure.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("rate limited by GitHub (HTTP 403): {body}")]
    RateLimited { body: String },
    #[error("GitHub API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("failed to decode GitHub response: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TransportError::RateLimited { .. })
    }

    fn from_status(status: u16, body: String) -> Self {
        let body = error_message(&body);
        if status == 403 {
            TransportError::RateLimited { body }
        } else {
            TransportError::Status { status, body }
        }
    }
}

/// GitHub error bodies are usually JSON with a "message" field; fall back
/// to the raw body for anything else.
fn error_message(body: &str) -> String {
    if body.trim_start().starts_with('{') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
            if let Some(message) = value.get("message").and_then(|m| m.as_str()) {
                return message.to_string();
            }
        }
    }
    body.to_string()
}

/// How the account relates to a repository. Serializes to the GraphQL
/// `RepositoryAffiliation` enum values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Affiliation {
    Owner,
    Collaborator,
    OrganizationMember,
}

/// Scopes used for the LOC listing and the contributed-repository count.
pub const ALL_AFFILIATIONS: [Affiliation; 3] = [
    Affiliation::Owner,
    Affiliation::Collaborator,
    Affiliation::OrganizationMember,
];

/// GraphQL node id of the tracked account, resolved once per run. Commit
/// entries are attributed only when their author id equals this value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorIdentity(pub String);

/// One repository from the LOC listing: canonical `owner/name` plus the
/// default-branch commit count used for staleness checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoListing {
    pub name_with_owner: String,
    pub commit_count: u64,
}

impl RepoListing {
    /// Split `owner/name` into its two halves. Repositories with no slash
    /// cannot exist on GitHub; treat the whole string as the name.
    pub fn split(&self) -> (&str, &str) {
        match self.name_with_owner.split_once('/') {
            Some((owner, name)) => (owner, name),
            None => ("", self.name_with_owner.as_str()),
        }
    }
}

/// One page of the repository listing.
#[derive(Debug, Clone)]
pub struct RepoPage {
    pub repos: Vec<RepoListing>,
    pub has_next: bool,
    pub end_cursor: Option<String>,
}

/// One commit from a history walk. `author` is `None` for commits whose
/// author has no GitHub account attached.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub author: Option<AuthorIdentity>,
    pub additions: u64,
    pub deletions: u64,
}

/// One page of a commit-history walk. `Missing` is the distinguished result
/// for a repository with no default branch; it is not an error.
#[derive(Debug, Clone)]
pub enum HistoryPage {
    Missing,
    Commits {
        entries: Vec<HistoryEntry>,
        has_next: bool,
        end_cursor: Option<String>,
    },
}

/// Remote query surface consumed by the aggregation engine and the card
/// renderer. Listing and history results are page-granular so callers own
/// the pagination loops.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Resolve the tracked account's GraphQL node id.
    async fn resolve_author(&self, login: &str) -> Result<AuthorIdentity, TransportError>;

    /// One page of the repository listing for the given affiliation scopes.
    /// Callers must drain every page before acting on the listing.
    async fn repository_page(
        &self,
        login: &str,
        affiliations: &[Affiliation],
        cursor: Option<&str>,
    ) -> Result<RepoPage, TransportError>;

    /// One page of a repository's default-branch commit history.
    async fn history_page(
        &self,
        owner: &str,
        name: &str,
        cursor: Option<&str>,
    ) -> Result<HistoryPage, TransportError>;

    /// Number of accounts following the user.
    async fn follower_count(&self, login: &str) -> Result<u64, TransportError>;

    /// Total repositories visible under the given affiliation scopes.
    async fn repo_count(
        &self,
        login: &str,
        affiliations: &[Affiliation],
    ) -> Result<u64, TransportError>;

    /// Stars across repositories under the given affiliation scopes.
    async fn star_count(
        &self,
        login: &str,
        affiliations: &[Affiliation],
    ) -> Result<u64, TransportError>;
}

/// Per-query call counters, bumped at every call site and reported at the
/// end of a run.
#[derive(Debug, Default)]
pub struct QueryCounters {
    viewer: AtomicU32,
    listing: AtomicU32,
    history: AtomicU32,
    followers: AtomicU32,
    overview: AtomicU32,
}

impl QueryCounters {
    pub fn total(&self) -> u32 {
        self.snapshot().iter().map(|(_, n)| n).sum()
    }

    pub fn snapshot(&self) -> Vec<(&'static str, u32)> {
        vec![
            ("viewer", self.viewer.load(Ordering::Relaxed)),
            ("repo listing", self.listing.load(Ordering::Relaxed)),
            ("commit history", self.history.load(Ordering::Relaxed)),
            ("followers", self.followers.load(Ordering::Relaxed)),
            ("repo overview", self.overview.load(Ordering::Relaxed)),
        ]
    }

    fn bump(counter: &AtomicU32) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// GraphQL wire types
// ============================================================================

#[derive(Serialize)]
struct GraphqlRequest<'a, V: Serialize> {
    query: &'a str,
    variables: V,
}

#[derive(Serialize)]
struct LoginVars<'a> {
    login: &'a str,
}

#[derive(Serialize)]
struct ListingVars<'a> {
    login: &'a str,
    affiliations: &'a [Affiliation],
    cursor: Option<&'a str>,
}

#[derive(Serialize)]
struct HistoryVars<'a> {
    owner: &'a str,
    name: &'a str,
    cursor: Option<&'a str>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct PageInfo {
    #[serde(rename = "endCursor")]
    end_cursor: Option<String>,
    #[serde(rename = "hasNextPage")]
    has_next_page: bool,
}

#[derive(Deserialize)]
struct UserIdData {
    user: IdNode,
}

#[derive(Deserialize)]
struct IdNode {
    id: String,
}

#[derive(Deserialize)]
struct RepoListData {
    user: RepoListUser,
}

#[derive(Deserialize)]
struct RepoListUser {
    repositories: RepoConnection,
}

#[derive(Deserialize)]
struct RepoConnection {
    #[serde(default)]
    edges: Vec<RepoEdge>,
    #[serde(rename = "pageInfo")]
    page_info: PageInfo,
}

#[derive(Deserialize)]
struct RepoEdge {
    node: RepoNode,
}

#[derive(Deserialize)]
struct RepoNode {
    #[serde(rename = "nameWithOwner")]
    name_with_owner: String,
    #[serde(rename = "defaultBranchRef")]
    default_branch_ref: Option<BranchRef>,
    #[serde(default)]
    stargazers: Option<CountNode>,
}

#[derive(Deserialize)]
struct BranchRef {
    target: Option<CommitTarget>,
}

#[derive(Deserialize)]
struct CommitTarget {
    history: HistoryConnection,
}

#[derive(Deserialize)]
struct HistoryConnection {
    #[serde(rename = "totalCount", default)]
    total_count: u64,
    #[serde(default)]
    edges: Vec<CommitEdge>,
    #[serde(rename = "pageInfo", default)]
    page_info: Option<PageInfo>,
}

#[derive(Deserialize)]
struct CommitEdge {
    node: CommitNode,
}

#[derive(Deserialize)]
struct CommitNode {
    additions: u64,
    deletions: u64,
    author: Option<CommitAuthor>,
}

#[derive(Deserialize)]
struct CommitAuthor {
    user: Option<IdNode>,
}

#[derive(Deserialize)]
struct HistoryData {
    repository: Option<HistoryRepo>,
}

#[derive(Deserialize)]
struct HistoryRepo {
    #[serde(rename = "defaultBranchRef")]
    default_branch_ref: Option<BranchRef>,
}

#[derive(Deserialize)]
struct FollowerData {
    user: FollowerUser,
}

#[derive(Deserialize)]
struct FollowerUser {
    followers: CountNode,
}

#[derive(Deserialize)]
struct CountNode {
    #[serde(rename = "totalCount")]
    total_count: u64,
}

#[derive(Deserialize)]
struct RepoCountData {
    user: RepoCountUser,
}

#[derive(Deserialize)]
struct RepoCountUser {
    repositories: CountNode,
}

// ============================================================================
// Queries
// ============================================================================

const VIEWER_QUERY: &str = "
query ($login: String!) {
    user(login: $login) { id }
}";

const LISTING_QUERY: &str = "
query ($affiliations: [RepositoryAffiliation], $login: String!, $cursor: String) {
    user(login: $login) {
        repositories(first: 60, after: $cursor, ownerAffiliations: $affiliations) {
            edges {
                node {
                    ... on Repository {
                        nameWithOwner
                        defaultBranchRef {
                            target { ... on Commit { history { totalCount } } }
                        }
                    }
                }
            }
            pageInfo { endCursor hasNextPage }
        }
    }
}";

const HISTORY_QUERY: &str = "
query ($name: String!, $owner: String!, $cursor: String) {
    repository(name: $name, owner: $owner) {
        defaultBranchRef {
            target {
                ... on Commit {
                    history(first: 100, after: $cursor) {
                        totalCount
                        edges {
                            node {
                                ... on Commit { additions deletions }
                                author { user { id } }
                            }
                        }
                        pageInfo { endCursor hasNextPage }
                    }
                }
            }
        }
    }
}";

const FOLLOWER_QUERY: &str = "
query ($login: String!) {
    user(login: $login) { followers { totalCount } }
}";

const REPO_COUNT_QUERY: &str = "
query ($affiliations: [RepositoryAffiliation], $login: String!, $cursor: String) {
    user(login: $login) {
        repositories(first: 1, after: $cursor, ownerAffiliations: $affiliations) {
            totalCount
        }
    }
}";

const STAR_QUERY: &str = "
query ($affiliations: [RepositoryAffiliation], $login: String!, $cursor: String) {
    user(login: $login) {
        repositories(first: 100, after: $cursor, ownerAffiliations: $affiliations) {
            edges { node { ... on Repository { nameWithOwner stargazers { totalCount } } } }
            pageInfo { endCursor hasNextPage }
        }
    }
}";

// ============================================================================
// Client
// ============================================================================

/// Real GitHub client. All calls are blocking request/response awaits; the
/// engine issues at most one at a time.
pub struct GithubClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
    counters: QueryCounters,
}

impl GithubClient {
    pub fn new(token: String) -> Result<Self> {
        Self::with_endpoint(token, GRAPHQL_ENDPOINT.to_string())
    }

    /// Endpoint override used by tests to point the client at a local server.
    pub fn with_endpoint(token: String, endpoint: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            endpoint,
            token,
            counters: QueryCounters::default(),
        })
    }

    pub fn counters(&self) -> &QueryCounters {
        &self.counters
    }

    async fn post<T, V>(&self, query: &str, variables: V) -> Result<T, TransportError>
    where
        T: DeserializeOwned,
        V: Serialize,
    {
        // reqwest is built without its json feature; serialize with simd-json
        // and set the body by hand.
        let body = simd_json::to_vec(&GraphqlRequest { query, variables })
            .map_err(|e| TransportError::Decode(e.to_string()))?;

        let response = self
            .http
            .post(&self.endpoint)
            .header("Authorization", format!("token {}", self.token))
            .header("User-Agent", USER_AGENT)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::from_status(status.as_u16(), body));
        }

        let mut bytes = response.bytes().await?.to_vec();
        let envelope: Envelope<T> = simd_json::from_slice(&mut bytes)
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl RemoteSource for GithubClient {
    async fn resolve_author(&self, login: &str) -> Result<AuthorIdentity, TransportError> {
        QueryCounters::bump(&self.counters.viewer);
        let data: UserIdData = self.post(VIEWER_QUERY, LoginVars { login }).await?;
        Ok(AuthorIdentity(data.user.id))
    }

    async fn repository_page(
        &self,
        login: &str,
        affiliations: &[Affiliation],
        cursor: Option<&str>,
    ) -> Result<RepoPage, TransportError> {
        QueryCounters::bump(&self.counters.listing);
        let data: RepoListData = self
            .post(LISTING_QUERY, ListingVars { login, affiliations, cursor })
            .await?;
        let connection = data.user.repositories;
        let repos = connection
            .edges
            .into_iter()
            .map(|edge| {
                // No default branch means no history at all; list it with a
                // zero commit count.
                let commit_count = edge
                    .node
                    .default_branch_ref
                    .and_then(|branch| branch.target)
                    .map(|target| target.history.total_count)
                    .unwrap_or(0);
                RepoListing {
                    name_with_owner: edge.node.name_with_owner,
                    commit_count,
                }
            })
            .collect();
        Ok(RepoPage {
            repos,
            has_next: connection.page_info.has_next_page,
            end_cursor: connection.page_info.end_cursor,
        })
    }

    async fn history_page(
        &self,
        owner: &str,
        name: &str,
        cursor: Option<&str>,
    ) -> Result<HistoryPage, TransportError> {
        QueryCounters::bump(&self.counters.history);
        let data: HistoryData = self
            .post(HISTORY_QUERY, HistoryVars { owner, name, cursor })
            .await?;

        let history = data
            .repository
            .and_then(|repo| repo.default_branch_ref)
            .and_then(|branch| branch.target)
            .map(|target| target.history);
        let Some(history) = history else {
            return Ok(HistoryPage::Missing);
        };

        let entries = history
            .edges
            .into_iter()
            .map(|edge| HistoryEntry {
                author: edge
                    .node
                    .author
                    .and_then(|a| a.user)
                    .map(|u| AuthorIdentity(u.id)),
                additions: edge.node.additions,
                deletions: edge.node.deletions,
            })
            .collect();
        let (has_next, end_cursor) = match history.page_info {
            Some(info) => (info.has_next_page, info.end_cursor),
            None => (false, None),
        };
        Ok(HistoryPage::Commits {
            entries,
            has_next,
            end_cursor,
        })
    }

    async fn follower_count(&self, login: &str) -> Result<u64, TransportError> {
        QueryCounters::bump(&self.counters.followers);
        let data: FollowerData = self.post(FOLLOWER_QUERY, LoginVars { login }).await?;
        Ok(data.user.followers.total_count)
    }

    async fn repo_count(
        &self,
        login: &str,
        affiliations: &[Affiliation],
    ) -> Result<u64, TransportError> {
        QueryCounters::bump(&self.counters.overview);
        let data: RepoCountData = self
            .post(
                REPO_COUNT_QUERY,
                ListingVars {
                    login,
                    affiliations,
                    cursor: None,
                },
            )
            .await?;
        Ok(data.user.repositories.total_count)
    }

    async fn star_count(
        &self,
        login: &str,
        affiliations: &[Affiliation],
    ) -> Result<u64, TransportError> {
        let mut total = 0u64;
        let mut cursor: Option<String> = None;
        loop {
            QueryCounters::bump(&self.counters.overview);
            let data: RepoListData = self
                .post(
                    STAR_QUERY,
                    ListingVars {
                        login,
                        affiliations,
                        cursor: cursor.as_deref(),
                    },
                )
                .await?;
            let connection = data.user.repositories;
            for edge in connection.edges {
                if let Some(stars) = edge.node.stargazers {
                    total += stars.total_count;
                }
            }
            if !connection.page_info.has_next_page {
                return Ok(total);
            }
            cursor = connection.page_info.end_cursor;
        }
    }
}
