//! Client-side state coordination.
//!
//! The pieces a front end needs to stay consistent with the server: a typed
//! feed selector, a query cache with explicit invalidation, a durable
//! key/value store for UI state and article snapshots, and the retry policy
//! for read queries.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Literal store key the selected feed persists under.
const SELECTED_FEED_KEY: &str = "selectedFeed";

/// Which articles the user is looking at.
///
/// Replaces the sentinel encoding (`null` = all, `-1` = bookmarked, positive
/// id = one feed); the sentinels survive only inside the durable store for
/// compatibility with previously written state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FeedSelector {
    #[default]
    All,
    Bookmarked,
    Feed(i64),
}

impl FeedSelector {
    /// Parse the selector out of a URL query value. Unrecognized or
    /// non-positive values yield `None` so callers fall through to the
    /// durable store.
    pub fn from_query(value: Option<&str>) -> Option<FeedSelector> {
        match value? {
            "bookmarked" => Some(FeedSelector::Bookmarked),
            raw => raw
                .parse::<i64>()
                .ok()
                .filter(|id| *id > 0)
                .map(FeedSelector::Feed),
        }
    }

    /// Render the selector for the URL query string; `All` carries no value.
    pub fn to_query(self) -> Option<String> {
        match self {
            FeedSelector::All => None,
            FeedSelector::Bookmarked => Some("bookmarked".to_string()),
            FeedSelector::Feed(id) => Some(id.to_string()),
        }
    }

    /// API path serving this selector's article list.
    pub fn articles_path(self) -> String {
        match self {
            FeedSelector::All => "/api/articles".to_string(),
            FeedSelector::Bookmarked => "/api/articles/bookmarked".to_string(),
            FeedSelector::Feed(id) => format!("/api/articles?feedId={}", id),
        }
    }

    fn to_stored(self) -> Option<i64> {
        match self {
            FeedSelector::All => None,
            FeedSelector::Bookmarked => Some(-1),
            FeedSelector::Feed(id) => Some(id),
        }
    }

    fn from_stored(value: Option<i64>) -> FeedSelector {
        match value {
            Some(-1) => FeedSelector::Bookmarked,
            Some(id) if id > 0 => FeedSelector::Feed(id),
            _ => FeedSelector::All,
        }
    }
}

/// The URL wins on initial load; the store is consulted only when the URL
/// carries no selector.
pub fn resolve_initial_selection(
    url_value: Option<&str>,
    store: &StateStore,
) -> FeedSelector {
    FeedSelector::from_query(url_value).unwrap_or_else(|| store.selected_feed())
}

/// Identity of a cached read query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Feeds,
    Articles(FeedSelector),
    Article(i64),
    Categories,
}

/// Which cached queries a mutation makes stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidatePattern {
    Feeds,
    Categories,
    /// Every article list, whatever the selector
    ArticleLists,
    /// The all-feeds list plus the list for one feed
    ArticleListsFor(i64),
    /// The bookmarked list only
    BookmarkedList,
    /// One cached article snapshot
    Article(i64),
}

impl InvalidatePattern {
    fn matches(&self, key: &QueryKey) -> bool {
        match (self, key) {
            (InvalidatePattern::Feeds, QueryKey::Feeds) => true,
            (InvalidatePattern::Categories, QueryKey::Categories) => true,
            (InvalidatePattern::ArticleLists, QueryKey::Articles(_)) => true,
            (
                InvalidatePattern::ArticleListsFor(_),
                QueryKey::Articles(FeedSelector::All),
            ) => true,
            (
                InvalidatePattern::ArticleListsFor(id),
                QueryKey::Articles(FeedSelector::Feed(feed)),
            ) => feed == id,
            (
                InvalidatePattern::BookmarkedList,
                QueryKey::Articles(FeedSelector::Bookmarked),
            ) => true,
            (InvalidatePattern::Article(id), QueryKey::Article(article)) => article == id,
            _ => false,
        }
    }
}

/// Explicit query cache: all cached reads live here, and mutations
/// invalidate by pattern instead of reaching into ambient global state.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: HashMap<QueryKey, Value>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &QueryKey) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn put(&mut self, key: QueryKey, value: Value) {
        self.entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn invalidate(&mut self, pattern: InvalidatePattern) {
        self.entries.retain(|key, _| !pattern.matches(key));
    }

    /// Add, rename, refresh, or delete of a feed: the feeds list and every
    /// article list could now be stale.
    pub fn after_feed_mutation(&mut self) {
        self.invalidate(InvalidatePattern::Feeds);
        self.invalidate(InvalidatePattern::ArticleLists);
    }

    /// Read toggle: the article itself plus the lists that embed it.
    pub fn after_read_toggle(&mut self, article_id: i64, feed_id: i64) {
        self.invalidate(InvalidatePattern::Article(article_id));
        self.invalidate(InvalidatePattern::ArticleListsFor(feed_id));
    }

    /// Bookmark toggle: same as a read toggle, and the bookmarked list.
    pub fn after_bookmark_toggle(&mut self, article_id: i64, feed_id: i64) {
        self.after_read_toggle(article_id, feed_id);
        self.invalidate(InvalidatePattern::BookmarkedList);
    }

    /// Category mutations also touch the feeds list, which embeds them.
    pub fn after_category_mutation(&mut self) {
        self.invalidate(InvalidatePattern::Categories);
        self.invalidate(InvalidatePattern::Feeds);
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    /// Article snapshots keyed by article id
    #[serde(default)]
    articles: BTreeMap<String, Value>,
    /// UI state records keyed by name
    #[serde(default)]
    state: BTreeMap<String, Value>,
}

/// Durable JSON-file key/value store mirroring UI state across sessions.
///
/// Loaded once at open; every mutation writes the file back. A corrupt
/// store file is treated as empty rather than refusing to start.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    data: StoreData,
}

impl StateStore {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => StoreData::default(),
        };
        Ok(Self { path, data })
    }

    pub fn save_article(&mut self, id: i64, article: Value) -> anyhow::Result<()> {
        self.data.articles.insert(id.to_string(), article);
        self.persist()
    }

    pub fn get_article(&self, id: i64) -> Option<&Value> {
        self.data.articles.get(&id.to_string())
    }

    pub fn set_state(&mut self, key: &str, value: Value) -> anyhow::Result<()> {
        self.data.state.insert(key.to_string(), value);
        self.persist()
    }

    pub fn get_state(&self, key: &str) -> Option<&Value> {
        self.data.state.get(key)
    }

    pub fn set_selected_feed(&mut self, selector: FeedSelector) -> anyhow::Result<()> {
        let value = match selector.to_stored() {
            Some(id) => json!(id),
            None => Value::Null,
        };
        self.set_state(SELECTED_FEED_KEY, value)
    }

    pub fn selected_feed(&self) -> FeedSelector {
        let stored = self.get_state(SELECTED_FEED_KEY).and_then(Value::as_i64);
        FeedSelector::from_stored(stored)
    }

    fn persist(&self) -> anyhow::Result<()> {
        let raw = serde_json::to_string_pretty(&self.data)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

/// Whether a request is a cached read or a side-effecting mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    Mutation,
}

/// Retry policy for talking to the server: reads retry transient failures
/// with exponential backoff, mutations never retry (a resubmitted add-feed
/// would double its side effects).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// `failures` is the number of attempts that have already failed.
    /// `status` is the HTTP status of the last failure, or `None` for a
    /// network-level error.
    pub fn should_retry(
        &self,
        kind: RequestKind,
        status: Option<u16>,
        failures: u32,
    ) -> bool {
        if kind == RequestKind::Mutation {
            return false;
        }
        if failures >= self.max_attempts {
            return false;
        }
        // Client errors are not transient; retrying a 404 stays a 404
        if let Some(status) = status {
            if (400..500).contains(&status) {
                return false;
            }
        }
        true
    }

    pub fn backoff(&self, failures: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(failures)
    }
}
