use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use feed_rs::parser;
use reqwest::Client;
use tracing::info;

use crate::config::Config;
use crate::db::{is_foreign_key_violation, is_unique_violation, Database, Feed, NewArticle};
use crate::error::ApiError;

/// Outcome of probing a URL without persisting anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedValidation {
    pub valid: bool,
    pub reason: Option<String>,
}

impl FeedValidation {
    fn valid() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn invalid(reason: &str) -> Self {
        Self {
            valid: false,
            reason: Some(reason.to_string()),
        }
    }
}

pub struct Ingestor {
    client: Client,
    db: Arc<Database>,
}

impl Ingestor {
    pub fn new(db: Arc<Database>, config: &Config) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .expect("Failed to create HTTP client");

        Self { client, db }
    }

    /// Probe a URL: fetch, parse, and require at least one entry.
    ///
    /// Network errors, timeouts, and malformed XML all fold into a single
    /// "Failed to parse feed" outcome; a well-formed document with zero
    /// entries reports "Invalid feed format". No persistence side effects.
    pub async fn validate(&self, url: &str) -> FeedValidation {
        match self.fetch_and_parse(url).await {
            Ok(parsed) if parsed.entries.is_empty() => {
                FeedValidation::invalid("Invalid feed format")
            }
            Ok(_) => FeedValidation::valid(),
            Err(_) => FeedValidation::invalid("Failed to parse feed"),
        }
    }

    /// Fetch, parse, and persist a new feed with all of its entries.
    ///
    /// The feed row and its articles are written in one transaction, so a
    /// failure partway through leaves nothing behind.
    pub async fn add_feed(
        &self,
        url: &str,
        category_id: Option<i64>,
    ) -> Result<Feed, ApiError> {
        if url.trim().is_empty() {
            return Err(ApiError::Validation("Feed URL is required".to_string()));
        }

        let parsed = self.fetch_and_parse(url).await?;
        if parsed.entries.is_empty() {
            return Err(ApiError::Upstream("Invalid feed format".to_string()));
        }

        let title = parsed
            .title
            .map(|t| t.content)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| url.to_string());

        let articles: Vec<NewArticle> =
            parsed.entries.into_iter().map(normalize_entry).collect();

        info!("Adding feed '{}' with {} entries", title, articles.len());

        match self
            .db
            .create_feed_with_articles(&title, url, category_id, &articles)
            .await
        {
            Ok(feed) => Ok(feed),
            Err(err) => match err.downcast_ref::<sqlx::Error>() {
                Some(db_err) if is_unique_violation(db_err) => Err(ApiError::Conflict),
                Some(db_err) if is_foreign_key_violation(db_err) => {
                    Err(ApiError::Validation("Unknown category".to_string()))
                }
                _ => Err(ApiError::Internal(err)),
            },
        }
    }

    /// Re-fetch an existing feed and upsert its entries by guid.
    ///
    /// Entries already present keep their read/bookmarked flags; new ones
    /// are inserted. `last_fetched` is stamped on success.
    pub async fn refresh_feed(&self, feed_id: i64) -> Result<Feed, ApiError> {
        let feed = self
            .db
            .get_feed(feed_id)
            .await?
            .ok_or(ApiError::NotFound("Feed"))?;

        let parsed = self.fetch_and_parse(&feed.url).await?;
        let articles: Vec<NewArticle> =
            parsed.entries.into_iter().map(normalize_entry).collect();

        info!(
            "Refreshed feed '{}' with {} entries",
            feed.title,
            articles.len()
        );

        let feed = self.db.refresh_feed_articles(feed_id, &articles).await?;
        Ok(feed)
    }

    async fn fetch_and_parse(&self, url: &str) -> Result<feed_rs::model::Feed, ApiError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| ApiError::Upstream(format!("Failed to fetch feed: {}", err)))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|err| ApiError::Upstream(format!("Failed to fetch feed: {}", err)))?;

        parser::parse(&bytes[..])
            .map_err(|_| ApiError::Upstream("Failed to parse feed".to_string()))
    }
}

/// Normalize a parsed entry into an insertable article.
///
/// Fallback chain: title -> empty, content -> summary -> empty, link ->
/// empty, pub_date -> now, guid -> link. Content passes through the
/// allow-list sanitizer exactly once, here.
pub fn normalize_entry(entry: feed_rs::model::Entry) -> NewArticle {
    let title = entry.title.map(|t| t.content).unwrap_or_default();

    let link = entry
        .links
        .first()
        .map(|l| l.href.clone())
        .unwrap_or_default();

    let content = entry
        .content
        .and_then(|c| c.body)
        .or_else(|| entry.summary.map(|s| s.content))
        .map(|raw| sanitize_html(&raw))
        .unwrap_or_default();

    let pub_date = entry.published.or(entry.updated).unwrap_or_else(Utc::now);

    let guid = if entry.id.is_empty() {
        link.clone()
    } else {
        entry.id
    };

    NewArticle {
        title,
        content,
        link,
        pub_date,
        guid,
    }
}

/// Strip scripts, event handlers, and other disallowed markup, keeping the
/// usual formatting tags. Runs at ingestion so stored content is already
/// safe to render.
pub fn sanitize_html(content: &str) -> String {
    ammonia::clean(content)
}
