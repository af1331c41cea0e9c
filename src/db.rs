use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Feed {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub category_id: Option<i64>,
    pub last_fetched: Option<String>,
}

/// A feed with its category resolved, as returned by the list endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct FeedWithCategory {
    #[serde(flatten)]
    pub feed: Feed,
    pub category: Option<Category>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub content: String,
    pub link: String,
    pub pub_date: String,
    pub guid: String,
    pub read: bool,
    pub bookmarked: bool,
}

/// A normalized entry ready for insertion, produced by the ingestor.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub title: String,
    pub content: String,
    pub link: String,
    pub pub_date: DateTime<Utc>,
    pub guid: String,
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.kind() == sqlx::error::ErrorKind::UniqueViolation)
}

pub fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.kind() == sqlx::error::ErrorKind::ForeignKeyViolation)
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // SQLite ships with foreign keys off; cascade delete depends on them.
        let options = SqliteConnectOptions::from_str(database_url)?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                color TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                category_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
                last_fetched TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                link TEXT NOT NULL,
                pub_date TEXT NOT NULL,
                guid TEXT NOT NULL,
                read INTEGER NOT NULL DEFAULT 0,
                bookmarked INTEGER NOT NULL DEFAULT 0,
                UNIQUE(feed_id, guid)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_articles_pub_date
            ON articles(pub_date DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_articles_feed_pub_date
            ON articles(feed_id, pub_date DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Categories
    // ------------------------------------------------------------------

    pub async fn create_category(&self, name: &str, color: &str) -> anyhow::Result<Category> {
        let result = sqlx::query("INSERT INTO categories (name, color) VALUES (?, ?)")
            .bind(name)
            .bind(color)
            .execute(&self.pool)
            .await?;

        let category =
            sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE id = ?")
                .bind(result.last_insert_rowid())
                .fetch_one(&self.pool)
                .await?;
        Ok(category)
    }

    pub async fn get_all_categories(&self) -> anyhow::Result<Vec<Category>> {
        let categories =
            sqlx::query_as::<_, Category>("SELECT * FROM categories ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(categories)
    }

    // ------------------------------------------------------------------
    // Feeds
    // ------------------------------------------------------------------

    pub async fn get_all_feeds(&self) -> anyhow::Result<Vec<FeedWithCategory>> {
        let feeds = sqlx::query_as::<_, Feed>("SELECT * FROM feeds ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let categories: HashMap<i64, Category> = self
            .get_all_categories()
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        Ok(feeds
            .into_iter()
            .map(|feed| {
                let category = feed.category_id.and_then(|id| categories.get(&id).cloned());
                FeedWithCategory { feed, category }
            })
            .collect())
    }

    pub async fn get_feed(&self, feed_id: i64) -> anyhow::Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    /// Insert a feed and its articles as a single transaction.
    ///
    /// Either the feed row and every article land together, or nothing is
    /// written. A unique-constraint failure on `feeds.url` surfaces as the
    /// underlying `sqlx::Error` so callers can map it to a conflict.
    pub async fn create_feed_with_articles(
        &self,
        title: &str,
        url: &str,
        category_id: Option<i64>,
        articles: &[NewArticle],
    ) -> anyhow::Result<Feed> {
        let mut tx = self.pool.begin().await?;

        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO feeds (title, url, category_id, last_fetched)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(title)
        .bind(url)
        .bind(category_id)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        let feed_id = result.last_insert_rowid();

        for article in articles {
            upsert_article(&mut tx, feed_id, article).await?;
        }

        tx.commit().await?;

        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(feed)
    }

    /// Upsert articles for an existing feed and stamp `last_fetched`.
    ///
    /// Entries are matched on `(feed_id, guid)`; existing rows get fresh
    /// title/content/link/pub_date while read and bookmarked flags survive.
    pub async fn refresh_feed_articles(
        &self,
        feed_id: i64,
        articles: &[NewArticle],
    ) -> anyhow::Result<Feed> {
        let mut tx = self.pool.begin().await?;

        for article in articles {
            upsert_article(&mut tx, feed_id, article).await?;
        }

        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE feeds SET last_fetched = ? WHERE id = ?")
            .bind(&now)
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(feed)
    }

    pub async fn rename_feed(&self, feed_id: i64, title: &str) -> anyhow::Result<Option<Feed>> {
        let result = sqlx::query("UPDATE feeds SET title = ? WHERE id = ?")
            .bind(title)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_feed(feed_id).await
    }

    /// Delete a feed; its articles go with it via the cascade.
    pub async fn delete_feed(&self, feed_id: i64) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Articles
    // ------------------------------------------------------------------

    pub async fn get_articles(
        &self,
        feed_id: Option<i64>,
        limit: i64,
    ) -> anyhow::Result<Vec<Article>> {
        let articles = match feed_id {
            Some(feed_id) => {
                sqlx::query_as::<_, Article>(
                    r#"
                    SELECT * FROM articles
                    WHERE feed_id = ?
                    ORDER BY pub_date DESC, id DESC
                    LIMIT ?
                    "#,
                )
                .bind(feed_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Article>(
                    r#"
                    SELECT * FROM articles
                    ORDER BY pub_date DESC, id DESC
                    LIMIT ?
                    "#,
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(articles)
    }

    pub async fn get_bookmarked_articles(&self, limit: i64) -> anyhow::Result<Vec<Article>> {
        let articles = sqlx::query_as::<_, Article>(
            r#"
            SELECT * FROM articles
            WHERE bookmarked = 1
            ORDER BY pub_date DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(articles)
    }

    pub async fn get_article(&self, article_id: i64) -> anyhow::Result<Option<Article>> {
        let article = sqlx::query_as::<_, Article>("SELECT * FROM articles WHERE id = ?")
            .bind(article_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(article)
    }

    pub async fn set_article_read(
        &self,
        article_id: i64,
        read: bool,
    ) -> anyhow::Result<Option<Article>> {
        let result = sqlx::query("UPDATE articles SET read = ? WHERE id = ?")
            .bind(read)
            .bind(article_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_article(article_id).await
    }

    pub async fn set_article_bookmarked(
        &self,
        article_id: i64,
        bookmarked: bool,
    ) -> anyhow::Result<Option<Article>> {
        let result = sqlx::query("UPDATE articles SET bookmarked = ? WHERE id = ?")
            .bind(bookmarked)
            .bind(article_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_article(article_id).await
    }
}

async fn upsert_article(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    feed_id: i64,
    article: &NewArticle,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO articles (feed_id, title, content, link, pub_date, guid, read, bookmarked)
        VALUES (?, ?, ?, ?, ?, ?, 0, 0)
        ON CONFLICT(feed_id, guid) DO UPDATE SET
            title = excluded.title,
            content = excluded.content,
            link = excluded.link,
            pub_date = excluded.pub_date
        "#,
    )
    .bind(feed_id)
    .bind(&article.title)
    .bind(&article.content)
    .bind(&article.link)
    .bind(article.pub_date.to_rfc3339())
    .bind(&article.guid)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
