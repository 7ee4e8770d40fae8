//! Durable SQLite store for entities, crawl state and ratings.
//!
//! All mutating operations are atomic: single statements rely on SQLite's
//! per-statement atomicity, multi-statement mutations run inside an
//! explicit transaction. Entity creation is idempotent (`INSERT OR
//! IGNORE`), so re-ingesting a page never mutates existing rows.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};

use sqlx::{
    Connection, FromRow, Row, SqliteConnection,
    sqlite::SqliteConnectOptions,
};

use crate::error::AppError;

/// Opens the database, creating the file when missing, and runs the
/// schema migration.
pub async fn connect(url: &str) -> Result<SqliteConnection, AppError> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let mut conn = SqliteConnection::connect_with(&options).await?;
    migrate(&mut conn).await?;
    Ok(conn)
}

/// Creates all tables idempotently and carries forward legacy schemas.
pub async fn migrate(conn: &mut SqliteConnection) -> Result<(), AppError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS wrestlers (
            id TEXT PRIMARY KEY,
            name TEXT,
            team_id TEXT
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS teams (
            id INTEGER PRIMARY KEY,
            name TEXT
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            name TEXT,
            date TEXT,
            location TEXT
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS matches (
            id TEXT PRIMARY KEY,
            topWrestler_id TEXT,
            bottomWrestler_id TEXT,
            winner_id TEXT,
            weightClass TEXT,
            event_id TEXT,
            date TEXT,
            result TEXT,
            winType TEXT
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    // Early versions stored the bout timestamp under `matchDate`; rename
    // the column in place so old databases keep their history.
    let columns = sqlx::query("PRAGMA table_info(matches)")
        .fetch_all(&mut *conn)
        .await?;
    let has_legacy_date = columns
        .iter()
        .any(|row| row.get::<String, _>("name") == "matchDate");
    if has_legacy_date {
        sqlx::query("ALTER TABLE matches RENAME COLUMN matchDate TO date")
            .execute(&mut *conn)
            .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fetched (
            id TEXT PRIMARY KEY,
            date TEXT
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS crawler_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            seed_id TEXT,
            depth_limit INTEGER,
            updated_at TIMESTAMP
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS crawl_queue (
            wrestler_id TEXT PRIMARY KEY,
            depth INTEGER,
            enqueued_at TIMESTAMP
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS crawl_seen (
            wrestler_id TEXT PRIMARY KEY,
            depth INTEGER,
            processed_at TIMESTAMP
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ratings (
            wrestler_id TEXT NOT NULL,
            weight_class TEXT NOT NULL,
            rating REAL,
            rd REAL,
            volatility REAL,
            last_updated TEXT,
            PRIMARY KEY (wrestler_id, weight_class)
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Creates a team if it does not exist.
pub async fn create_team(
    conn: &mut SqliteConnection,
    id: i64,
    name: Option<&str>,
) -> Result<(), AppError> {
    sqlx::query("INSERT OR IGNORE INTO teams (id, name) VALUES ($1, $2)")
        .bind(id)
        .bind(name)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Creates an event if it does not exist.
pub async fn create_event(
    conn: &mut SqliteConnection,
    id: &str,
    name: Option<&str>,
    date: Option<&str>,
    location: Option<&str>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO events (id, name, date, location)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(date)
    .bind(location)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Creates a wrestler if it does not exist.
pub async fn create_wrestler(
    conn: &mut SqliteConnection,
    id: &str,
    name: &str,
    team_id: Option<i64>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO wrestlers (id, name, team_id)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(team_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// A match row pending insertion.
#[derive(Clone, Debug)]
pub struct NewMatch {
    pub id: String,
    pub top_id: String,
    pub bottom_id: String,
    pub winner_id: String,
    pub weight_class: String,
    pub event_id: Option<String>,
    pub date: Option<String>,
    pub result: Option<String>,
    pub win_type: Option<String>,
}

/// Creates a match if it does not exist. Existing rows are never
/// overwritten.
pub async fn create_match(
    conn: &mut SqliteConnection,
    row: &NewMatch,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO matches
            (id, topWrestler_id, bottomWrestler_id, winner_id, weightClass,
             event_id, date, result, winType)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(&row.id)
    .bind(&row.top_id)
    .bind(&row.bottom_id)
    .bind(&row.winner_id)
    .bind(&row.weight_class)
    .bind(&row.event_id)
    .bind(&row.date)
    .bind(&row.result)
    .bind(&row.win_type)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Stamps the wrestler's last-fetch calendar day. Informational only; the
/// crawler never consults it.
pub async fn mark_fetch(conn: &mut SqliteConnection, id: &str) -> Result<(), AppError> {
    let today = Utc::now().format("%Y-%m-%d").to_string();
    sqlx::query(
        r#"
        INSERT INTO fetched (id, date)
        VALUES ($1, $2)
        ON CONFLICT (id) DO UPDATE SET date = excluded.date
        "#,
    )
    .bind(id)
    .bind(today)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// The singleton crawler configuration row.
#[derive(Clone, Debug, FromRow)]
pub struct CrawlerState {
    pub seed_id: String,
    pub depth_limit: i64,
    pub updated_at: DateTime<Utc>,
}

pub async fn load_crawler_state(
    conn: &mut SqliteConnection,
) -> Result<Option<CrawlerState>, AppError> {
    sqlx::query_as::<_, CrawlerState>(
        "SELECT seed_id, depth_limit, updated_at FROM crawler_state WHERE id = 1",
    )
    .fetch_optional(&mut *conn)
    .await
    .map_err(AppError::from)
}

pub async fn save_crawler_state(
    conn: &mut SqliteConnection,
    seed_id: &str,
    depth_limit: i64,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO crawler_state (id, seed_id, depth_limit, updated_at)
        VALUES (1, $1, $2, $3)
        ON CONFLICT (id) DO UPDATE SET
            seed_id = excluded.seed_id,
            depth_limit = excluded.depth_limit,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(seed_id)
    .bind(depth_limit)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Truncates crawler state, frontier and seen in one transaction.
pub async fn clear_crawler_state(conn: &mut SqliteConnection) -> Result<(), AppError> {
    let mut tx = conn.begin().await?;
    sqlx::query("DELETE FROM crawler_state")
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM crawl_queue").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM crawl_seen").execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(())
}

pub async fn clear_frontier(conn: &mut SqliteConnection) -> Result<(), AppError> {
    sqlx::query("DELETE FROM crawl_queue")
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// A wrestler enqueued for fetching.
#[derive(Clone, Debug, FromRow)]
pub struct FrontierEntry {
    pub wrestler_id: String,
    pub depth: i64,
}

/// Sets the frontier depth for a wrestler and refreshes its enqueue time.
pub async fn upsert_frontier(
    conn: &mut SqliteConnection,
    id: &str,
    depth: i64,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO crawl_queue (wrestler_id, depth, enqueued_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (wrestler_id) DO UPDATE SET
            depth = excluded.depth,
            enqueued_at = excluded.enqueued_at
        "#,
    )
    .bind(id)
    .bind(depth)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn remove_frontier(conn: &mut SqliteConnection, id: &str) -> Result<(), AppError> {
    sqlx::query("DELETE FROM crawl_queue WHERE wrestler_id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Returns the frontier ordered by enqueue time.
///
/// Rows with an empty or null wrestler key can survive the migration from
/// earlier schema versions; they are pruned here before the read.
pub async fn queue_items(
    conn: &mut SqliteConnection,
) -> Result<Vec<FrontierEntry>, AppError> {
    sqlx::query("DELETE FROM crawl_queue WHERE wrestler_id IS NULL OR wrestler_id = ''")
        .execute(&mut *conn)
        .await?;
    sqlx::query_as::<_, FrontierEntry>(
        "SELECT wrestler_id, depth FROM crawl_queue ORDER BY enqueued_at ASC",
    )
    .fetch_all(&mut *conn)
    .await
    .map_err(AppError::from)
}

/// A discovered wrestler with its minimum observed depth.
#[derive(Clone, Debug, FromRow)]
pub struct SeenEntry {
    pub wrestler_id: String,
    pub depth: i64,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Records a discovery, keeping the minimum depth over repeat sightings.
pub async fn record_seen(
    conn: &mut SqliteConnection,
    id: &str,
    depth: i64,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO crawl_seen (wrestler_id, depth)
        VALUES ($1, $2)
        ON CONFLICT (wrestler_id) DO UPDATE SET
            depth = MIN(crawl_seen.depth, excluded.depth)
        "#,
    )
    .bind(id)
    .bind(depth)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Drops every seen entry. Used when the seed changes, because recorded
/// depths are relative to the seed.
pub async fn clear_seen(conn: &mut SqliteConnection) -> Result<(), AppError> {
    sqlx::query("DELETE FROM crawl_seen")
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Stamps a seen entry as processed at the current wall clock.
pub async fn mark_processed(conn: &mut SqliteConnection, id: &str) -> Result<(), AppError> {
    sqlx::query("UPDATE crawl_seen SET processed_at = $2 WHERE wrestler_id = $1")
        .bind(id)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn seen_entries(
    conn: &mut SqliteConnection,
) -> Result<Vec<SeenEntry>, AppError> {
    sqlx::query_as::<_, SeenEntry>(
        "SELECT wrestler_id, depth, processed_at FROM crawl_seen",
    )
    .fetch_all(&mut *conn)
    .await
    .map_err(AppError::from)
}

/// Seen entries that were never processed, up to a depth bound.
pub async fn unprocessed(
    conn: &mut SqliteConnection,
    max_depth: i64,
) -> Result<Vec<SeenEntry>, AppError> {
    sqlx::query_as::<_, SeenEntry>(
        r#"
        SELECT wrestler_id, depth, processed_at
        FROM crawl_seen
        WHERE processed_at IS NULL AND depth <= $1
        ORDER BY depth ASC, wrestler_id ASC
        "#,
    )
    .bind(max_depth)
    .fetch_all(&mut *conn)
    .await
    .map_err(AppError::from)
}

/// A persisted rating row pending insertion.
#[derive(Clone, Debug)]
pub struct NewRating {
    pub wrestler_id: String,
    pub weight_class: String,
    pub rating: f64,
    pub rd: f64,
    pub volatility: f64,
    pub last_updated: String,
}

/// Replaces the ratings table wholesale in one transaction.
pub async fn replace_ratings(
    conn: &mut SqliteConnection,
    rows: &[NewRating],
) -> Result<(), AppError> {
    let mut tx = conn.begin().await?;
    sqlx::query("DELETE FROM ratings").execute(&mut *tx).await?;
    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO ratings
                (wrestler_id, weight_class, rating, rd, volatility, last_updated)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&row.wrestler_id)
        .bind(&row.weight_class)
        .bind(row.rating)
        .bind(row.rd)
        .bind(row.volatility)
        .bind(&row.last_updated)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn fetch_wrestler_names(
    conn: &mut SqliteConnection,
) -> Result<HashMap<String, String>, AppError> {
    let rows = sqlx::query_as::<_, (String, Option<String>)>(
        "SELECT id, name FROM wrestlers",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(id, name)| (id, name.unwrap_or_default()))
        .collect())
}

/// A raw match row as stored, before structural validation.
#[derive(Clone, Debug, FromRow)]
pub struct StoredMatch {
    pub id: String,
    pub date: Option<String>,
    #[sqlx(rename = "weightClass")]
    pub weight_class: Option<String>,
    pub winner_id: Option<String>,
    #[sqlx(rename = "topWrestler_id")]
    pub top_id: Option<String>,
    #[sqlx(rename = "bottomWrestler_id")]
    pub bottom_id: Option<String>,
}

/// Loads structurally complete matches ordered by date ascending,
/// optionally bounded by inclusive timestamps.
pub async fn fetch_matches(
    conn: &mut SqliteConnection,
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
) -> Result<Vec<StoredMatch>, AppError> {
    let mut sql = String::from(
        r#"
        SELECT id, date, weightClass, winner_id, topWrestler_id, bottomWrestler_id
        FROM matches
        WHERE winner_id IS NOT NULL
          AND topWrestler_id IS NOT NULL
          AND bottomWrestler_id IS NOT NULL
          AND weightClass IS NOT NULL
          AND date IS NOT NULL
        "#,
    );
    let mut params = Vec::new();
    if let Some(start) = start {
        sql.push_str(" AND date >= $1");
        params.push(format_timestamp(start));
    }
    if let Some(end) = end {
        sql.push_str(if params.is_empty() {
            " AND date <= $1"
        } else {
            " AND date <= $2"
        });
        params.push(format_timestamp(end));
    }
    sql.push_str(" ORDER BY date ASC");

    let mut query = sqlx::query_as::<_, StoredMatch>(&sql);
    for param in &params {
        query = query.bind(param);
    }
    query.fetch_all(&mut *conn).await.map_err(AppError::from)
}

/// A persisted rating joined with the wrestler's display name.
#[derive(Clone, Debug, FromRow)]
pub struct RatingRow {
    pub wrestler_id: String,
    pub weight_class: Option<String>,
    pub rating: Option<f64>,
    pub rd: Option<f64>,
    pub volatility: Option<f64>,
    pub last_updated: Option<String>,
    pub name: Option<String>,
}

pub async fn fetch_rating_rows(
    conn: &mut SqliteConnection,
) -> Result<Vec<RatingRow>, AppError> {
    sqlx::query_as::<_, RatingRow>(
        r#"
        SELECT
            r.wrestler_id,
            r.weight_class,
            r.rating,
            r.rd,
            r.volatility,
            r.last_updated,
            w.name
        FROM ratings r
        LEFT JOIN wrestlers w ON w.id = r.wrestler_id
        ORDER BY r.weight_class ASC
        "#,
    )
    .fetch_all(&mut *conn)
    .await
    .map_err(AppError::from)
}

/// Filter over match rows shared by the two graph aggregations.
#[derive(Clone, Debug, Default)]
pub struct MatchFilter {
    /// `None` selects every weight class.
    pub weight_classes: Option<Vec<String>>,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

fn match_filter_sql(filter: &MatchFilter) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    let mut next = 1;

    if let Some(weights) = filter.weight_classes.as_ref().filter(|w| !w.is_empty()) {
        let placeholders = (0..weights.len())
            .map(|offset| format!("${}", next + offset))
            .collect::<Vec<_>>()
            .join(",");
        clauses.push(format!("m.weightClass IN ({placeholders})"));
        next += weights.len();
        params.extend(weights.iter().cloned());
    }
    if let Some(start) = filter.start {
        clauses.push(format!("m.date >= ${next}"));
        next += 1;
        params.push(format_timestamp(start));
    }
    if let Some(end) = filter.end {
        clauses.push(format!("m.date <= ${next}"));
        params.push(format_timestamp(end));
    }
    if clauses.is_empty() {
        clauses.push("1=1".into());
    }

    (clauses.join(" AND "), params)
}

/// Per-wrestler win/loss totals over the filtered matches.
#[derive(Clone, Debug, FromRow)]
pub struct WrestlerStats {
    pub id: String,
    pub name: Option<String>,
    pub wins: i64,
    pub losses: i64,
}

pub async fn fetch_wrestler_stats(
    conn: &mut SqliteConnection,
    filter: &MatchFilter,
) -> Result<Vec<WrestlerStats>, AppError> {
    let (clause, params) = match_filter_sql(filter);
    let sql = format!(
        r#"
        SELECT
            w.id,
            w.name,
            COALESCE(SUM(CASE WHEN m.winner_id = w.id THEN 1 ELSE 0 END), 0) AS wins,
            COALESCE(SUM(CASE WHEN m.winner_id != w.id THEN 1 ELSE 0 END), 0) AS losses
        FROM wrestlers w
        JOIN matches m ON (m.topWrestler_id = w.id OR m.bottomWrestler_id = w.id)
        WHERE {clause}
        GROUP BY w.id, w.name
        "#,
    );
    let mut query = sqlx::query_as::<_, WrestlerStats>(&sql);
    for param in &params {
        query = query.bind(param);
    }
    query.fetch_all(&mut *conn).await.map_err(AppError::from)
}

/// A directed winner-to-loser edge with its match count.
#[derive(Clone, Debug, FromRow)]
pub struct MatchEdge {
    pub source: Option<String>,
    pub target: Option<String>,
    pub count: i64,
}

pub async fn fetch_match_edges(
    conn: &mut SqliteConnection,
    filter: &MatchFilter,
) -> Result<Vec<MatchEdge>, AppError> {
    let (clause, params) = match_filter_sql(filter);
    let sql = format!(
        r#"
        SELECT
            winner_id AS source,
            CASE
                WHEN winner_id = topWrestler_id THEN bottomWrestler_id
                ELSE topWrestler_id
            END AS target,
            COUNT(*) AS count
        FROM matches m
        WHERE {clause}
        GROUP BY source, target
        "#,
    );
    let mut query = sqlx::query_as::<_, MatchEdge>(&sql);
    for param in &params {
        query = query.bind(param);
    }
    query.fetch_all(&mut *conn).await.map_err(AppError::from)
}

/// Formats a timestamp the way match dates are stored, so SQL string
/// comparison matches chronological order.
pub fn format_timestamp(value: NaiveDateTime) -> String {
    value.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Parses a stored or upstream timestamp.
///
/// Accepts full ISO-8601 with an offset (`z` normalized, converted to
/// UTC), a bare datetime, or a bare date. Anything else is `None`; callers
/// drop such rows instead of guessing.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let sanitized = raw.trim();
    if sanitized.is_empty() {
        return None;
    }
    let normalized = sanitized.replace('z', "Z");

    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt);
    }
    chrono::NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
        .map(|date| date.and_time(chrono::NaiveTime::MIN))
        .ok()
}
