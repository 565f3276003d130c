//! Postgres-backed `EventRepository`.
//!
//! The `events` table mirrors the city open-data export: bucket sequences
//! instead of categories, a district sequence, free-text place/organizer and a
//! handful of display columns that sometimes hold the literal text "NULL".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use eventmap_common::category::{buckets_for, category_for_bucket, known_buckets};
use eventmap_common::geocell::{self, STORED_PRECISION};
use eventmap_common::{Event, EventCategory, EventDetails, EventPage};

use crate::filter::FilterSpec;
use crate::predicate::bucket_sequences;
use crate::repository::{EventRepository, RepositoryError};

/// Shown when an event has neither a place nor an organizer.
pub const UNKNOWN_LOCATION: &str = "장소 정보 없음";

const COLUMNS: &str = "event_id, category_seq, gu_seq, event_name, place, org_name, \
    start_date, end_date, latitude, longitude, geohash, main_img, homepage_link, \
    detail_url, describe, etc_desc, is_free, ticket_price, use_target, player, theme";

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, sqlx::FromRow)]
struct EventRow {
    event_id: i64,
    category_seq: Option<i32>,
    gu_seq: Option<i32>,
    event_name: String,
    place: Option<String>,
    org_name: Option<String>,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    geohash: Option<String>,
    main_img: Option<String>,
    homepage_link: Option<String>,
    detail_url: Option<String>,
    describe: Option<String>,
    etc_desc: Option<String>,
    is_free: Option<bool>,
    ticket_price: Option<String>,
    use_target: Option<String>,
    player: Option<String>,
    theme: Option<String>,
}

/// Blank values and the literal text "NULL"/"null" mean "absent".
fn sanitize(value: Option<String>) -> Option<String> {
    value.filter(|v| {
        let v = v.trim();
        !v.is_empty() && v != "NULL" && v != "null"
    })
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        let place = sanitize(row.place);
        let org_name = sanitize(row.org_name);
        let location_name = place
            .or_else(|| org_name.clone())
            .unwrap_or_else(|| UNKNOWN_LOCATION.to_string());

        Event {
            id: row.event_id,
            title: row.event_name,
            category: category_for_bucket(row.category_seq.unwrap_or_default()),
            start_date: row.start_date,
            end_date: row.end_date,
            location_name,
            latitude: row.latitude,
            longitude: row.longitude,
            district_id: row
                .gu_seq
                .and_then(|seq| u32::try_from(seq).ok())
                .filter(|seq| *seq > 0),
            geohash: sanitize(row.geohash).map(|g| g.to_ascii_lowercase()),
            details: EventDetails {
                description: sanitize(row.describe),
                thumbnail_url: sanitize(row.main_img),
                external_link: sanitize(row.homepage_link).or_else(|| sanitize(row.detail_url)),
                is_free: row.is_free,
                ticket_price: sanitize(row.ticket_price),
                use_target: sanitize(row.use_target),
                player: sanitize(row.player),
                org_name,
                theme: sanitize(row.theme),
                etc_description: sanitize(row.etc_desc),
            },
        }
    }
}

/// Lower-cased stored cell, derived from the coordinates when missing.
fn stored_cell(event: &Event) -> Option<String> {
    sanitize(event.geohash.clone())
        .map(|cell| cell.trim().to_ascii_lowercase())
        .or_else(|| {
            event
                .coordinates()
                .and_then(|p| geocell::encode(p.lat, p.lng, STORED_PRECISION).ok())
        })
}

/// Escape LIKE wildcards so the term matches literally.
fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Append every restriction in `spec` as `AND ...` clauses with bound values.
fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, spec: &FilterSpec) {
    let seqs = bucket_sequences(spec);
    if !seqs.is_empty() {
        qb.push(" AND (category_seq = ANY(");
        qb.push_bind(seqs);
        qb.push(")");
        // Rows read back as OTHER when their bucket is missing or unlisted.
        if spec.categories().contains(&EventCategory::Other) {
            qb.push(" OR category_seq IS NULL OR NOT (category_seq = ANY(");
            qb.push_bind(known_buckets());
            qb.push("))");
        }
        qb.push(")");
    }

    if let Some(term) = spec.search_term() {
        let pattern = format!("%{}%", escape_like(term));
        qb.push(" AND (event_name ILIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR org_name ILIKE ");
        qb.push_bind(pattern);
        qb.push(")");
    }

    if let Some(district) = spec.district_id() {
        qb.push(" AND gu_seq = ");
        qb.push_bind(i64::from(district));
    }

    if let Some(start) = spec.date_start() {
        qb.push(" AND end_date >= ");
        qb.push_bind(start);
    }
    if let Some(end) = spec.date_end() {
        qb.push(" AND start_date <= ");
        qb.push_bind(end);
    }

    if !spec.cells().is_empty() {
        qb.push(" AND (");
        for (i, cell) in spec.cells().iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            // Cells are validated base-32, so the prefix needs no escaping.
            qb.push("geohash LIKE ");
            qb.push_bind(format!("{cell}%"));
            qb.push(" OR (geohash <> '' AND starts_with(");
            qb.push_bind(cell.clone());
            qb.push(", geohash))");
        }
        qb.push(")");
    }
}

// ---------------------------------------------------------------------------
// PgEventRepository
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, RepositoryError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| RepositoryError::Unavailable(e.to_string()))?;
        info!("Connected to event database");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `events` table and its indexes if they do not exist.
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                event_id      BIGINT            PRIMARY KEY,
                category_seq  INTEGER,
                gu_seq        INTEGER,
                event_name    TEXT              NOT NULL,
                place         TEXT,
                org_name      TEXT,
                start_date    TIMESTAMPTZ       NOT NULL,
                end_date      TIMESTAMPTZ       NOT NULL,
                latitude      DOUBLE PRECISION,
                longitude     DOUBLE PRECISION,
                geohash       TEXT,
                main_img      TEXT,
                homepage_link TEXT,
                detail_url    TEXT,
                describe      TEXT,
                etc_desc      TEXT,
                is_free       BOOLEAN,
                ticket_price  TEXT,
                use_target    TEXT,
                player        TEXT,
                theme         TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS events_geohash_idx ON events (geohash text_pattern_ops)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS events_start_date_idx ON events (start_date DESC, event_id DESC)",
        )
        .execute(&self.pool)
        .await?;

        info!("Event schema ready");
        Ok(())
    }

    /// Insert or replace an event. The first bucket of its category stands in
    /// for the source bucket, and a missing cell is derived from coordinates.
    pub async fn upsert(&self, event: &Event) -> Result<(), RepositoryError> {
        let geohash = stored_cell(event);
        let place = (event.location_name != UNKNOWN_LOCATION)
            .then_some(event.location_name.as_str());
        let category_seq = buckets_for(event.category).first().copied();
        let gu_seq = event.district_id.and_then(|d| i32::try_from(d).ok());
        let d = &event.details;

        sqlx::query(
            r#"
            INSERT INTO events (
                event_id, category_seq, gu_seq, event_name, place, org_name,
                start_date, end_date, latitude, longitude, geohash, main_img,
                homepage_link, describe, etc_desc, is_free, ticket_price,
                use_target, player, theme
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            ON CONFLICT (event_id) DO UPDATE SET
                category_seq = EXCLUDED.category_seq,
                gu_seq = EXCLUDED.gu_seq,
                event_name = EXCLUDED.event_name,
                place = EXCLUDED.place,
                org_name = EXCLUDED.org_name,
                start_date = EXCLUDED.start_date,
                end_date = EXCLUDED.end_date,
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                geohash = EXCLUDED.geohash,
                main_img = EXCLUDED.main_img,
                homepage_link = EXCLUDED.homepage_link,
                describe = EXCLUDED.describe,
                etc_desc = EXCLUDED.etc_desc,
                is_free = EXCLUDED.is_free,
                ticket_price = EXCLUDED.ticket_price,
                use_target = EXCLUDED.use_target,
                player = EXCLUDED.player,
                theme = EXCLUDED.theme
            "#,
        )
        .bind(event.id)
        .bind(category_seq)
        .bind(gu_seq)
        .bind(&event.title)
        .bind(place)
        .bind(&d.org_name)
        .bind(event.start_date)
        .bind(event.end_date)
        .bind(event.latitude)
        .bind(event.longitude)
        .bind(geohash)
        .bind(&d.thumbnail_url)
        .bind(&d.external_link)
        .bind(&d.description)
        .bind(&d.etc_description)
        .bind(d.is_free)
        .bind(&d.ticket_price)
        .bind(&d.use_target)
        .bind(&d.player)
        .bind(&d.theme)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn query(&self, spec: &FilterSpec) -> Result<EventPage, RepositoryError> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM events WHERE TRUE");
        push_filters(&mut count_qb, spec);

        let mut page_qb =
            QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM events WHERE TRUE"));
        push_filters(&mut page_qb, spec);
        page_qb.push(" ORDER BY start_date DESC, event_id DESC LIMIT ");
        page_qb.push_bind(i64::from(spec.limit()));
        page_qb.push(" OFFSET ");
        page_qb.push_bind(i64::try_from(spec.offset()).unwrap_or(i64::MAX));

        let (total, rows) = tokio::try_join!(
            count_qb.build_query_scalar::<i64>().fetch_one(&self.pool),
            page_qb.build_query_as::<EventRow>().fetch_all(&self.pool),
        )?;

        debug!(
            total,
            returned = rows.len(),
            page = spec.page(),
            cells = spec.cells().len(),
            "Postgres query"
        );

        Ok(EventPage {
            events: rows.into_iter().map(Event::from).collect(),
            total_count: u64::try_from(total).unwrap_or_default(),
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Event>, RepositoryError> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {COLUMNS} FROM events WHERE event_id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Event::from))
    }
}
