//! SQLite database with Diesel ORM
//!
//! Stores payloads and transformation lineage edges.
//! Schema creation is idempotent and runs on every open.

use crate::schema::*;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::result::DatabaseErrorKind;
use diesel::sqlite::SqliteConnection;
use std::path::Path;

pub const DEFAULT_DB_PATH: &str = ":memory:";

/// Seconds since the Unix epoch, as the store records time.
pub fn epoch_seconds() -> f64 {
    chrono::Utc::now().timestamp() as f64
}

// ============================================================================
// Payload Kinds
// ============================================================================

/// The four kinds of payload the store accepts.
///
/// The kind determines how the payload text is interpreted and whether it is
/// pretty-printed on display. `Transformer` definitions are not guaranteed to
/// be JSON and are always shown verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Schema,
    Transformer,
    Raw,
    Derived,
}

impl PayloadKind {
    pub const ALL: [PayloadKind; 4] = [
        PayloadKind::Schema,
        PayloadKind::Transformer,
        PayloadKind::Raw,
        PayloadKind::Derived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Schema => "schema",
            PayloadKind::Transformer => "transformer",
            PayloadKind::Raw => "raw",
            PayloadKind::Derived => "derived",
        }
    }

    /// Whether listings should re-indent this kind as JSON.
    pub fn pretty_prints(&self) -> bool {
        !matches!(self, PayloadKind::Transformer)
    }
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PayloadKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "schema" => Ok(PayloadKind::Schema),
            "transformer" => Ok(PayloadKind::Transformer),
            "raw" => Ok(PayloadKind::Raw),
            "derived" => Ok(PayloadKind::Derived),
            other => Err(format!(
                "unknown payload type '{}' (expected schema, transformer, raw, or derived)",
                other
            )),
        }
    }
}

// ============================================================================
// Diesel Models
// ============================================================================

/// A payload not yet inserted. `time` is producer-asserted and may be
/// back-dated; `time_added` is stamped by the store at construction.
#[derive(Debug, Clone)]
pub struct PayloadDraft {
    pub time: f64,
    pub time_added: f64,
    pub disabled: bool,
    pub device: String,
    pub topic: String,
    pub kind: PayloadKind,
    pub payload: String,
}

impl PayloadDraft {
    pub fn new(kind: PayloadKind, device: &str, topic: &str, payload: String) -> Self {
        let now = epoch_seconds();
        Self {
            time: now,
            time_added: now,
            disabled: false,
            device: device.to_string(),
            topic: topic.to_string(),
            kind,
            payload,
        }
    }
}

/// Insertable payload row
#[derive(Insertable)]
#[diesel(table_name = payloads)]
struct NewPayload<'a> {
    pub time: f64,
    pub time_added: f64,
    pub disabled: bool,
    pub device: &'a str,
    pub topic: &'a str,
    pub payload_type: &'a str,
    pub payload: &'a str,
}

impl<'a> From<&'a PayloadDraft> for NewPayload<'a> {
    fn from(draft: &'a PayloadDraft) -> Self {
        Self {
            time: draft.time,
            time_added: draft.time_added,
            disabled: draft.disabled,
            device: &draft.device,
            topic: &draft.topic,
            payload_type: draft.kind.as_str(),
            payload: &draft.payload,
        }
    }
}

/// Queryable payload row (database record)
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = payloads)]
pub struct Payload {
    pub id: i64,
    pub time: f64,
    pub time_added: f64,
    pub disabled: bool,
    pub device: String,
    pub topic: String,
    pub payload_type: String,
    pub payload: String,
}

impl Payload {
    pub fn kind(&self) -> Option<PayloadKind> {
        self.payload_type.parse().ok()
    }

    /// Display form of the payload text: JSON kinds are re-indented with
    /// 2-space indentation, transformers (and anything that fails to parse)
    /// are shown verbatim.
    pub fn rendered(&self) -> String {
        let pretty = self.kind().map(|k| k.pretty_prints()).unwrap_or(false);
        if !pretty {
            return self.payload.clone();
        }
        serde_json::from_str::<serde_json::Value>(&self.payload)
            .and_then(|v| serde_json::to_string_pretty(&v))
            .unwrap_or_else(|_| self.payload.clone())
    }
}

/// Insertable transformation edge
#[derive(Insertable)]
#[diesel(table_name = transformations)]
struct NewTransformation {
    pub input_id: i64,
    pub input_schema_id: i64,
    pub transformer_id: i64,
    pub output_schema_id: i64,
    pub output_id: i64,
    pub time_executed: f64,
}

/// Queryable transformation edge: one row per successfully applied
/// transform, keyed uniquely on (input_id, transformer_id).
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = transformations)]
pub struct Transformation {
    pub id: i64,
    pub input_id: i64,
    pub input_schema_id: i64,
    pub transformer_id: i64,
    pub output_schema_id: i64,
    pub output_id: i64,
    pub time_executed: f64,
}

/// Ids produced by an atomic derived-payload + edge write.
#[derive(Debug, Clone, Copy)]
pub struct DerivedRecord {
    pub output_id: i64,
    pub edge_id: i64,
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Database connection wrapper with connection pool
pub struct Database {
    pool: DbPool,
}

/// Error type for database operations
#[derive(Debug)]
pub enum DbError {
    Connection(String),
    Query(diesel::result::Error),
    Pool(diesel::r2d2::Error),
    /// Unique-constraint rejection, e.g. a duplicate lineage edge.
    Constraint(String),
    NotFound(i64),
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbError::Connection(msg) => write!(f, "Connection error: {}", msg),
            DbError::Query(e) => write!(f, "Query error: {}", e),
            DbError::Pool(e) => write!(f, "Pool error: {}", e),
            DbError::Constraint(msg) => write!(f, "Constraint violation: {}", msg),
            DbError::NotFound(id) => write!(f, "No payload with id {}", id),
        }
    }
}

impl std::error::Error for DbError {}

impl From<diesel::result::Error> for DbError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                DbError::Constraint(info.message().to_string())
            }
            other => DbError::Query(other),
        }
    }
}

impl From<diesel::r2d2::Error> for DbError {
    fn from(e: diesel::r2d2::Error) -> Self {
        DbError::Pool(e)
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

fn last_insert_rowid(conn: &mut SqliteConnection) -> QueryResult<i64> {
    diesel::select(diesel::dsl::sql::<diesel::sql_types::BigInt>(
        "last_insert_rowid()",
    ))
    .first(conn)
}

impl Database {
    /// Open database at the default (in-memory) path
    pub fn open() -> Result<Self> {
        Self::open_at(DEFAULT_DB_PATH)
    }

    /// Open database at specified path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        // An in-memory database exists per connection, so the pool must not
        // hand out more than one.
        let max_size = if path_str == DEFAULT_DB_PATH { 1 } else { 5 };
        let manager = ConnectionManager::<SqliteConnection>::new(&path_str);
        let pool = Pool::builder()
            .max_size(max_size)
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    fn get_conn(&self) -> Result<DbConn> {
        self.pool
            .get()
            .map_err(|e| DbError::Connection(e.to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;

        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS payloads (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                time REAL NOT NULL,
                time_added REAL NOT NULL,
                disabled INTEGER NOT NULL DEFAULT 0,
                device TEXT NOT NULL,
                topic TEXT NOT NULL,
                payload_type TEXT NOT NULL
                    CHECK (payload_type IN ('schema', 'transformer', 'raw', 'derived')),
                payload TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut conn)?;

        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS transformations (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                input_id INTEGER NOT NULL,
                input_schema_id INTEGER NOT NULL,
                transformer_id INTEGER NOT NULL,
                output_schema_id INTEGER NOT NULL,
                output_id INTEGER NOT NULL,
                time_executed REAL NOT NULL,
                UNIQUE(input_id, transformer_id)
            )
        "#,
        )
        .execute(&mut conn)?;

        // Create indexes
        diesel::sql_query(
            "CREATE INDEX IF NOT EXISTS idx_payloads_type ON payloads(payload_type)",
        )
        .execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_payloads_topic ON payloads(topic)")
            .execute(&mut conn)?;
        diesel::sql_query(
            "CREATE INDEX IF NOT EXISTS idx_transformations_input ON transformations(input_id)",
        )
        .execute(&mut conn)?;
        diesel::sql_query(
            "CREATE INDEX IF NOT EXISTS idx_transformations_output ON transformations(output_id)",
        )
        .execute(&mut conn)?;

        Ok(())
    }

    // ========================================================================
    // Payload Store
    // ========================================================================

    /// Append a payload. Durable once this returns. Content is stored as
    /// given; validation and canonicalization are the caller's job.
    pub fn insert_payload(&self, draft: &PayloadDraft) -> Result<i64> {
        let mut conn = self.get_conn()?;
        let new_payload = NewPayload::from(draft);

        diesel::insert_into(payloads::table)
            .values(&new_payload)
            .execute(&mut conn)?;

        let id = last_insert_rowid(&mut conn)?;
        Ok(id)
    }

    /// Fetch one payload by id
    pub fn get_payload(&self, id: i64) -> Result<Option<Payload>> {
        let mut conn = self.get_conn()?;

        let payload = payloads::table
            .find(id)
            .first::<Payload>(&mut conn)
            .optional()?;

        Ok(payload)
    }

    /// All payloads of one kind, in insertion order
    pub fn list_payloads(&self, kind: PayloadKind) -> Result<Vec<Payload>> {
        let mut conn = self.get_conn()?;

        let results = payloads::table
            .filter(payloads::payload_type.eq(kind.as_str()))
            .order(payloads::id.asc())
            .load::<Payload>(&mut conn)?;

        Ok(results)
    }

    /// Per-kind counts plus the grand total
    pub fn summary(&self) -> Result<StoreSummary> {
        let mut conn = self.get_conn()?;

        let total: i64 = payloads::table.count().get_result(&mut conn)?;

        let mut counts = [0i64; 4];
        for (slot, kind) in counts.iter_mut().zip(PayloadKind::ALL) {
            *slot = payloads::table
                .filter(payloads::payload_type.eq(kind.as_str()))
                .count()
                .get_result(&mut conn)?;
        }
        let [schema, transformer, raw, derived] = counts;

        Ok(StoreSummary {
            total,
            schema,
            transformer,
            raw,
            derived,
        })
    }

    /// Toggle the soft-delete marker. The only permitted mutation of a
    /// stored payload.
    pub fn set_disabled(&self, id: i64, disabled: bool) -> Result<()> {
        let mut conn = self.get_conn()?;

        let updated = diesel::update(payloads::table.find(id))
            .set(payloads::disabled.eq(disabled))
            .execute(&mut conn)?;

        if updated == 0 {
            return Err(DbError::NotFound(id));
        }
        Ok(())
    }

    // ========================================================================
    // Lineage Ledger
    // ========================================================================

    /// The idempotency gate: has this (input, transformer) pair already been
    /// applied?
    pub fn transformation_exists(&self, input_id: i64, transformer_id: i64) -> Result<bool> {
        let mut conn = self.get_conn()?;

        let count: i64 = transformations::table
            .filter(transformations::input_id.eq(input_id))
            .filter(transformations::transformer_id.eq(transformer_id))
            .count()
            .get_result(&mut conn)?;

        Ok(count > 0)
    }

    /// Append a lineage edge. A duplicate (input_id, transformer_id) pair is
    /// rejected with `DbError::Constraint` by the unique index.
    pub fn insert_transformation(
        &self,
        input_id: i64,
        input_schema_id: i64,
        transformer_id: i64,
        output_schema_id: i64,
        output_id: i64,
        time_executed: f64,
    ) -> Result<i64> {
        let mut conn = self.get_conn()?;

        let new_edge = NewTransformation {
            input_id,
            input_schema_id,
            transformer_id,
            output_schema_id,
            output_id,
            time_executed,
        };

        diesel::insert_into(transformations::table)
            .values(&new_edge)
            .execute(&mut conn)?;

        let id = last_insert_rowid(&mut conn)?;
        Ok(id)
    }

    /// Insert a derived payload and its lineage edge in one transaction, so
    /// either both persist or neither does. The new payload id is taken from
    /// `last_insert_rowid()` on the same connection, never re-queried by
    /// content.
    pub fn record_derived(
        &self,
        draft: &PayloadDraft,
        input_id: i64,
        input_schema_id: i64,
        transformer_id: i64,
        output_schema_id: i64,
        time_executed: f64,
    ) -> Result<DerivedRecord> {
        let mut conn = self.get_conn()?;
        let new_payload = NewPayload::from(draft);

        let record = conn.transaction::<DerivedRecord, diesel::result::Error, _>(|conn| {
            diesel::insert_into(payloads::table)
                .values(&new_payload)
                .execute(conn)?;
            let output_id = last_insert_rowid(conn)?;

            let new_edge = NewTransformation {
                input_id,
                input_schema_id,
                transformer_id,
                output_schema_id,
                output_id,
                time_executed,
            };
            diesel::insert_into(transformations::table)
                .values(&new_edge)
                .execute(conn)?;
            let edge_id = last_insert_rowid(conn)?;

            Ok(DerivedRecord { output_id, edge_id })
        })?;

        Ok(record)
    }

    /// All lineage edges, in insertion order
    pub fn list_transformations(&self) -> Result<Vec<Transformation>> {
        let mut conn = self.get_conn()?;

        let edges = transformations::table
            .order(transformations::id.asc())
            .load::<Transformation>(&mut conn)?;

        Ok(edges)
    }
}

// ============================================================================
// Additional Types
// ============================================================================

/// Per-kind payload counts
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreSummary {
    pub total: i64,
    pub schema: i64,
    pub transformer: i64,
    pub raw: i64,
    pub derived: i64,
}
