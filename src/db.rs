use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::entities::{
    Device, GeoPoint, RiskLevel, Transaction, TransactionRequest, TransactionStatus, User,
};

// ============================================================================
// TIMESTAMPS
// Stored as fixed-width RFC 3339 UTC strings so lexical order == time order
// ============================================================================

pub fn ts(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

fn parse_enum<T: std::str::FromStr>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (in-memory databases silently stay in "memory")
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            name TEXT NOT NULL,
            phone TEXT,
            is_email_verified INTEGER NOT NULL DEFAULT 0,
            locked_until TEXT,
            theme TEXT NOT NULL DEFAULT 'light',
            notifications_enabled INTEGER NOT NULL DEFAULT 1,
            email_alerts INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            last_login TEXT
        );

        -- Bearer/refresh tokens: only the SHA-256 digest is stored
        CREATE TABLE IF NOT EXISTS auth_tokens (
            token_hash TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            revoked INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS verification_tokens (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            token_hash TEXT UNIQUE NOT NULL,
            token_type TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            used_at TEXT,
            created_at TEXT NOT NULL
        );

        -- Scored transactions; user_id may reference a monitored user, not an account
        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            amount REAL NOT NULL,
            merchant TEXT NOT NULL,
            category TEXT NOT NULL,
            fraud_score REAL NOT NULL,
            risk_score INTEGER NOT NULL,
            risk_level TEXT NOT NULL,
            status TEXT NOT NULL,
            reason TEXT NOT NULL,
            device_type TEXT NOT NULL,
            device_ip TEXT NOT NULL,
            device_id TEXT,
            geo_lat REAL,
            geo_lon REAL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            metadata TEXT
        );

        CREATE TABLE IF NOT EXISTS devices (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            device_key TEXT NOT NULL,
            device_type TEXT NOT NULL,
            is_trusted INTEGER NOT NULL DEFAULT 0,
            trust_score REAL NOT NULL DEFAULT 0.5,
            created_at TEXT NOT NULL,
            last_used TEXT NOT NULL,
            UNIQUE(user_id, device_key)
        );

        -- Scoring decisions and user feedback, kept for retraining
        CREATE TABLE IF NOT EXISTS learning_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tx_id TEXT NOT NULL,
            fraud_probability REAL NOT NULL,
            decision TEXT NOT NULL,
            user_confirmed INTEGER,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS monitored_users (
            user_id TEXT PRIMARY KEY,
            phone_number TEXT,
            email TEXT,
            name TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS demo_requests (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL,
            role TEXT NOT NULL,
            name TEXT,
            company TEXT,
            requirement TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS outbox (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            recipient TEXT NOT NULL,
            subject TEXT NOT NULL,
            html_body TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS oauth_states (
            state TEXT PRIMARY KEY,
            expires_at TEXT NOT NULL
        );

        -- Audit trail: every change is an event
        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_auth_tokens_user ON auth_tokens(user_id);
        CREATE INDEX IF NOT EXISTS idx_tx_user ON transactions(user_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_tx_created ON transactions(created_at);
        CREATE INDEX IF NOT EXISTS idx_tx_status ON transactions(status);
        CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);
        CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);",
    )
    .context("Failed to create schema")?;

    Ok(())
}

// ============================================================================
// USERS
// ============================================================================

const USER_COLUMNS: &str = "id, email, password_hash, name, phone, is_email_verified, locked_until,
     theme, notifications_enabled, email_alerts, created_at, updated_at, last_login";

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        name: row.get(3)?,
        phone: row.get(4)?,
        is_email_verified: row.get(5)?,
        locked_until: parse_opt_ts(6, row.get(6)?)?,
        theme: row.get(7)?,
        notifications_enabled: row.get(8)?,
        email_alerts: row.get(9)?,
        created_at: parse_ts(10, &created_at)?,
        updated_at: parse_ts(11, &updated_at)?,
        last_login: parse_opt_ts(12, row.get(12)?)?,
    })
}

pub fn insert_user(conn: &Connection, user: &User) -> Result<()> {
    conn.execute(
        "INSERT INTO users (
            id, email, password_hash, name, phone, is_email_verified, locked_until,
            theme, notifications_enabled, email_alerts, created_at, updated_at, last_login
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            user.id,
            user.email,
            user.password_hash,
            user.name,
            user.phone,
            user.is_email_verified,
            user.locked_until.map(ts),
            user.theme,
            user.notifications_enabled,
            user.email_alerts,
            ts(user.created_at),
            ts(user.updated_at),
            user.last_login.map(ts),
        ],
    )
    .with_context(|| format!("Failed to insert user {}", user.email))?;
    Ok(())
}

pub fn update_user(conn: &Connection, user: &User) -> Result<()> {
    conn.execute(
        "UPDATE users SET
            email = ?2, password_hash = ?3, name = ?4, phone = ?5, is_email_verified = ?6,
            locked_until = ?7, theme = ?8, notifications_enabled = ?9, email_alerts = ?10,
            updated_at = ?11, last_login = ?12
         WHERE id = ?1",
        params![
            user.id,
            user.email,
            user.password_hash,
            user.name,
            user.phone,
            user.is_email_verified,
            user.locked_until.map(ts),
            user.theme,
            user.notifications_enabled,
            user.email_alerts,
            ts(user.updated_at),
            user.last_login.map(ts),
        ],
    )?;
    Ok(())
}

fn find_user_where(conn: &Connection, clause: &str, value: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE {} LIMIT 1", USER_COLUMNS, clause);
    let user = conn
        .query_row(&sql, params![value], user_from_row)
        .optional()?;
    Ok(user)
}

pub fn find_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    find_user_where(conn, "id = ?1", id)
}

pub fn find_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    find_user_where(conn, "email = ?1", &email.trim().to_lowercase())
}

pub fn find_user_by_phone(conn: &Connection, phone: &str) -> Result<Option<User>> {
    find_user_where(conn, "phone = ?1", phone.trim())
}

// ============================================================================
// AUTH TOKENS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthTokenRow {
    pub user_id: String,
    pub kind: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

pub fn insert_auth_token(
    conn: &Connection,
    token_hash: &str,
    user_id: &str,
    kind: TokenKind,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO auth_tokens (token_hash, user_id, kind, expires_at, revoked, created_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5)",
        params![token_hash, user_id, kind.as_str(), ts(expires_at), ts(Utc::now())],
    )?;
    Ok(())
}

pub fn find_auth_token(conn: &Connection, token_hash: &str) -> Result<Option<AuthTokenRow>> {
    let row = conn
        .query_row(
            "SELECT user_id, kind, expires_at, revoked FROM auth_tokens WHERE token_hash = ?1",
            params![token_hash],
            |row| {
                let expires_at: String = row.get(2)?;
                Ok(AuthTokenRow {
                    user_id: row.get(0)?,
                    kind: row.get(1)?,
                    expires_at: parse_ts(2, &expires_at)?,
                    revoked: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn revoke_auth_token(conn: &Connection, token_hash: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE auth_tokens SET revoked = 1 WHERE token_hash = ?1",
        params![token_hash],
    )?;
    Ok(changed > 0)
}

pub fn revoke_user_tokens(conn: &Connection, user_id: &str) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE auth_tokens SET revoked = 1 WHERE user_id = ?1 AND revoked = 0",
        params![user_id],
    )?;
    Ok(changed)
}

/// Drop tokens that expired before `now`
pub fn purge_expired_tokens(conn: &Connection, now: DateTime<Utc>) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM auth_tokens WHERE expires_at < ?1",
        params![ts(now)],
    )?;
    Ok(removed)
}

// ============================================================================
// VERIFICATION TOKENS (email verification, password reset)
// ============================================================================

#[derive(Debug, Clone)]
pub struct VerificationTokenRow {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl VerificationTokenRow {
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && self.expires_at > now
    }
}

pub fn insert_verification_token(conn: &Connection, token: &VerificationTokenRow) -> Result<()> {
    conn.execute(
        "INSERT INTO verification_tokens (id, user_id, token_hash, token_type, expires_at, used_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            token.id,
            token.user_id,
            token.token_hash,
            token.token_type,
            ts(token.expires_at),
            token.used_at.map(ts),
            ts(Utc::now()),
        ],
    )?;
    Ok(())
}

pub fn find_verification_token(
    conn: &Connection,
    token_hash: &str,
    token_type: &str,
) -> Result<Option<VerificationTokenRow>> {
    let row = conn
        .query_row(
            "SELECT id, user_id, token_hash, token_type, expires_at, used_at
             FROM verification_tokens WHERE token_hash = ?1 AND token_type = ?2",
            params![token_hash, token_type],
            |row| {
                let expires_at: String = row.get(4)?;
                Ok(VerificationTokenRow {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    token_hash: row.get(2)?,
                    token_type: row.get(3)?,
                    expires_at: parse_ts(4, &expires_at)?,
                    used_at: parse_opt_ts(5, row.get(5)?)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn mark_verification_token_used(conn: &Connection, id: &str, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE verification_tokens SET used_at = ?2 WHERE id = ?1",
        params![id, ts(at)],
    )?;
    Ok(())
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

const TX_COLUMNS: &str = "id, user_id, amount, merchant, category, fraud_score, risk_score, risk_level,
     status, reason, device_type, device_ip, device_id, geo_lat, geo_lon, created_at, updated_at";

fn transaction_from_row(row: &Row) -> rusqlite::Result<Transaction> {
    let risk_level: String = row.get(7)?;
    let status: String = row.get(8)?;
    let lat: Option<f64> = row.get(13)?;
    let lon: Option<f64> = row.get(14)?;
    let created_at: String = row.get(15)?;
    let updated_at: String = row.get(16)?;

    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        amount: row.get(2)?,
        merchant: row.get(3)?,
        category: row.get(4)?,
        fraud_score: row.get(5)?,
        risk_score: row.get(6)?,
        risk_level: parse_enum::<RiskLevel>(7, &risk_level)?,
        status: parse_enum::<TransactionStatus>(8, &status)?,
        reason: row.get(9)?,
        device_type: row.get(10)?,
        device_ip: row.get(11)?,
        device_id: row.get(12)?,
        location: lat.zip(lon).map(|(lat, lon)| GeoPoint { lat, lon }),
        timestamp: parse_ts(15, &created_at)?,
        updated_at: parse_ts(16, &updated_at)?,
    })
}

/// Insert a scored transaction; `metadata` carries features and actions
pub fn insert_transaction(
    conn: &Connection,
    tx: &Transaction,
    metadata: &serde_json::Value,
) -> Result<()> {
    conn.execute(
        "INSERT INTO transactions (
            id, user_id, amount, merchant, category, fraud_score, risk_score, risk_level,
            status, reason, device_type, device_ip, device_id, geo_lat, geo_lon,
            created_at, updated_at, metadata
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            tx.id,
            tx.user_id,
            tx.amount,
            tx.merchant,
            tx.category,
            tx.fraud_score,
            tx.risk_score,
            tx.risk_level.as_str(),
            tx.status.as_str(),
            tx.reason,
            tx.device_type,
            tx.device_ip,
            tx.device_id,
            tx.location.map(|l| l.lat),
            tx.location.map(|l| l.lon),
            ts(tx.timestamp),
            ts(tx.updated_at),
            serde_json::to_string(metadata)?,
        ],
    )
    .with_context(|| format!("Failed to insert transaction {}", tx.id))?;
    Ok(())
}

pub fn get_transaction(conn: &Connection, id: &str) -> Result<Option<Transaction>> {
    let sql = format!("SELECT {} FROM transactions WHERE id = ?1", TX_COLUMNS);
    let tx = conn.query_row(&sql, params![id], transaction_from_row).optional()?;
    Ok(tx)
}

pub fn get_transaction_metadata(conn: &Connection, id: &str) -> Result<Option<serde_json::Value>> {
    let raw: Option<Option<String>> = conn
        .query_row(
            "SELECT metadata FROM transactions WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;

    match raw.flatten() {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

/// Returns false when no transaction has that id
pub fn update_transaction_status(
    conn: &Connection,
    id: &str,
    status: TransactionStatus,
    at: DateTime<Utc>,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE transactions SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, status.as_str(), ts(at)],
    )?;
    Ok(changed > 0)
}

/// All transactions, newest first
pub fn get_all_transactions(conn: &Connection) -> Result<Vec<Transaction>> {
    let sql = format!(
        "SELECT {} FROM transactions ORDER BY created_at DESC, id",
        TX_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let transactions = stmt
        .query_map([], transaction_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(transactions)
}

/// One user's transactions, oldest first
pub fn get_user_history(conn: &Connection, user_id: &str) -> Result<Vec<Transaction>> {
    let sql = format!(
        "SELECT {} FROM transactions WHERE user_id = ?1 ORDER BY created_at ASC, id",
        TX_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let transactions = stmt
        .query_map(params![user_id], transaction_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(transactions)
}

pub fn count_transactions(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// DEVICES
// ============================================================================

fn device_from_row(row: &Row) -> rusqlite::Result<Device> {
    let created_at: String = row.get(6)?;
    let last_used: String = row.get(7)?;
    Ok(Device {
        id: row.get(0)?,
        user_id: row.get(1)?,
        device_key: row.get(2)?,
        device_type: row.get(3)?,
        is_trusted: row.get(4)?,
        trust_score: row.get(5)?,
        created_at: parse_ts(6, &created_at)?,
        last_used: parse_ts(7, &last_used)?,
    })
}

pub fn get_user_devices(conn: &Connection, user_id: &str) -> Result<Vec<Device>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, device_key, device_type, is_trusted, trust_score, created_at, last_used
         FROM devices WHERE user_id = ?1 ORDER BY created_at",
    )?;
    let devices = stmt
        .query_map(params![user_id], device_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(devices)
}

pub fn upsert_device(conn: &Connection, device: &Device) -> Result<()> {
    conn.execute(
        "INSERT INTO devices (id, user_id, device_key, device_type, is_trusted, trust_score, created_at, last_used)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(user_id, device_key) DO UPDATE SET
            device_type = excluded.device_type,
            is_trusted = excluded.is_trusted,
            trust_score = excluded.trust_score,
            last_used = excluded.last_used",
        params![
            device.id,
            device.user_id,
            device.device_key,
            device.device_type,
            device.is_trusted,
            device.trust_score,
            ts(device.created_at),
            ts(device.last_used),
        ],
    )?;
    Ok(())
}

pub fn count_active_devices(conn: &Connection, since: DateTime<Utc>) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM devices WHERE last_used >= ?1",
        params![ts(since)],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ============================================================================
// LEARNING LOG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningRecord {
    pub tx_id: String,
    pub fraud_probability: f64,
    pub decision: String,
    /// None for the scoring decision itself, Some for user feedback
    pub user_confirmed: Option<bool>,
    pub created_at: DateTime<Utc>,
}

pub fn insert_learning_record(conn: &Connection, record: &LearningRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO learning_log (tx_id, fraud_probability, decision, user_confirmed, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.tx_id,
            record.fraud_probability,
            record.decision,
            record.user_confirmed,
            ts(record.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_learning_records(conn: &Connection, tx_id: &str) -> Result<Vec<LearningRecord>> {
    let mut stmt = conn.prepare(
        "SELECT tx_id, fraud_probability, decision, user_confirmed, created_at
         FROM learning_log WHERE tx_id = ?1 ORDER BY id",
    )?;
    let records = stmt
        .query_map(params![tx_id], |row| {
            let created_at: String = row.get(4)?;
            Ok(LearningRecord {
                tx_id: row.get(0)?,
                fraud_probability: row.get(1)?,
                decision: row.get(2)?,
                user_confirmed: row.get(3)?,
                created_at: parse_ts(4, &created_at)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

// ============================================================================
// MONITORED USERS & DEMO REQUESTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredUser {
    pub user_id: String,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub fn insert_monitored_user(conn: &Connection, user: &MonitoredUser) -> Result<()> {
    conn.execute(
        "INSERT INTO monitored_users (user_id, phone_number, email, name, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user.user_id, user.phone_number, user.email, user.name, ts(user.created_at)],
    )?;
    Ok(())
}

pub fn find_monitored_user(conn: &Connection, user_id: &str) -> Result<Option<MonitoredUser>> {
    let user = conn
        .query_row(
            "SELECT user_id, phone_number, email, name, created_at FROM monitored_users WHERE user_id = ?1",
            params![user_id],
            |row| {
                let created_at: String = row.get(4)?;
                Ok(MonitoredUser {
                    user_id: row.get(0)?,
                    phone_number: row.get(1)?,
                    email: row.get(2)?,
                    name: row.get(3)?,
                    created_at: parse_ts(4, &created_at)?,
                })
            },
        )
        .optional()?;
    Ok(user)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoRequest {
    pub email: String,
    pub role: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub requirement: Option<String>,
}

pub fn insert_demo_request(conn: &Connection, request: &DemoRequest) -> Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO demo_requests (id, email, role, name, company, requirement, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            request.email,
            request.role,
            request.name,
            request.company,
            request.requirement,
            ts(Utc::now()),
        ],
    )?;
    Ok(id)
}

pub fn count_demo_requests(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM demo_requests", [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// OUTBOX
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: String,
    pub kind: String,
    pub recipient: String,
    pub subject: String,
    pub html_body: String,
    pub created_at: DateTime<Utc>,
}

pub fn insert_outbox_entry(conn: &Connection, entry: &OutboxEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO outbox (id, kind, recipient, subject, html_body, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.id,
            entry.kind,
            entry.recipient,
            entry.subject,
            entry.html_body,
            ts(entry.created_at),
        ],
    )?;
    Ok(())
}

/// Most recent messages first
pub fn list_outbox(conn: &Connection, limit: usize) -> Result<Vec<OutboxEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, recipient, subject, html_body, created_at
         FROM outbox ORDER BY created_at DESC, rowid DESC LIMIT ?1",
    )?;
    let entries = stmt
        .query_map(params![limit as i64], |row| {
            let created_at: String = row.get(5)?;
            Ok(OutboxEntry {
                id: row.get(0)?,
                kind: row.get(1)?,
                recipient: row.get(2)?,
                subject: row.get(3)?,
                html_body: row.get(4)?,
                created_at: parse_ts(5, &created_at)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

// ============================================================================
// OAUTH STATES (CSRF protection for the Google flow)
// ============================================================================

pub fn insert_oauth_state(conn: &Connection, state: &str, expires_at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO oauth_states (state, expires_at) VALUES (?1, ?2)",
        params![state, ts(expires_at)],
    )?;
    Ok(())
}

/// Single use: the state row is deleted whether or not it was still valid
pub fn consume_oauth_state(conn: &Connection, state: &str, now: DateTime<Utc>) -> Result<bool> {
    let expires_at: Option<String> = conn
        .query_row(
            "SELECT expires_at FROM oauth_states WHERE state = ?1",
            params![state],
            |row| row.get(0),
        )
        .optional()?;

    conn.execute("DELETE FROM oauth_states WHERE state = ?1", params![state])?;

    match expires_at {
        Some(raw) => Ok(parse_ts(0, &raw)? > now),
        None => Ok(false),
    }
}

// ============================================================================
// EVENTS (audit trail)
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            ts(event.timestamp),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Events for one entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_ts(1, &timestamp_str)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// CSV IMPORT
// ============================================================================

/// One CSV row of a transaction batch to score
#[derive(Debug, Deserialize)]
struct ImportRow {
    user_id: String,
    amount: f64,
    merchant: String,
    merchant_category: String,
    #[serde(default)]
    device_type: Option<String>,
    #[serde(default)]
    device_ip: Option<String>,
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    email: Option<String>,
}

impl From<ImportRow> for TransactionRequest {
    fn from(row: ImportRow) -> Self {
        TransactionRequest {
            user_id: row.user_id,
            amount: row.amount,
            merchant: row.merchant,
            merchant_category: row.merchant_category,
            device_type: row
                .device_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "web".to_string()),
            device_ip: row.device_ip.unwrap_or_default(),
            device_id: row.device_id.filter(|d| !d.is_empty()),
            user_location: row.lat.zip(row.lon).map(|(lat, lon)| GeoPoint { lat, lon }),
            email: row.email.filter(|e| !e.is_empty()),
        }
    }
}

pub fn load_csv(csv_path: &Path) -> Result<Vec<TransactionRequest>> {
    let mut rdr = csv::Reader::from_path(csv_path).context("Failed to open CSV file")?;

    let mut requests = Vec::new();

    for (line, result) in rdr.deserialize::<ImportRow>().enumerate() {
        // +2: header line and 1-based numbering
        let row = result.with_context(|| format!("Failed to deserialize CSV line {}", line + 2))?;
        requests.push(row.into());
    }

    Ok(requests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn sample_tx(id: &str, user_id: &str, at: DateTime<Utc>) -> Transaction {
        Transaction {
            id: id.to_string(),
            user_id: user_id.to_string(),
            amount: 250.0,
            merchant: "Swiggy".to_string(),
            category: "FOOD".to_string(),
            fraud_score: 0.12,
            risk_score: 12,
            risk_level: RiskLevel::Minimal,
            status: TransactionStatus::Approved,
            reason: "ok".to_string(),
            device_type: "mobile".to_string(),
            device_ip: "10.0.0.1".to_string(),
            device_id: None,
            location: Some(GeoPoint { lat: 12.97, lon: 77.59 }),
            timestamp: at,
            updated_at: at,
        }
    }

    #[test]
    fn test_user_round_trip_and_lookup() {
        let conn = memory_db();
        let user = User::new("Asha@Example.com", "hash".into(), "Asha", Some("+919876543210".into()));
        insert_user(&conn, &user).unwrap();

        let by_email = find_user_by_email(&conn, "ASHA@example.com").unwrap().unwrap();
        assert_eq!(by_email.id, user.id);
        assert!(find_user_by_phone(&conn, "+919876543210").unwrap().is_some());
        assert!(find_user_by_id(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let conn = memory_db();
        insert_user(&conn, &User::new("a@example.com", "h".into(), "Ann", None)).unwrap();
        assert!(insert_user(&conn, &User::new("a@example.com", "h".into(), "Ann", None)).is_err());
    }

    #[test]
    fn test_transaction_status_update() {
        let conn = memory_db();
        let tx = sample_tx("tx1", "u1", Utc::now());
        insert_transaction(&conn, &tx, &serde_json::json!({"features": {}})).unwrap();

        assert!(update_transaction_status(&conn, "tx1", TransactionStatus::Blocked, Utc::now()).unwrap());
        assert!(!update_transaction_status(&conn, "nope", TransactionStatus::Blocked, Utc::now()).unwrap());

        let stored = get_transaction(&conn, "tx1").unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Blocked);
        assert_eq!(stored.location, tx.location);
        assert!(get_transaction_metadata(&conn, "tx1").unwrap().unwrap().get("features").is_some());
    }

    #[test]
    fn test_history_ordering() {
        let conn = memory_db();
        let now = Utc::now();
        insert_transaction(&conn, &sample_tx("late", "u1", now), &serde_json::json!({})).unwrap();
        insert_transaction(
            &conn,
            &sample_tx("early", "u1", now - chrono::Duration::hours(2)),
            &serde_json::json!({}),
        )
        .unwrap();
        insert_transaction(&conn, &sample_tx("other", "u2", now), &serde_json::json!({})).unwrap();

        let history = get_user_history(&conn, "u1").unwrap();
        let ids: Vec<_> = history.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);

        let all = get_all_transactions(&conn).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all.last().unwrap().id, "early");
    }

    #[test]
    fn test_device_upsert_keeps_single_row() {
        let conn = memory_db();
        let now = Utc::now();
        let mut device = Device::new("u1", "dev-1", "mobile", now);
        upsert_device(&conn, &device).unwrap();

        device.record_outcome(0.0, now);
        upsert_device(&conn, &Device { id: "other-id".into(), ..device.clone() }).unwrap();

        let devices = get_user_devices(&conn, "u1").unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, device.id);
        assert!((devices[0].trust_score - device.trust_score).abs() < 1e-9);
        assert_eq!(count_active_devices(&conn, now - chrono::Duration::days(1)).unwrap(), 1);
    }

    #[test]
    fn test_oauth_state_single_use() {
        let conn = memory_db();
        let now = Utc::now();
        insert_oauth_state(&conn, "s1", now + chrono::Duration::minutes(10)).unwrap();
        insert_oauth_state(&conn, "old", now - chrono::Duration::minutes(1)).unwrap();

        assert!(consume_oauth_state(&conn, "s1", now).unwrap());
        assert!(!consume_oauth_state(&conn, "s1", now).unwrap());
        assert!(!consume_oauth_state(&conn, "old", now).unwrap());
    }

    #[test]
    fn test_events_newest_first() {
        let conn = memory_db();
        let first = Event::new("created", "transaction", "tx1", serde_json::json!({"n": 1}), "agent");
        let mut second = Event::new("status_changed", "transaction", "tx1", serde_json::json!({"n": 2}), "analyst");
        second.timestamp = first.timestamp + chrono::Duration::seconds(1);
        insert_event(&conn, &first).unwrap();
        insert_event(&conn, &second).unwrap();

        let events = get_events_for_entity(&conn, "transaction", "tx1").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "status_changed");
        assert_eq!(events[1].data["n"], 1);
    }

    #[test]
    fn test_load_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "user_id,amount,merchant,merchant_category,device_type,device_ip,device_id,lat,lon,email"
        )
        .unwrap();
        writeln!(file, "u1,499.0,Zomato,FOOD,mobile,10.0.0.2,,19.07,72.87,").unwrap();
        writeln!(file, "u2,75000,Unknown_Store,CRYPTO,,,,,,alert@example.com").unwrap();

        let requests = load_csv(file.path()).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].device_type, "mobile");
        assert!(requests[0].user_location.is_some());
        assert_eq!(requests[0].email, None);
        assert_eq!(requests[1].device_type, "web");
        assert_eq!(requests[1].user_location, None);
        assert_eq!(requests[1].email.as_deref(), Some("alert@example.com"));
    }
}
