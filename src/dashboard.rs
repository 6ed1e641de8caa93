// 📊 Dashboard - aggregates and analyst queries over stored transactions

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use tracing::info;

use crate::db::{self, Event};
use crate::entities::{AnalystAction, GeoPoint, Transaction, TransactionStatus};
use crate::error::{AppError, AppResult};
use crate::features::DEFAULT_MEAN_AMOUNT;

/// Devices used within this window count as active
pub const ACTIVE_DEVICE_DAYS: i64 = 30;
pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;
pub const DAY_LABELS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

// ============================================================================
// STATS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_transactions: i64,
    pub blocked_today: i64,
    pub avg_risk_score: u32,
    pub active_devices: i64,
}

pub fn stats(conn: &Connection, now: DateTime<Utc>) -> AppResult<DashboardStats> {
    let transactions = db::get_all_transactions(conn)?;
    let today = now.date_naive();

    let blocked_today = transactions
        .iter()
        .filter(|t| t.status == TransactionStatus::Blocked && t.timestamp.date_naive() == today)
        .count() as i64;

    let avg_risk_score = if transactions.is_empty() {
        0
    } else {
        let sum: u32 = transactions.iter().map(|t| t.risk_score as u32).sum();
        (sum as f64 / transactions.len() as f64).round() as u32
    };

    Ok(DashboardStats {
        total_transactions: transactions.len() as i64,
        blocked_today,
        avg_risk_score,
        active_devices: db::count_active_devices(conn, now - Duration::days(ACTIVE_DEVICE_DAYS))?,
    })
}

// ============================================================================
// RISK DISTRIBUTION & HEATMAP
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskBucket {
    pub name: String,
    pub value: u32,
}

/// Five 20-point buckets; the last one includes 100
pub fn risk_distribution(conn: &Connection) -> AppResult<Vec<RiskBucket>> {
    let mut counts = [0u32; 5];
    for tx in db::get_all_transactions(conn)? {
        let idx = (tx.risk_score as usize / 20).min(4);
        counts[idx] += 1;
    }

    Ok(counts
        .iter()
        .enumerate()
        .map(|(i, value)| RiskBucket {
            name: format!("{}-{}", i * 20, (i + 1) * 20),
            value: *value,
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heatmap {
    pub days: Vec<String>,
    /// cells[day][hour], Monday first, hours in UTC
    pub cells: Vec<Vec<u32>>,
    pub max: u32,
}

/// Risky (flagged, held or blocked) transactions by weekday and hour
pub fn heatmap(conn: &Connection) -> AppResult<Heatmap> {
    let mut cells = vec![vec![0u32; 24]; 7];
    for tx in db::get_all_transactions(conn)? {
        if tx.status == TransactionStatus::Approved {
            continue;
        }
        let day = tx.timestamp.weekday().num_days_from_monday() as usize;
        let hour = tx.timestamp.hour() as usize;
        cells[day][hour] += 1;
    }

    let max = cells.iter().flatten().copied().max().unwrap_or(0);
    Ok(Heatmap {
        days: DAY_LABELS.iter().map(|d| d.to_string()).collect(),
        cells,
        max,
    })
}

// ============================================================================
// TRANSACTION LIST
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionFilter {
    #[serde(default)]
    pub search: Option<String>,
    /// Status name; "ALL" or empty means no filter
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub risk_min: Option<u8>,
    #[serde(default)]
    pub risk_max: Option<u8>,
    #[serde(default)]
    pub sort_by: Option<String>,
    /// "asc" or "desc" (default)
    #[serde(default)]
    pub order: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortKey {
    Timestamp,
    Amount,
    RiskScore,
    Merchant,
}

impl SortKey {
    fn parse(raw: Option<&str>) -> AppResult<Self> {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            None | Some("") | Some("timestamp") => Ok(SortKey::Timestamp),
            Some("amount") => Ok(SortKey::Amount),
            Some("risk_score") => Ok(SortKey::RiskScore),
            Some("merchant") => Ok(SortKey::Merchant),
            Some(other) => Err(AppError::validation(format!("Cannot sort by '{}'", other))),
        }
    }

    fn compare(&self, a: &Transaction, b: &Transaction) -> Ordering {
        match self {
            SortKey::Timestamp => a.timestamp.cmp(&b.timestamp),
            SortKey::Amount => a.amount.total_cmp(&b.amount),
            SortKey::RiskScore => a.risk_score.cmp(&b.risk_score),
            SortKey::Merchant => a.merchant.to_lowercase().cmp(&b.merchant.to_lowercase()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: u32,
    pub total_items: u32,
    pub has_next: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionPage {
    pub data: Vec<Transaction>,
    pub pagination: Pagination,
}

pub fn list_transactions(conn: &Connection, filter: &TransactionFilter) -> AppResult<TransactionPage> {
    let page = filter.page.unwrap_or(1);
    let limit = filter.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if page == 0 {
        return Err(AppError::validation("page starts at 1"));
    }
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(AppError::validation(format!("limit must be between 1 and {}", MAX_PAGE_SIZE)));
    }

    let status = match filter.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(s) if s.eq_ignore_ascii_case("all") => None,
        Some(s) => Some(s.parse::<TransactionStatus>()?),
    };
    let sort_key = SortKey::parse(filter.sort_by.as_deref())?;
    let ascending = matches!(filter.order.as_deref().map(str::trim), Some(o) if o.eq_ignore_ascii_case("asc"));
    let search = filter
        .search
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    let mut matching: Vec<Transaction> = db::get_all_transactions(conn)?
        .into_iter()
        .filter(|t| status.map_or(true, |s| t.status == s))
        .filter(|t| filter.risk_min.map_or(true, |min| t.risk_score >= min))
        .filter(|t| filter.risk_max.map_or(true, |max| t.risk_score <= max))
        .filter(|t| match &search {
            Some(q) => t.merchant.to_lowercase().contains(q) || t.id.to_lowercase().contains(q),
            None => true,
        })
        .collect();

    matching.sort_by(|a, b| {
        let ord = sort_key.compare(a, b);
        if ascending {
            ord
        } else {
            ord.reverse()
        }
    });

    let total_items = matching.len() as u32;
    let total_pages = total_items.div_ceil(limit);
    // pages past the end come back empty
    let start = usize::try_from(u64::from(page - 1).saturating_mul(u64::from(limit))).unwrap_or(usize::MAX);
    let data: Vec<Transaction> = matching.into_iter().skip(start).take(limit as usize).collect();

    Ok(TransactionPage {
        data,
        pagination: Pagination {
            current_page: page,
            total_pages,
            total_items,
            has_next: start.saturating_add(limit as usize) < total_items as usize,
        },
    })
}

pub fn get_transaction(conn: &Connection, id: &str) -> AppResult<Transaction> {
    db::get_transaction(conn, id)?.ok_or_else(|| AppError::NotFound("Transaction".to_string()))
}

pub fn transaction_events(conn: &Connection, id: &str) -> AppResult<Vec<Event>> {
    // 404 rather than an empty trail for unknown ids
    get_transaction(conn, id)?;
    Ok(db::get_events_for_entity(conn, "transaction", id)?)
}

// ============================================================================
// ANALYST ACTIONS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    pub transaction: Transaction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkActionResult {
    pub success: bool,
    pub message: String,
    pub updated: Vec<String>,
    pub not_found: Vec<String>,
}

fn apply_action(conn: &Connection, id: &str, action: AnalystAction, actor: &str) -> AppResult<Option<Transaction>> {
    let Some(mut tx) = db::get_transaction(conn, id)? else {
        return Ok(None);
    };

    let now = Utc::now();
    let from = tx.status;
    let to = action.target_status();
    db::update_transaction_status(conn, id, to, now)?;
    db::insert_event(
        conn,
        &Event::new(
            "status_changed",
            "transaction",
            id,
            serde_json::json!({ "from": from.as_str(), "to": to.as_str(), "action": action }),
            actor,
        ),
    )?;

    info!(tx_id = id, from = from.as_str(), to = to.as_str(), actor, "Analyst action applied");
    tx.status = to;
    tx.updated_at = now;
    Ok(Some(tx))
}

pub fn take_action(conn: &Connection, id: &str, action: AnalystAction, actor: &str) -> AppResult<ActionResult> {
    let db_tx = conn.unchecked_transaction()?;
    let tx = apply_action(conn, id, action, actor)?
        .ok_or_else(|| AppError::NotFound("Transaction".to_string()))?;
    db_tx.commit()?;

    Ok(ActionResult {
        success: true,
        message: format!("Transaction {} successfully", action.past_tense()),
        transaction: tx,
    })
}

/// Applies the action to every known id; unknown ids are reported, not fatal
pub fn bulk_action(conn: &Connection, ids: &[String], action: AnalystAction, actor: &str) -> AppResult<BulkActionResult> {
    if ids.is_empty() {
        return Err(AppError::validation("ids must not be empty"));
    }

    let db_tx = conn.unchecked_transaction()?;
    let mut updated = Vec::new();
    let mut not_found = Vec::new();
    let unique: BTreeSet<&String> = ids.iter().collect();
    for id in unique {
        match apply_action(conn, id, action, actor)? {
            Some(_) => updated.push(id.clone()),
            None => not_found.push(id.clone()),
        }
    }
    db_tx.commit()?;

    Ok(BulkActionResult {
        success: !updated.is_empty(),
        message: format!("{} transaction(s) {}", updated.len(), action.past_tense()),
        updated,
        not_found,
    })
}

// ============================================================================
// BEHAVIOR PROFILE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorProfile {
    pub user_id: String,
    pub avg_transaction_amount: f64,
    pub typical_daily_frequency: f64,
    pub typical_locations: Vec<GeoPoint>,
    pub transaction_count: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

const MAX_TYPICAL_LOCATIONS: usize = 3;

pub fn behavior_profile(conn: &Connection, user_id: &str) -> AppResult<BehaviorProfile> {
    let history = db::get_user_history(conn, user_id)?;

    if history.is_empty() {
        return Ok(BehaviorProfile {
            user_id: user_id.to_string(),
            avg_transaction_amount: DEFAULT_MEAN_AMOUNT,
            typical_daily_frequency: 0.0,
            typical_locations: Vec::new(),
            transaction_count: 0,
            last_updated: None,
        });
    }

    let count = history.len();
    let avg = history.iter().map(|t| t.amount).sum::<f64>() / count as f64;
    let active_days: BTreeSet<_> = history.iter().map(|t| t.timestamp.date_naive()).collect();
    let frequency = count as f64 / active_days.len() as f64;

    // Cluster on a ~1 km grid, most visited first
    let mut clusters: HashMap<(i64, i64), (usize, GeoPoint)> = HashMap::new();
    for loc in history.iter().filter_map(|t| t.location) {
        let key = ((loc.lat * 100.0).round() as i64, (loc.lon * 100.0).round() as i64);
        clusters.entry(key).or_insert((0, loc)).0 += 1;
    }
    let mut ranked: Vec<_> = clusters.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.0.cmp(&b.0)));

    Ok(BehaviorProfile {
        user_id: user_id.to_string(),
        avg_transaction_amount: (avg * 100.0).round() / 100.0,
        typical_daily_frequency: (frequency * 100.0).round() / 100.0,
        typical_locations: ranked
            .into_iter()
            .take(MAX_TYPICAL_LOCATIONS)
            .map(|(_, (_, loc))| loc)
            .collect(),
        transaction_count: count,
        last_updated: history.last().map(|t| t.timestamp),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_transaction, setup_database};
    use crate::entities::RiskLevel;
    use chrono::TimeZone;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn seed(conn: &Connection, id: &str, merchant: &str, amount: f64, risk: u8, status: TransactionStatus, at: DateTime<Utc>) {
        let tx = Transaction {
            id: id.into(),
            user_id: "u1".into(),
            amount,
            merchant: merchant.into(),
            category: "SHOPPING".into(),
            fraud_score: risk as f64 / 100.0,
            risk_score: risk,
            risk_level: RiskLevel::Low,
            status,
            reason: String::new(),
            device_type: "web".into(),
            device_ip: "10.0.0.1".into(),
            device_id: None,
            location: Some(GeoPoint { lat: 19.076, lon: 72.8777 }),
            timestamp: at,
            updated_at: at,
        };
        insert_transaction(conn, &tx, &serde_json::json!({})).unwrap();
    }

    fn seeded() -> (Connection, DateTime<Utc>) {
        let conn = memory_db();
        // Wednesday
        let now = Utc.with_ymd_and_hms(2024, 3, 13, 15, 0, 0).unwrap();
        seed(&conn, "t1", "Amazon", 1200.0, 10, TransactionStatus::Approved, now - Duration::hours(1));
        seed(&conn, "t2", "Uber", 300.0, 35, TransactionStatus::Approved, now - Duration::hours(2));
        seed(&conn, "t3", "Steam", 9000.0, 85, TransactionStatus::Blocked, now - Duration::hours(3));
        seed(&conn, "t4", "Netflix", 650.0, 55, TransactionStatus::Hold, now - Duration::days(1));
        seed(&conn, "t5", "Amazon Prime", 1500.0, 100, TransactionStatus::Blocked, now - Duration::days(2));
        (conn, now)
    }

    #[test]
    fn test_stats() {
        let (conn, now) = seeded();
        let stats = stats(&conn, now).unwrap();
        assert_eq!(stats.total_transactions, 5);
        assert_eq!(stats.blocked_today, 1);
        // (10 + 35 + 85 + 55 + 100) / 5 = 57
        assert_eq!(stats.avg_risk_score, 57);
        assert_eq!(stats.active_devices, 0);
    }

    #[test]
    fn test_risk_distribution_buckets() {
        let (conn, _) = seeded();
        let buckets = risk_distribution(&conn).unwrap();
        let names: Vec<_> = buckets.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["0-20", "20-40", "40-60", "60-80", "80-100"]);
        let values: Vec<_> = buckets.iter().map(|b| b.value).collect();
        assert_eq!(values, vec![1, 1, 1, 0, 2]);
    }

    #[test]
    fn test_heatmap_counts_risky_only() {
        let (conn, _) = seeded();
        let map = heatmap(&conn).unwrap();
        assert_eq!(map.cells.len(), 7);
        assert!(map.cells.iter().all(|row| row.len() == 24));
        let total: u32 = map.cells.iter().flatten().sum();
        assert_eq!(total, 3);
        // t3: Wednesday 12:00
        assert_eq!(map.cells[2][12], 1);
        assert_eq!(map.max, 1);
    }

    #[test]
    fn test_list_filters_and_pagination() {
        let (conn, _) = seeded();

        let page = list_transactions(&conn, &TransactionFilter { limit: Some(2), ..Default::default() }).unwrap();
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.data[0].id, "t1");
        assert_eq!(page.pagination.total_pages, 3);
        assert!(page.pagination.has_next);

        let last = list_transactions(&conn, &TransactionFilter { limit: Some(2), page: Some(3), ..Default::default() }).unwrap();
        assert_eq!(last.data.len(), 1);
        assert!(!last.pagination.has_next);

        let amazon = list_transactions(&conn, &TransactionFilter { search: Some("AMAZON".into()), ..Default::default() }).unwrap();
        assert_eq!(amazon.pagination.total_items, 2);

        let blocked = list_transactions(&conn, &TransactionFilter { status: Some("blocked".into()), ..Default::default() }).unwrap();
        assert_eq!(blocked.pagination.total_items, 2);

        let all = list_transactions(&conn, &TransactionFilter { status: Some("ALL".into()), ..Default::default() }).unwrap();
        assert_eq!(all.pagination.total_items, 5);

        let mid = list_transactions(&conn, &TransactionFilter { risk_min: Some(30), risk_max: Some(85), ..Default::default() }).unwrap();
        assert_eq!(mid.pagination.total_items, 3);
    }

    #[test]
    fn test_page_far_past_the_end_is_empty() {
        let (conn, _) = seeded();
        let page = list_transactions(
            &conn,
            &TransactionFilter { page: Some(u32::MAX), limit: Some(100), ..Default::default() },
        )
        .unwrap();
        assert!(page.data.is_empty());
        assert_eq!(page.pagination.current_page, u32::MAX);
        assert_eq!(page.pagination.total_items, 5);
        assert!(!page.pagination.has_next);
    }

    #[test]
    fn test_sorting() {
        let (conn, _) = seeded();
        let by_amount = list_transactions(
            &conn,
            &TransactionFilter { sort_by: Some("amount".into()), order: Some("asc".into()), ..Default::default() },
        )
        .unwrap();
        let ids: Vec<_> = by_amount.data.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t2", "t4", "t1", "t5", "t3"]);

        let bad = list_transactions(&conn, &TransactionFilter { sort_by: Some("colour".into()), ..Default::default() });
        assert!(matches!(bad, Err(AppError::Validation(_))));

        let bad_limit = list_transactions(&conn, &TransactionFilter { limit: Some(500), ..Default::default() });
        assert!(matches!(bad_limit, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_take_action_records_event() {
        let (conn, _) = seeded();
        let result = take_action(&conn, "t4", AnalystAction::Approve, "analyst-1").unwrap();
        assert!(result.success);
        assert_eq!(result.message, "Transaction approved successfully");
        assert_eq!(result.transaction.status, TransactionStatus::Approved);

        let events = transaction_events(&conn, "t4").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["from"], "HOLD");
        assert_eq!(events[0].actor, "analyst-1");

        assert!(matches!(take_action(&conn, "nope", AnalystAction::Block, "a"), Err(AppError::NotFound(_))));
        assert!(matches!(transaction_events(&conn, "nope"), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_bulk_action_reports_missing_ids() {
        let (conn, _) = seeded();
        let ids = vec!["t1".to_string(), "t2".to_string(), "ghost".to_string(), "t1".to_string()];
        let result = bulk_action(&conn, &ids, AnalystAction::Flag, "analyst-1").unwrap();
        assert_eq!(result.updated, vec!["t1".to_string(), "t2".to_string()]);
        assert_eq!(result.not_found, vec!["ghost".to_string()]);
        assert_eq!(get_transaction(&conn, "t2").unwrap().status, TransactionStatus::Flagged);

        assert!(bulk_action(&conn, &[], AnalystAction::Flag, "a").is_err());
    }

    #[test]
    fn test_behavior_profile() {
        let (conn, _) = seeded();
        let profile = behavior_profile(&conn, "u1").unwrap();
        assert_eq!(profile.transaction_count, 5);
        assert!((profile.avg_transaction_amount - 2530.0).abs() < 1e-9);
        // 5 transactions over 3 distinct days
        assert!((profile.typical_daily_frequency - 1.67).abs() < 1e-9);
        assert_eq!(profile.typical_locations.len(), 1);

        let empty = behavior_profile(&conn, "nobody").unwrap();
        assert_eq!(empty.avg_transaction_amount, DEFAULT_MEAN_AMOUNT);
        assert!(empty.last_updated.is_none());
    }
}
