// 🤖 Fraud Agent - perceive, reason, decide, act, learn
//
// One call scores a transaction end to end: history is loaded, features are
// computed, the model decides, side effects run (account lock, emails) and
// everything is persisted in a single SQLite transaction.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::lock_account;
use crate::config::Settings;
use crate::db::{self, Event, LearningRecord};
use crate::entities::{to_risk_score, Device, RiskLevel, Transaction, TransactionRequest, TransactionStatus};
use crate::error::{AppError, AppResult};
use crate::features::{FeatureEngineer, FeatureVector};
use crate::notify::{Message, Notifier, Templates};
use crate::scoring::{fraud_probability, Decision, RiskModel, Thresholds};

pub const ACTION_BLOCKED: &str = "TRANSACTION_BLOCKED";
pub const ACTION_ALERT_SENT: &str = "FRAUD_ALERT_SENT";
pub const ACTION_FROZEN: &str = "ACCOUNT_TEMP_FROZEN";
pub const ACTION_HELD: &str = "TRANSACTION_HELD";
pub const ACTION_VERIFICATION_SENT: &str = "VERIFICATION_REQUEST_SENT";
pub const ACTION_APPROVED: &str = "TRANSACTION_APPROVED";

/// Outcome of scoring one transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub transaction_id: String,
    pub fraud_score: f64,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub decision: Decision,
    pub reason: String,
    pub actions: Vec<String>,
    pub requires_confirmation: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub transaction_id: String,
    pub previous_status: TransactionStatus,
    pub status: TransactionStatus,
    pub feedback_recorded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusView {
    pub transaction_id: String,
    pub status: TransactionStatus,
    pub fraud_score: f64,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub last_updated: DateTime<Utc>,
}

pub struct FraudAgent<'a> {
    conn: &'a Connection,
    settings: &'a Settings,
    model: &'a dyn RiskModel,
    notifier: &'a dyn Notifier,
}

impl<'a> FraudAgent<'a> {
    pub fn new(
        conn: &'a Connection,
        settings: &'a Settings,
        model: &'a dyn RiskModel,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self { conn, settings, model, notifier }
    }

    pub fn process_transaction(&self, req: &TransactionRequest) -> AppResult<AgentResult> {
        self.process_transaction_at(req, Utc::now())
    }

    pub fn process_transaction_at(&self, req: &TransactionRequest, now: DateTime<Utc>) -> AppResult<AgentResult> {
        req.validate()?;
        let tx_id = uuid::Uuid::new_v4().to_string();

        // 1. PERCEIVE
        info!(phase = "perceive", tx_id = %tx_id, user_id = %req.user_id, amount = req.amount, merchant = %req.merchant, "Transaction received");
        let history = db::get_user_history(self.conn, &req.user_id)?;
        let devices = db::get_user_devices(self.conn, &req.user_id)?;

        // 2. REASON
        let features = FeatureEngineer::new(&history, &devices).create_features(req, now);
        let probability = fraud_probability(self.model, &features);
        let thresholds = Thresholds::from(self.settings);
        let risk_level = thresholds.categorize(probability);
        info!(phase = "reason", tx_id = %tx_id, fraud_probability = probability, risk_level = risk_level.as_str(), model = self.model.name(), "Risk assessed");

        // 3. DECIDE
        let decision = thresholds.decide(probability);
        info!(phase = "decide", tx_id = %tx_id, decision = decision.as_str(), "Decision made");

        let transaction = Transaction {
            id: tx_id.clone(),
            user_id: req.user_id.clone(),
            amount: req.amount,
            merchant: req.merchant.trim().to_string(),
            category: req.merchant_category.trim().to_uppercase(),
            fraud_score: probability,
            risk_score: to_risk_score(probability),
            risk_level,
            status: decision.status(),
            reason: decision.reason().to_string(),
            device_type: req.device_type.clone(),
            device_ip: req.device_ip.clone(),
            device_id: req.device_id.clone(),
            location: req.user_location,
            timestamp: now,
            updated_at: now,
        };

        let db_tx = self.conn.unchecked_transaction()?;

        // 4. ACT
        let actions = self.act(&transaction, decision, req.email.as_deref(), now)?;
        info!(phase = "act", tx_id = %tx_id, actions = ?actions, "Actions executed");

        // 5. LEARN
        self.learn(&transaction, req, &devices, &features, &actions, decision, now)?;
        db_tx.commit()?;
        info!(phase = "learn", tx_id = %tx_id, "Stored for feedback");

        Ok(AgentResult {
            transaction_id: tx_id,
            fraud_score: probability,
            risk_score: transaction.risk_score,
            risk_level,
            decision,
            reason: transaction.reason,
            actions,
            requires_confirmation: decision == Decision::Hold,
            timestamp: now,
        })
    }

    /// Who gets emails about this user's transactions, if anyone
    fn recipient(&self, user_id: &str, explicit: Option<&str>) -> AppResult<Option<String>> {
        if let Some(email) = explicit.map(str::trim).filter(|e| !e.is_empty()) {
            return Ok(Some(email.to_string()));
        }

        if let Some(user) = db::find_user_by_id(self.conn, user_id)? {
            return Ok(user.email_alerts.then_some(user.email));
        }

        Ok(db::find_monitored_user(self.conn, user_id)?.and_then(|m| m.email))
    }

    fn notify(&self, message: Message) -> bool {
        match self.notifier.send(self.conn, &message) {
            Ok(sent) => sent,
            Err(e) => {
                warn!(kind = message.kind.as_str(), error = %e, "Notification failed");
                false
            }
        }
    }

    fn act(
        &self,
        tx: &Transaction,
        decision: Decision,
        email: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<String>> {
        let templates = Templates::new(self.settings);
        let recipient = self.recipient(&tx.user_id, email)?;
        let mut actions = Vec::new();

        match decision {
            Decision::Block => {
                actions.push(ACTION_BLOCKED.to_string());

                if let Some(to) = &recipient {
                    let alert = templates.fraud_alert(to, &tx.id, tx.amount, &tx.merchant, &tx.category, tx.fraud_score);
                    if self.notify(alert) {
                        actions.push(ACTION_ALERT_SENT.to_string());
                    }
                }

                let until = now + self.settings.account_lock();
                let reason = format!("Transaction {} blocked", tx.id);
                if lock_account(self.conn, &tx.user_id, until, &reason)?.is_some() {
                    actions.push(ACTION_FROZEN.to_string());
                    if let Some(to) = &recipient {
                        self.notify(templates.account_locked(to, &tx.id));
                    }
                }
            }
            Decision::Hold => {
                actions.push(ACTION_HELD.to_string());
                if let Some(to) = &recipient {
                    if self.notify(templates.verification_required(to, &tx.id, tx.amount, &tx.merchant)) {
                        actions.push(ACTION_VERIFICATION_SENT.to_string());
                    }
                }
            }
            Decision::Approve => {
                actions.push(ACTION_APPROVED.to_string());
                if let Some(to) = &recipient {
                    self.notify(templates.transaction_approved(to, &tx.id, tx.amount, &tx.merchant));
                }
            }
        }

        Ok(actions)
    }

    #[allow(clippy::too_many_arguments)]
    fn learn(
        &self,
        tx: &Transaction,
        req: &TransactionRequest,
        devices: &[Device],
        features: &FeatureVector,
        actions: &[String],
        decision: Decision,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let metadata = serde_json::json!({
            "features": features,
            "actions": actions,
            "model": self.model.name(),
        });
        db::insert_transaction(self.conn, tx, &metadata)?;

        if let Some(key) = req.device_key() {
            let mut device = devices
                .iter()
                .find(|d| d.device_key == key)
                .cloned()
                .unwrap_or_else(|| Device::new(&tx.user_id, &key, &req.device_type, now));
            device.record_outcome(tx.fraud_score, now);
            db::upsert_device(self.conn, &device)?;
        }

        db::insert_learning_record(
            self.conn,
            &LearningRecord {
                tx_id: tx.id.clone(),
                fraud_probability: tx.fraud_score,
                decision: decision.as_str().to_string(),
                user_confirmed: None,
                created_at: now,
            },
        )?;

        db::insert_event(
            self.conn,
            &Event::new(
                "transaction_scored",
                "transaction",
                &tx.id,
                serde_json::json!({
                    "decision": decision.as_str(),
                    "fraud_score": tx.fraud_score,
                    "risk_level": tx.risk_level.as_str(),
                    "actions": actions,
                }),
                "agent",
            ),
        )?;

        Ok(())
    }

    /// User answered a verification request: HOLD resolves to APPROVED or BLOCKED.
    /// Denying an already approved transaction flags it for review.
    pub fn handle_verification(&self, tx_id: &str, user_confirmed: bool) -> AppResult<VerificationResult> {
        let tx = db::get_transaction(self.conn, tx_id)?
            .ok_or_else(|| AppError::NotFound("Transaction".to_string()))?;
        let now = Utc::now();

        let status = match (tx.status, user_confirmed) {
            (TransactionStatus::Hold, true) => TransactionStatus::Approved,
            (TransactionStatus::Hold, false) => TransactionStatus::Blocked,
            (TransactionStatus::Approved, false) => TransactionStatus::Flagged,
            (current, _) => current,
        };

        if user_confirmed {
            info!(phase = "learn", tx_id, "User confirmed transaction");
        } else {
            warn!(phase = "learn", tx_id, "Fraud confirmed by user");
        }

        let db_tx = self.conn.unchecked_transaction()?;
        if status != tx.status {
            db::update_transaction_status(self.conn, tx_id, status, now)?;
        }
        db::insert_learning_record(
            self.conn,
            &LearningRecord {
                tx_id: tx_id.to_string(),
                fraud_probability: tx.fraud_score,
                decision: status.as_str().to_string(),
                user_confirmed: Some(user_confirmed),
                created_at: now,
            },
        )?;
        db::insert_event(
            self.conn,
            &Event::new(
                "user_verification",
                "transaction",
                tx_id,
                serde_json::json!({
                    "user_confirmed": user_confirmed,
                    "from": tx.status.as_str(),
                    "to": status.as_str(),
                }),
                "user",
            ),
        )?;
        db_tx.commit()?;

        Ok(VerificationResult {
            transaction_id: tx_id.to_string(),
            previous_status: tx.status,
            status,
            feedback_recorded: true,
        })
    }

    pub fn status(&self, tx_id: &str) -> AppResult<StatusView> {
        let tx = db::get_transaction(self.conn, tx_id)?
            .ok_or_else(|| AppError::NotFound("Transaction".to_string()))?;

        Ok(StatusView {
            transaction_id: tx.id,
            status: tx.status,
            fraud_score: tx.fraud_score,
            risk_score: tx.risk_score,
            risk_level: tx.risk_level,
            last_updated: tx.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{hash_password, AuthService};
    use crate::db::{get_learning_records, list_outbox, setup_database, MonitoredUser};
    use crate::entities::{LoginRequest, User};
    use crate::notify::OutboxNotifier;
    use crate::scoring::WeightedRiskModel;

    struct Fixed(f64);

    impl RiskModel for Fixed {
        fn predict(&self, _: &FeatureVector) -> f64 {
            self.0
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn request(user_id: &str, amount: f64, category: &str) -> TransactionRequest {
        TransactionRequest {
            user_id: user_id.into(),
            amount,
            merchant: "Amazon".into(),
            merchant_category: category.into(),
            device_type: "mobile".into(),
            device_ip: "10.0.0.7".into(),
            device_id: Some("phone-1".into()),
            user_location: None,
            email: None,
        }
    }

    #[test]
    fn test_ordinary_purchase_is_approved_and_persisted() {
        let conn = memory_db();
        let settings = Settings::default();
        let model = WeightedRiskModel::built_in();
        let agent = FraudAgent::new(&conn, &settings, &model, &OutboxNotifier);

        let result = agent.process_transaction(&request("user_1", 2000.0, "ECOMMERCE")).unwrap();
        assert_eq!(result.decision, Decision::Approve);
        assert_eq!(result.actions, vec![ACTION_APPROVED.to_string()]);
        assert!(!result.requires_confirmation);

        let stored = db::get_transaction(&conn, &result.transaction_id).unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Approved);
        assert_eq!(stored.risk_score, result.risk_score);
        assert_eq!(db::get_user_devices(&conn, "user_1").unwrap().len(), 1);
        assert_eq!(get_learning_records(&conn, &result.transaction_id).unwrap().len(), 1);

        let meta = db::get_transaction_metadata(&conn, &result.transaction_id).unwrap().unwrap();
        assert!(meta["features"]["amount_zscore"].is_number());
    }

    #[test]
    fn test_extreme_crypto_purchase_is_blocked_and_account_locked() {
        let conn = memory_db();
        let settings = Settings {
            password_hash_iterations: 10,
            ..Settings::default()
        };
        let user = User::new("victim@example.com", hash_password("Secret123", 10), "Victim", None);
        db::insert_user(&conn, &user).unwrap();

        let model = WeightedRiskModel::built_in();
        let agent = FraudAgent::new(&conn, &settings, &model, &OutboxNotifier);
        let result = agent.process_transaction(&request(&user.id, 75000.0, "CRYPTO")).unwrap();

        assert_eq!(result.decision, Decision::Block);
        assert!(result.fraud_score >= 0.95);
        assert_eq!(result.risk_level, RiskLevel::Critical);
        assert_eq!(
            result.actions,
            vec![ACTION_BLOCKED.to_string(), ACTION_ALERT_SENT.to_string(), ACTION_FROZEN.to_string()]
        );

        let kinds: Vec<_> = list_outbox(&conn, 10).unwrap().into_iter().map(|m| m.kind).collect();
        assert!(kinds.contains(&"fraud_alert".to_string()));
        assert!(kinds.contains(&"account_locked".to_string()));

        let auth = AuthService::new(&conn, &settings, &OutboxNotifier);
        let login = auth.login(&LoginRequest {
            identifier: "victim@example.com".into(),
            password: "Secret123".into(),
        });
        assert!(matches!(login, Err(AppError::AccountLocked { .. })));
    }

    #[test]
    fn test_hold_then_user_confirms() {
        let conn = memory_db();
        let settings = Settings::default();
        let model = Fixed(0.6);
        let agent = FraudAgent::new(&conn, &settings, &model, &OutboxNotifier);

        let mut req = request("user_2", 900.0, "ELECTRONICS");
        req.email = Some("buyer@example.com".into());
        let result = agent.process_transaction(&req).unwrap();

        assert_eq!(result.decision, Decision::Hold);
        assert!(result.requires_confirmation);
        assert_eq!(result.actions, vec![ACTION_HELD.to_string(), ACTION_VERIFICATION_SENT.to_string()]);

        let verified = agent.handle_verification(&result.transaction_id, true).unwrap();
        assert_eq!(verified.previous_status, TransactionStatus::Hold);
        assert_eq!(verified.status, TransactionStatus::Approved);
        assert!(verified.feedback_recorded);

        let status = agent.status(&result.transaction_id).unwrap();
        assert_eq!(status.status, TransactionStatus::Approved);

        let records = get_learning_records(&conn, &result.transaction_id).unwrap();
        assert!(records.iter().any(|r| r.user_confirmed == Some(true)));
    }

    #[test]
    fn test_hold_denied_becomes_blocked() {
        let conn = memory_db();
        let settings = Settings::default();
        let model = Fixed(0.55);
        let agent = FraudAgent::new(&conn, &settings, &model, &OutboxNotifier);

        let result = agent.process_transaction(&request("user_3", 900.0, "FOOD")).unwrap();
        let verified = agent.handle_verification(&result.transaction_id, false).unwrap();
        assert_eq!(verified.status, TransactionStatus::Blocked);

        let events = db::get_events_for_entity(&conn, "transaction", &result.transaction_id).unwrap();
        assert_eq!(events[0].event_type, "user_verification");
    }

    #[test]
    fn test_unknown_transaction_is_not_found() {
        let conn = memory_db();
        let settings = Settings::default();
        let model = Fixed(0.1);
        let agent = FraudAgent::new(&conn, &settings, &model, &OutboxNotifier);

        assert!(matches!(agent.status("missing"), Err(AppError::NotFound(_))));
        assert!(matches!(agent.handle_verification("missing", true), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_monitored_user_email_used_without_explicit_email() {
        let conn = memory_db();
        db::insert_monitored_user(
            &conn,
            &MonitoredUser {
                user_id: "user_9".into(),
                phone_number: None,
                email: Some("watch@example.com".into()),
                name: Some("Watcher".into()),
                created_at: Utc::now(),
            },
        )
        .unwrap();

        let settings = Settings::default();
        let model = Fixed(0.65);
        let agent = FraudAgent::new(&conn, &settings, &model, &OutboxNotifier);
        agent.process_transaction(&request("user_9", 100.0, "FOOD")).unwrap();

        let outbox = list_outbox(&conn, 1).unwrap();
        assert_eq!(outbox[0].recipient, "watch@example.com");
        assert_eq!(outbox[0].kind, "verification_required");
    }

    #[test]
    fn test_invalid_amount_rejected_before_scoring() {
        let conn = memory_db();
        let settings = Settings::default();
        let model = Fixed(0.1);
        let agent = FraudAgent::new(&conn, &settings, &model, &OutboxNotifier);

        let result = agent.process_transaction(&request("user_1", -1.0, "FOOD"));
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(db::count_transactions(&conn).unwrap(), 0);
    }
}
