// 📱 Device Entity - fingerprint of where a user transacts from

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub user_id: String,
    /// device_id if the caller sent one, otherwise the IP address
    pub device_key: String,
    pub device_type: String,
    pub is_trusted: bool,
    /// 0.0 - 1.0
    pub trust_score: f64,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl Device {
    pub fn new(user_id: &str, device_key: &str, device_type: &str, now: DateTime<Utc>) -> Self {
        Device {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            device_key: device_key.to_string(),
            device_type: device_type.to_string(),
            is_trusted: false,
            trust_score: 0.5,
            created_at: now,
            last_used: now,
        }
    }

    /// Nudge trust after a scored transaction.
    /// Clean approvals build trust slowly, blocks destroy it fast.
    pub fn record_outcome(&mut self, fraud_score: f64, now: DateTime<Utc>) {
        let target = 1.0 - fraud_score.clamp(0.0, 1.0);
        let weight = if target < self.trust_score { 0.5 } else { 0.1 };
        self.trust_score = (self.trust_score + weight * (target - self.trust_score)).clamp(0.0, 1.0);
        self.is_trusted = self.trust_score >= 0.8;
        self.last_used = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trust_moves_toward_outcome() {
        let now = Utc::now();
        let mut device = Device::new("u1", "dev-1", "mobile", now);

        device.record_outcome(0.0, now);
        assert!(device.trust_score > 0.5);
        assert!(!device.is_trusted);

        let before = device.trust_score;
        device.record_outcome(1.0, now);
        assert!(device.trust_score < before / 2.0 + 0.01);
    }

    #[test]
    fn test_repeated_clean_use_becomes_trusted() {
        let now = Utc::now();
        let mut device = Device::new("u1", "dev-1", "mobile", now);
        for _ in 0..30 {
            device.record_outcome(0.02, now);
        }
        assert!(device.is_trusted);
    }
}
