// 📧 Notifications - branded templates + outbox
//
// Messages are rendered here and handed to a Notifier. The shipped notifier
// writes them to the `outbox` table for a relay to deliver.

use anyhow::Result;
use chrono::Utc;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::config::Settings;
use crate::db::{insert_outbox_entry, DemoRequest, OutboxEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    FraudAlert,
    VerificationRequired,
    TransactionApproved,
    AccountLocked,
    EmailVerification,
    PasswordReset,
    DemoRequest,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::FraudAlert => "fraud_alert",
            MessageKind::VerificationRequired => "verification_required",
            MessageKind::TransactionApproved => "transaction_approved",
            MessageKind::AccountLocked => "account_locked",
            MessageKind::EmailVerification => "email_verification",
            MessageKind::PasswordReset => "password_reset",
            MessageKind::DemoRequest => "demo_request",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageKind,
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

pub trait Notifier: Send + Sync {
    /// Returns Ok(false) when the message was skipped (e.g. no recipient)
    fn send(&self, conn: &Connection, message: &Message) -> Result<bool>;
}

/// Persists every message to the outbox table
#[derive(Debug, Default, Clone)]
pub struct OutboxNotifier;

impl Notifier for OutboxNotifier {
    fn send(&self, conn: &Connection, message: &Message) -> Result<bool> {
        if message.to.trim().is_empty() {
            warn!(kind = message.kind.as_str(), "Email not queued: missing recipient");
            return Ok(false);
        }

        insert_outbox_entry(
            conn,
            &OutboxEntry {
                id: uuid::Uuid::new_v4().to_string(),
                kind: message.kind.as_str().to_string(),
                recipient: message.to.clone(),
                subject: message.subject.clone(),
                html_body: message.html_body.clone(),
                created_at: Utc::now(),
            },
        )?;

        info!(kind = message.kind.as_str(), to = %message.to, "Email queued");
        Ok(true)
    }
}

// ============================================================================
// TEMPLATES
// ============================================================================

const BLUE: &str = "#4A90E2";
const RED: &str = "#dc3545";
const YELLOW: &str = "#ffc107";
const GREEN: &str = "#28a745";
const DARK: &str = "#343a40";

/// Renders branded messages using contact details from Settings
pub struct Templates<'a> {
    settings: &'a Settings,
}

impl<'a> Templates<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    fn wrap(&self, title: &str, content: &str, color: &str) -> String {
        format!(
            r#"<!DOCTYPE html>
<html>
<head>
<style>
  body {{ font-family: 'Segoe UI', Tahoma, sans-serif; margin: 0; padding: 0; background-color: #f4f4f4; }}
  .container {{ max-width: 600px; margin: 20px auto; background: #ffffff; border-radius: 10px; overflow: hidden; }}
  .header {{ background-color: {color}; padding: 30px; text-align: center; color: white; }}
  .content {{ padding: 40px; color: #333; line-height: 1.6; }}
  .footer {{ background-color: #f8f9fa; padding: 20px; text-align: center; font-size: 12px; color: #666; }}
  .details-table {{ width: 100%; border-collapse: collapse; margin: 20px 0; }}
  .details-table td {{ padding: 10px; border-bottom: 1px solid #eee; }}
</style>
</head>
<body>
  <div class="container">
    <div class="header"><h1>{title}</h1></div>
    <div class="content">{content}</div>
    <div class="footer">
      <p>Protected by {app} Security Systems</p>
      <p>Need help? Call {phone} or email {email}</p>
    </div>
  </div>
</body>
</html>"#,
            color = color,
            title = escape_html(title),
            content = content,
            app = escape_html(&self.settings.app_name),
            phone = escape_html(&self.settings.support_phone),
            email = escape_html(&self.settings.support_email),
        )
    }

    fn details(rows: &[(&str, String)]) -> String {
        let body: String = rows
            .iter()
            .map(|(k, v)| format!("<tr><td>{}</td><td>{}</td></tr>", escape_html(k), escape_html(v)))
            .collect();
        format!(r#"<table class="details-table">{}</table>"#, body)
    }

    pub fn fraud_alert(&self, to: &str, tx_id: &str, amount: f64, merchant: &str, category: &str, fraud_score: f64) -> Message {
        let content = format!(
            "<h2>Suspicious Activity Detected</h2>\
             <p>We blocked a high-risk transaction on your account due to unusual activity patterns.</p>\
             <p><strong>Risk Score: {}%</strong></p>{}\
             <p>If this was you, please contact support to unblock your account.</p>",
            (fraud_score * 100.0).round() as i64,
            Self::details(&[
                ("Merchant", merchant.to_string()),
                ("Amount", format_inr(amount)),
                ("Category", category.to_string()),
                ("Time", Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()),
                ("Transaction ID", tx_id.to_string()),
            ]),
        );
        Message {
            kind: MessageKind::FraudAlert,
            to: to.to_string(),
            subject: format!("Fraud Alert: Transaction Blocked at {}", merchant),
            html_body: self.wrap("Security Alert", &content, RED),
        }
    }

    pub fn verification_required(&self, to: &str, tx_id: &str, amount: f64, merchant: &str) -> Message {
        let content = format!(
            "<h2>Verification Required</h2>\
             <p>We noticed a transaction that requires your confirmation before we can proceed.</p>{}\
             <p>Please confirm if you authorized this payment.</p>",
            Self::details(&[
                ("Merchant", merchant.to_string()),
                ("Amount", format_inr(amount)),
                ("Transaction ID", tx_id.to_string()),
            ]),
        );
        Message {
            kind: MessageKind::VerificationRequired,
            to: to.to_string(),
            subject: format!("Action Required: Verify Transaction at {}", merchant),
            html_body: self.wrap("Verify Transaction", &content, YELLOW),
        }
    }

    pub fn transaction_approved(&self, to: &str, tx_id: &str, amount: f64, merchant: &str) -> Message {
        let content = format!(
            "<h2>Transaction Approved</h2>\
             <p>Your transaction has been successfully processed and verified.</p>{}",
            Self::details(&[
                ("Merchant", merchant.to_string()),
                ("Amount", format_inr(amount)),
                ("Transaction ID", tx_id.to_string()),
            ]),
        );
        Message {
            kind: MessageKind::TransactionApproved,
            to: to.to_string(),
            subject: format!("Receipt: Payment to {}", merchant),
            html_body: self.wrap("Payment Successful", &content, GREEN),
        }
    }

    pub fn account_locked(&self, to: &str, tx_id: &str) -> Message {
        let content = format!(
            "<h2>Account Temporarily Locked</h2>\
             <p>For your security, we have temporarily locked your account following a critical security alert (Ref: {}).</p>\
             <p>Please contact our fraud prevention team to verify your identity and restore access.</p>\
             <p><strong>Support: {}</strong></p>",
            escape_html(tx_id),
            escape_html(&self.settings.support_phone),
        );
        Message {
            kind: MessageKind::AccountLocked,
            to: to.to_string(),
            subject: "Security Alert: Account Locked".to_string(),
            html_body: self.wrap("Account Locked", &content, DARK),
        }
    }

    pub fn email_verification(&self, to: &str, name: &str, token: &str) -> Message {
        let link = self.settings.verify_email_link(token);
        let content = format!(
            "<h2>Welcome, {}!</h2>\
             <p>Please confirm your email address to finish setting up your account.</p>\
             <p><a href=\"{}\">Verify email</a></p>",
            escape_html(name),
            escape_html(&link),
        );
        Message {
            kind: MessageKind::EmailVerification,
            to: to.to_string(),
            subject: format!("Verify your {} account", self.settings.app_name),
            html_body: self.wrap("Verify Your Email", &content, BLUE),
        }
    }

    pub fn password_reset(&self, to: &str, name: &str, token: &str) -> Message {
        let link = self.settings.reset_password_link(token);
        let content = format!(
            "<h2>Hi {},</h2>\
             <p>We received a request to reset your password. The link expires in one hour.</p>\
             <p><a href=\"{}\">Reset password</a></p>\
             <p>If you did not request this, you can ignore this email.</p>",
            escape_html(name),
            escape_html(&link),
        );
        Message {
            kind: MessageKind::PasswordReset,
            to: to.to_string(),
            subject: "Reset your password".to_string(),
            html_body: self.wrap("Password Reset", &content, BLUE),
        }
    }

    /// Sent to the support inbox, not to the requester
    pub fn demo_request(&self, request: &DemoRequest) -> Message {
        let content = format!(
            "<h2>New Demo Request</h2>{}",
            Self::details(&[
                ("Name", request.name.clone().unwrap_or_default()),
                ("Email", request.email.clone()),
                ("Role", request.role.clone()),
                ("Company", request.company.clone().unwrap_or_default()),
                ("Requirement", request.requirement.clone().unwrap_or_default()),
            ]),
        );
        Message {
            kind: MessageKind::DemoRequest,
            to: self.settings.support_email.clone(),
            subject: format!("Demo request from {}", request.email),
            html_body: self.wrap("Demo Request", &content, BLUE),
        }
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// ₹1,23,456.00 style (Indian digit grouping)
pub fn format_inr(amount: f64) -> String {
    let negative = amount < 0.0;
    let paise = (amount.abs() * 100.0).round() as u64;
    let (rupees, paise) = (paise / 100, paise % 100);

    let digits = rupees.to_string();
    let grouped = if digits.len() <= 3 {
        digits
    } else {
        let (head, tail) = digits.split_at(digits.len() - 3);
        let mut groups: Vec<&str> = Vec::new();
        let mut end = head.len();
        while end > 0 {
            let start = end.saturating_sub(2);
            groups.push(&head[start..end]);
            end = start;
        }
        groups.reverse();
        format!("{},{}", groups.join(","), tail)
    };

    format!("{}₹{}.{:02}", if negative { "-" } else { "" }, grouped, paise)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{list_outbox, setup_database};

    #[test]
    fn test_format_inr() {
        assert_eq!(format_inr(0.0), "₹0.00");
        assert_eq!(format_inr(999.5), "₹999.50");
        assert_eq!(format_inr(75000.0), "₹75,000.00");
        assert_eq!(format_inr(1234567.891), "₹12,34,567.89");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<b>\"A&B\"</b>"), "&lt;b&gt;&quot;A&amp;B&quot;&lt;/b&gt;");
    }

    #[test]
    fn test_outbox_persists_and_skips_empty_recipient() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let settings = Settings::default();
        let templates = Templates::new(&settings);

        let alert = templates.fraud_alert("a@example.com", "tx1", 75000.0, "<Shady>", "CRYPTO", 0.95);
        assert!(alert.html_body.contains("&lt;Shady&gt;"));
        assert!(alert.html_body.contains("95%"));
        assert!(OutboxNotifier.send(&conn, &alert).unwrap());

        let empty = templates.account_locked("", "tx1");
        assert!(!OutboxNotifier.send(&conn, &empty).unwrap());

        let outbox = list_outbox(&conn, 10).unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].kind, "fraud_alert");
        assert_eq!(outbox[0].recipient, "a@example.com");
    }

    #[test]
    fn test_demo_request_goes_to_support() {
        let settings = Settings::default();
        let msg = Templates::new(&settings).demo_request(&DemoRequest {
            email: "cto@bank.example".into(),
            role: "CTO".into(),
            name: Some("Ravi".into()),
            company: Some("Bank".into()),
            requirement: None,
        });
        assert_eq!(msg.to, settings.support_email);
        assert!(msg.subject.contains("cto@bank.example"));
    }
}
