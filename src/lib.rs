// VerifAI - Core Library
// Exposes all modules for use in the CLI, the API server, the client and tests

pub mod config;
pub mod error;
pub mod db;
pub mod entities;
pub mod auth;
pub mod features;   // Behavioral feature extraction
pub mod scoring;    // Risk model, levels, decisions
pub mod agent;      // Perceive -> reason -> decide -> act -> learn
pub mod notify;
pub mod dashboard;

#[cfg(feature = "server")]
pub mod oauth;
#[cfg(feature = "server")]
pub mod api;

#[cfg(feature = "client")]
pub mod client;

// Re-export commonly used types
pub use config::Settings;
pub use error::{AppError, AppResult};
pub use db::{open_database, setup_database, load_csv, insert_event, get_events_for_entity, Event};
pub use entities::{
    AnalystAction, Device, GeoPoint, RiskLevel, Transaction, TransactionRequest, TransactionStatus,
    User, UserProfile,
};
pub use auth::{AuthService, TokenResponse};
pub use features::{FeatureEngineer, FeatureVector};
pub use scoring::{Decision, RiskModel, Thresholds, WeightedRiskModel};
pub use agent::{AgentResult, FraudAgent};
pub use notify::{Notifier, OutboxNotifier};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
