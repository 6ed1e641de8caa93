// Entity Models
// Plain records shared by storage, the risk engine and the HTTP layer.
// Each entity carries a stable UUID identity.

pub mod device;
pub mod transaction;
pub mod user;

pub use device::Device;
pub use transaction::{
    to_risk_score, AnalystAction, GeoPoint, RiskLevel, Transaction, TransactionRequest,
    TransactionStatus,
};
pub use user::{LoginRequest, PreferencesUpdate, SignupRequest, User, UserProfile};
