// Client side of the VerifAI API: token storage, authenticated requests with
// single-flight refresh, and login session state.

mod api;
mod error;
mod session;
mod store;

pub use api::{ApiClient, MessageBody, SessionEvent};
pub use error::ClientError;
pub use session::AuthSession;
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore, Tokens};
