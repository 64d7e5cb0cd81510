// Bearer session tokens and transaction-scoped callback tokens
pub mod extractor;
pub mod tokens;

pub use tokens::{callback_url, CallbackClaims, Role, SessionClaims, TokenService};
