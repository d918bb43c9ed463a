/// Authentication core
///
/// Token codec, password hashing, hash-keyed token persistence, account
/// lockout, and the session manager that ties them together.

mod claims;
mod jwt;
pub mod lockout;
mod password;
mod session;
pub mod token_store;

pub use claims::{AccessClaims, RefreshClaims};
pub use jwt::{sign_access_token, sign_refresh_token, verify_access_token, verify_refresh_token};
pub use password::{hash_password, validate_strength, verify_password, StrengthReport};
pub use session::{RequestContext, SessionManager, TokenPair};
