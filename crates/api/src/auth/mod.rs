//! Authentication for the Daybook API

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtError, JwtManager};
pub use middleware::{extract_bearer_token, require_auth, AuthState, AuthUser};
