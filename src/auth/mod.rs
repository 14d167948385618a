//! Authentication against the hosted backend
//!
//! Uses the backend's password grant, then keeps the session (access token,
//! refresh token, profile snapshot) in the config file.

pub mod password;
pub mod tokens;

pub use password::{login, logout, status};
pub use tokens::{Session, SessionStore, StoredToken};
