//! # Auth Module
//!
//! JWT validation and the AuthedUser extractor for protected routes.
//! Token issuance, registration, and the rest of the authentication
//! transport live in a separate service.

pub mod extractors;
pub mod models;


pub use extractors::AuthedUser;
pub use models::User;
