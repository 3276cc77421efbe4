//! Authentication and authorization primitives.
//!
//! - [`ownership`] -- owner-only mutation guard.
//! - [`jwt`] -- bearer token issuance and validation.
//! - [`password`] -- Argon2id hashing and password strength rules.

pub mod jwt;
pub mod ownership;
pub mod password;

pub use ownership::{assert_owner, Forbidden, Owned};
