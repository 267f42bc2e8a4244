//! Auth domain services used by the HTTP routes and guards.
//!
//! ARCHITECTURE
//! ============
//! Service modules own the auth service protocol and the session validity
//! rules so route handlers can stay focused on HTTP plumbing.

pub mod client;
pub mod profile;
pub mod response;
pub mod user;
pub mod verify;
