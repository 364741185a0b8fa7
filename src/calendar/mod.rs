//! # Calendar Module
//!
//! Google Calendar integration boundary: connect/disconnect, sync status,
//! and the manual sync trigger, plus the local event store the sync engine
//! reads and writes.

pub mod handlers;
pub mod models;
pub mod routes;
pub mod store;


pub use routes::calendar_routes;
