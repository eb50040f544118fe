//! Web console for a Redis server.
//!
//! Lists and paginates keys (switching from KEYS to SCAN on large or locked
//! down databases), inspects and deletes values of every core type, reports
//! server statistics, and passes arbitrary commands through, all behind a
//! JSON API that the browser UI talks to.

pub mod catalog;
pub mod connection;
pub mod error;
pub mod inspect;
pub mod server;
