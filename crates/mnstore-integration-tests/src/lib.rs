//! Integration test crate for masternode chunk replication.
//!
//! This crate has no library code. Its tests drive several nodes end to
//! end: ledger intake, fetching between ranked owners, spot-check audits
//! and the QUIC transport.
//!
//! Run all integration tests, including the ones that bind UDP sockets:
//! ```sh
//! cargo test -p mnstore-integration-tests -- --include-ignored
//! ```
