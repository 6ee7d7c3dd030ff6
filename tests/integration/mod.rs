//! Integration test suite for the EasyLaw updater
//!
//! End-to-end tests that drive the update orchestrator against an in-process
//! HTTP server, and the `easylaw-updater` binary through `assert_cmd`.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **update_flow**: check, download, replace, and restart through the orchestrator
//! - **cli**: the `check`, `startup`, `status`, and `rollback` commands

mod cli;
mod update_flow;
