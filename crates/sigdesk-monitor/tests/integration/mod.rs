//! Integration tests for sigdesk-monitor.
//!
//! These tests verify the interaction between components:
//! - Push connection lifecycle against a live WebSocket server
//! - Push events flowing into the signal book
//! - Snapshot refresh interplay with pushed state

pub mod common;
