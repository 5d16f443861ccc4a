//! Seance - client and workflow tracker for a multi-agent helpdesk
//!
//! The library holds everything the `seance` binary uses so that
//! integration tests can drive the controller against a scripted service.

pub mod api;
pub mod config;
pub mod logging;
pub mod types;
pub mod workflow;
