//! Onboard client: session orchestrator, notification channel and contact
//! provider adapters for the onboarding backend.

pub mod api;
pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod providers;
pub mod session;
