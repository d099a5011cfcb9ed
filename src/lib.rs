//! # Invites Library
//!
//! Company invites and membership activation: issuing single-use invite
//! links, validating and accepting them, and activating the invited
//! account's membership in the company.

pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod invite_service;
pub mod models;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub use migration;
