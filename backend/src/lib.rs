//! PassVault Backend Library
//!
//! Escrow-backed marketplace for account transfers: the transaction state
//! machine, its timer sweep, disputes, vendor approvals, fraud scoring and
//! the trust-gated chat filter.

pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod dispute;
pub mod error;
pub mod escrow;
pub mod gateway;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod notifications;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod transaction;
pub mod vendor_approval;
pub mod websocket;
