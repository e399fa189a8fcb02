//! ke_backend: backend for the company website
//!
//! Contact-form intake with email/WhatsApp notification, a token-protected
//! admin API for contacts, products and incentives, file uploads, and a
//! Basic-auth contact table with CSV export.
//!
//! Data lives in two JSON documents under the data directory, accessed through
//! the [`storage::RecordStore`] interface.

pub mod auth;
pub mod config;
pub mod csv;
pub mod error;
pub mod models;
pub mod notify;
pub mod ratelimit;
// REST API module: Axum router, auth middleware and handlers
pub mod rest;
pub mod storage;
pub mod validation;
