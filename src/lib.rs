//! careerhub - career networking platform backend
//!
//! Accounts and sessions, resume/document storage behind presigned URLs,
//! mentor booking with slot locks, a community board and grouped
//! notifications with quiet hours.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
