//! Alexandria - social-learning platform backend
//!
//! Users follow each other and curate libraries, earn AlexPoints, and buy
//! courses through a payment ledger that splits every sale between the
//! platform and the educator.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
