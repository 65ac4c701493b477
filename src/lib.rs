//! BeeSense diagnosis service
//!
//! This library provides the core functionality for the beesense system,
//! which analyzes user-submitted bee and brood photos with the Gemini
//! vision API and curates confirmed diagnoses into a dataset archive.

pub mod app_state;
pub mod config;
pub mod dispatch;
pub mod models;
pub mod routes;
pub mod services;
pub mod worker;
