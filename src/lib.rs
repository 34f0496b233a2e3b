// src/lib.rs

//! matchsync library: ResultsVault match synchronization with snapshot
//! change tracking.

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
