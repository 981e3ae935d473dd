//! Utility functions for the application

pub mod file;
pub mod gzip;
pub mod retry;
