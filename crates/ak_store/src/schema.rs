//! Schema definitions and constants

/// Table names
pub mod tables {
    pub const ANSWERS: &str = "answers";
}

/// `chrono` format of `created_at`, e.g. `2025-03-14 09:26:53`
pub const CREATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
