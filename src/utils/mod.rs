//! Shared helpers

pub mod string;

pub use string::truncate_at_char_boundary;
