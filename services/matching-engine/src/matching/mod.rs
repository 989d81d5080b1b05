//! Matching rules

pub mod crossing;
