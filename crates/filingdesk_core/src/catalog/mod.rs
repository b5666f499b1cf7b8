//! Obligation rule catalog.
//!
//! # Responsibility
//! - Own the reference data (rules, calendars, fiscal year start).
//! - Be the single entry point for due-date lookups by rule code.

pub mod rule_catalog;
