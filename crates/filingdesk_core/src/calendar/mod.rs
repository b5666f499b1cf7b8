//! Calendar arithmetic for statutory due dates.
//!
//! # Responsibility
//! - Model per-jurisdiction business days (weekends and holidays).
//! - Turn an obligation rule and a period into a concrete due date.
//!
//! # Invariants
//! - Everything in this module is pure and deterministic.

pub mod business_calendar;
pub mod due_date;
