//! Domain model for obligation tracking.
//!
//! # Responsibility
//! - Define reference data (rules, periods) and tenant data (companies,
//!   tasks, notification events) used by core business logic.
//!
//! # Invariants
//! - Every tenant-owned object is identified by a stable UUID.
//! - Tasks are archived, never hard-deleted.

pub mod company;
pub mod notification;
pub mod period;
pub mod rule;
pub mod score;
pub mod task;
