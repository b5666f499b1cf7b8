//! Company profile model.
//!
//! # Responsibility
//! - Describe the tenant-owned entity that obligations are tracked for.
//! - Hold the attributes rule applicability is evaluated against.
//!
//! # Invariants
//! - `id` is stable and never reused.
//! - Deactivation archives owned tasks; profiles are never hard-deleted.

use crate::model::notification::NotificationChannel;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

pub type CompanyId = Uuid;
pub type TenantId = Uuid;

/// Legal form of a company, used by rule applicability predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    PrivateLimited,
    PublicLimited,
    Llp,
    Partnership,
    SoleProprietorship,
    Trust,
    Other,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrivateLimited => "private_limited",
            Self::PublicLimited => "public_limited",
            Self::Llp => "llp",
            Self::Partnership => "partnership",
            Self::SoleProprietorship => "sole_proprietorship",
            Self::Trust => "trust",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "private_limited" => Some(Self::PrivateLimited),
            "public_limited" => Some(Self::PublicLimited),
            "llp" => Some(Self::Llp),
            "partnership" => Some(Self::Partnership),
            "sole_proprietorship" => Some(Self::SoleProprietorship),
            "trust" => Some(Self::Trust),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Validation failures for company profiles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompanyValidationError {
    #[error("company name must not be blank")]
    BlankName,
    #[error("company jurisdiction must not be blank")]
    BlankJurisdiction,
    #[error("subscribed rule code must not be blank")]
    BlankRuleCode,
}

/// Tenant-owned company whose obligations are tracked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub id: CompanyId,
    pub tenant_id: TenantId,
    pub name: String,
    /// Country code matched against `ObligationRule::jurisdiction`.
    pub jurisdiction: String,
    /// Sub-national region code (e.g. `MH`), for state-specific rules.
    pub state: Option<String>,
    pub entity_type: EntityType,
    pub annual_turnover: Option<u64>,
    /// No period ending before this date's period is instantiated.
    pub onboarded_on: NaiveDate,
    pub subscribed_rules: BTreeSet<String>,
    pub notification_channels: Vec<NotificationChannel>,
    pub contact: Option<String>,
    pub is_active: bool,
}

impl CompanyProfile {
    /// Creates an active profile with a generated id and no subscriptions.
    pub fn new(
        tenant_id: TenantId,
        name: impl Into<String>,
        jurisdiction: impl Into<String>,
        entity_type: EntityType,
        onboarded_on: NaiveDate,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.into(),
            jurisdiction: jurisdiction.into(),
            state: None,
            entity_type,
            annual_turnover: None,
            onboarded_on,
            subscribed_rules: BTreeSet::new(),
            notification_channels: vec![NotificationChannel::Email],
            contact: None,
            is_active: true,
        }
    }

    /// Adds rule codes to the subscription set.
    pub fn subscribe<I, S>(&mut self, codes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subscribed_rules
            .extend(codes.into_iter().map(|code| code.into().trim().to_string()));
    }

    pub fn is_subscribed(&self, rule_code: &str) -> bool {
        self.subscribed_rules.contains(rule_code)
    }

    pub fn validate(&self) -> Result<(), CompanyValidationError> {
        if self.name.trim().is_empty() {
            return Err(CompanyValidationError::BlankName);
        }
        if self.jurisdiction.trim().is_empty() {
            return Err(CompanyValidationError::BlankJurisdiction);
        }
        if self.subscribed_rules.iter().any(|code| code.trim().is_empty()) {
            return Err(CompanyValidationError::BlankRuleCode);
        }
        Ok(())
    }
}
