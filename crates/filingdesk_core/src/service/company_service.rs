//! Company onboarding use-case service.
//!
//! # Responsibility
//! - Onboard companies and manage rule subscriptions against the catalog.
//! - Apply plan and jurisdiction changes to existing profiles.
//! - Deactivate companies without deleting their history.
//!
//! # Invariants
//! - Every subscribed code exists in the catalog and matches the company's
//!   jurisdiction, both when it is added and after a profile change.

use crate::catalog::rule_catalog::RuleCatalog;
use crate::model::company::{CompanyId, CompanyProfile, EntityType};
use crate::model::notification::NotificationChannel;
use crate::repo::company_repo::{CompanyListQuery, CompanyRepository};
use crate::repo::RepoError;
use crate::service::{ServiceError, ServiceResult};
use log::info;

/// Profile attributes to change; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub jurisdiction: Option<String>,
    pub state: Option<String>,
    pub entity_type: Option<EntityType>,
    pub annual_turnover: Option<u64>,
    pub notification_channels: Option<Vec<NotificationChannel>>,
    pub contact: Option<String>,
}

/// Use-case service for company profiles.
pub struct CompanyService<'c, R: CompanyRepository> {
    repo: R,
    catalog: &'c RuleCatalog,
}

impl<'c, R: CompanyRepository> CompanyService<'c, R> {
    pub fn new(repo: R, catalog: &'c RuleCatalog) -> Self {
        Self { repo, catalog }
    }

    /// Validates subscriptions and persists a new company.
    pub fn onboard(&self, company: &CompanyProfile) -> ServiceResult<CompanyId> {
        self.check_subscriptions(company, company.subscribed_rules.iter())?;
        let id = self.repo.create_company(company)?;
        info!(
            "event=company_onboard module=service status=ok company_id={} tenant_id={} rules={}",
            id,
            company.tenant_id,
            company.subscribed_rules.len()
        );
        Ok(id)
    }

    /// Adds rule codes to an active company's subscriptions.
    pub fn subscribe(&self, id: CompanyId, codes: &[String]) -> ServiceResult<CompanyProfile> {
        let mut company = self.require(id)?;
        if !company.is_active {
            return Err(ServiceError::CompanyInactive(id));
        }
        self.check_subscriptions(&company, codes.iter())?;
        company.subscribe(codes.iter().cloned());
        self.repo.update_company(&company)?;
        Ok(company)
    }

    /// Applies `update` to an active company.
    ///
    /// Current subscriptions are re-checked against the resulting
    /// jurisdiction; a change that would orphan one is rejected.
    pub fn update_profile(
        &self,
        id: CompanyId,
        update: &ProfileUpdate,
    ) -> ServiceResult<CompanyProfile> {
        let mut company = self.require(id)?;
        if !company.is_active {
            return Err(ServiceError::CompanyInactive(id));
        }
        if let Some(name) = &update.name {
            company.name = name.trim().to_string();
        }
        if let Some(jurisdiction) = &update.jurisdiction {
            company.jurisdiction = jurisdiction.trim().to_string();
        }
        if let Some(state) = &update.state {
            company.state = Some(state.trim().to_string());
        }
        if let Some(entity_type) = update.entity_type {
            company.entity_type = entity_type;
        }
        if let Some(turnover) = update.annual_turnover {
            company.annual_turnover = Some(turnover);
        }
        if let Some(channels) = &update.notification_channels {
            let mut channels = channels.clone();
            channels.sort_unstable();
            channels.dedup();
            company.notification_channels = channels;
        }
        if let Some(contact) = &update.contact {
            company.contact = Some(contact.trim().to_string());
        }

        self.check_subscriptions(&company, company.subscribed_rules.iter())?;
        self.repo.update_company(&company)?;
        info!(
            "event=company_update module=service status=ok company_id={} jurisdiction={} entity_type={}",
            id,
            company.jurisdiction,
            company.entity_type.as_str()
        );
        self.require(id)
    }

    /// Removes rule codes; existing tasks are kept.
    pub fn unsubscribe(&self, id: CompanyId, codes: &[String]) -> ServiceResult<CompanyProfile> {
        let mut company = self.require(id)?;
        for code in codes {
            company.subscribed_rules.remove(code.trim());
        }
        self.repo.update_company(&company)?;
        Ok(company)
    }

    /// Marks the company inactive and archives its tasks.
    pub fn deactivate(&self, id: CompanyId) -> ServiceResult<usize> {
        let archived = self.repo.deactivate_company(id)?;
        info!(
            "event=company_deactivate module=service status=ok company_id={} archived_tasks={}",
            id, archived
        );
        Ok(archived)
    }

    pub fn get(&self, id: CompanyId) -> ServiceResult<Option<CompanyProfile>> {
        Ok(self.repo.get_company(id)?)
    }

    pub fn list(&self, query: &CompanyListQuery) -> ServiceResult<Vec<CompanyProfile>> {
        Ok(self.repo.list_companies(query)?)
    }

    fn require(&self, id: CompanyId) -> ServiceResult<CompanyProfile> {
        self.repo
            .get_company(id)?
            .ok_or(ServiceError::Repo(RepoError::CompanyNotFound(id)))
    }

    fn check_subscriptions<'a>(
        &self,
        company: &CompanyProfile,
        codes: impl Iterator<Item = &'a String>,
    ) -> ServiceResult<()> {
        for code in codes {
            let code = code.trim();
            let rule = self
                .catalog
                .get(code)
                .ok_or_else(|| ServiceError::UnknownRule(code.to_string()))?;
            if !rule.jurisdiction.eq_ignore_ascii_case(company.jurisdiction.trim()) {
                return Err(ServiceError::JurisdictionMismatch {
                    rule_code: rule.code.clone(),
                    rule_jurisdiction: rule.jurisdiction.clone(),
                    company_jurisdiction: company.jurisdiction.clone(),
                });
            }
        }
        Ok(())
    }
}
