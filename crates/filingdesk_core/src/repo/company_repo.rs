//! Company repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist company profiles and their rule subscriptions.
//! - Deactivate companies and archive their tasks in one transaction.
//!
//! # Invariants
//! - Write paths call `CompanyProfile::validate()` before SQL mutations.
//! - Subscriptions are replaced as a whole, never merged.
//! - Companies are never hard-deleted.

use crate::model::company::{CompanyId, CompanyProfile, EntityType, TenantId};
use crate::model::notification::{parse_channel, NotificationChannel};
use crate::repo::{
    bool_to_int, date_to_db, ensure_connection_ready, parse_bool, parse_date, parse_uuid,
    RepoError, RepoResult,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use std::collections::BTreeSet;

const COMPANY_SELECT_SQL: &str = "SELECT
    company_uuid,
    tenant_uuid,
    name,
    jurisdiction,
    state,
    entity_type,
    annual_turnover,
    onboarded_on,
    notification_channels,
    contact,
    is_active
FROM companies";

/// Query options for listing companies.
#[derive(Debug, Clone, Default)]
pub struct CompanyListQuery {
    pub tenant_id: Option<TenantId>,
    pub include_inactive: bool,
}

/// Repository interface for company profiles.
pub trait CompanyRepository {
    fn create_company(&self, company: &CompanyProfile) -> RepoResult<CompanyId>;
    /// Rewrites profile attributes and subscriptions. Activity is left
    /// alone; only `deactivate_company` changes it.
    fn update_company(&self, company: &CompanyProfile) -> RepoResult<()>;
    fn get_company(&self, id: CompanyId) -> RepoResult<Option<CompanyProfile>>;
    /// Lists companies ordered by name, then id.
    fn list_companies(&self, query: &CompanyListQuery) -> RepoResult<Vec<CompanyProfile>>;
    /// Marks the company inactive and archives its tasks.
    ///
    /// Returns the number of tasks archived by this call.
    fn deactivate_company(&self, id: CompanyId) -> RepoResult<usize>;
}

/// SQLite-backed company repository.
pub struct SqliteCompanyRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCompanyRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["companies", "company_rules", "task_instances"])?;
        Ok(Self { conn })
    }
}

impl CompanyRepository for SqliteCompanyRepository<'_> {
    fn create_company(&self, company: &CompanyProfile) -> RepoResult<CompanyId> {
        company.validate()?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO companies (
                company_uuid,
                tenant_uuid,
                name,
                jurisdiction,
                state,
                entity_type,
                annual_turnover,
                onboarded_on,
                notification_channels,
                contact,
                is_active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);",
            params![
                company.id.to_string(),
                company.tenant_id.to_string(),
                company.name.trim(),
                normalize_code(&company.jurisdiction),
                company.state.as_deref().map(normalize_code),
                company.entity_type.as_str(),
                company.annual_turnover.map(turnover_to_db).transpose()?,
                date_to_db(company.onboarded_on),
                channels_to_db(&company.notification_channels),
                company.contact.as_deref(),
                bool_to_int(company.is_active),
            ],
        )?;
        replace_subscriptions(&tx, company.id, &company.subscribed_rules)?;
        tx.commit()?;

        Ok(company.id)
    }

    fn update_company(&self, company: &CompanyProfile) -> RepoResult<()> {
        company.validate()?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE companies
             SET
                name = ?2,
                jurisdiction = ?3,
                state = ?4,
                entity_type = ?5,
                annual_turnover = ?6,
                onboarded_on = ?7,
                notification_channels = ?8,
                contact = ?9,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE company_uuid = ?1;",
            params![
                company.id.to_string(),
                company.name.trim(),
                normalize_code(&company.jurisdiction),
                company.state.as_deref().map(normalize_code),
                company.entity_type.as_str(),
                company.annual_turnover.map(turnover_to_db).transpose()?,
                date_to_db(company.onboarded_on),
                channels_to_db(&company.notification_channels),
                company.contact.as_deref(),
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::CompanyNotFound(company.id));
        }
        replace_subscriptions(&tx, company.id, &company.subscribed_rules)?;
        tx.commit()?;

        Ok(())
    }

    fn get_company(&self, id: CompanyId) -> RepoResult<Option<CompanyProfile>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{COMPANY_SELECT_SQL} WHERE company_uuid = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            let mut company = parse_company_row(row)?;
            company.subscribed_rules = load_subscriptions(self.conn, company.id)?;
            return Ok(Some(company));
        }
        Ok(None)
    }

    fn list_companies(&self, query: &CompanyListQuery) -> RepoResult<Vec<CompanyProfile>> {
        let mut sql = format!("{COMPANY_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if !query.include_inactive {
            sql.push_str(" AND is_active = 1");
        }
        if let Some(tenant_id) = query.tenant_id {
            sql.push_str(" AND tenant_uuid = ?");
            bind_values.push(Value::Text(tenant_id.to_string()));
        }
        sql.push_str(" ORDER BY name ASC, company_uuid ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut companies = Vec::new();
        while let Some(row) = rows.next()? {
            companies.push(parse_company_row(row)?);
        }
        drop(rows);

        for company in &mut companies {
            company.subscribed_rules = load_subscriptions(self.conn, company.id)?;
        }
        Ok(companies)
    }

    fn deactivate_company(&self, id: CompanyId) -> RepoResult<usize> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE companies
             SET
                is_active = 0,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE company_uuid = ?1;",
            [id.to_string()],
        )?;
        if changed == 0 {
            return Err(RepoError::CompanyNotFound(id));
        }

        let archived = tx.execute(
            "UPDATE task_instances
             SET
                is_archived = 1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE company_uuid = ?1
               AND is_archived = 0;",
            [id.to_string()],
        )?;
        tx.commit()?;

        Ok(archived)
    }
}

fn replace_subscriptions(
    tx: &Transaction<'_>,
    company_id: CompanyId,
    codes: &BTreeSet<String>,
) -> RepoResult<()> {
    tx.execute(
        "DELETE FROM company_rules WHERE company_uuid = ?1;",
        [company_id.to_string()],
    )?;
    let mut stmt =
        tx.prepare("INSERT INTO company_rules (company_uuid, rule_code) VALUES (?1, ?2);")?;
    for code in codes {
        stmt.execute(params![company_id.to_string(), code.trim()])?;
    }
    Ok(())
}

fn load_subscriptions(conn: &Connection, company_id: CompanyId) -> RepoResult<BTreeSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT rule_code
         FROM company_rules
         WHERE company_uuid = ?1
         ORDER BY rule_code ASC;",
    )?;
    let codes = stmt
        .query_map([company_id.to_string()], |row| row.get::<_, String>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(codes)
}

fn parse_company_row(row: &Row<'_>) -> RepoResult<CompanyProfile> {
    let id_text: String = row.get("company_uuid")?;
    let tenant_text: String = row.get("tenant_uuid")?;

    let entity_text: String = row.get("entity_type")?;
    let entity_type = EntityType::parse(&entity_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid entity type `{entity_text}` in companies.entity_type"
        ))
    })?;

    let annual_turnover = match row.get::<_, Option<i64>>("annual_turnover")? {
        Some(value) => Some(u64::try_from(value).map_err(|_| {
            RepoError::InvalidData(format!(
                "invalid turnover `{value}` in companies.annual_turnover"
            ))
        })?),
        None => None,
    };

    let onboarded_text: String = row.get("onboarded_on")?;
    let channels_text: String = row.get("notification_channels")?;

    let company = CompanyProfile {
        id: parse_uuid(&id_text, "companies.company_uuid")?,
        tenant_id: parse_uuid(&tenant_text, "companies.tenant_uuid")?,
        name: row.get("name")?,
        jurisdiction: row.get("jurisdiction")?,
        state: row.get("state")?,
        entity_type,
        annual_turnover,
        onboarded_on: parse_date(&onboarded_text, "companies.onboarded_on")?,
        subscribed_rules: BTreeSet::new(),
        notification_channels: parse_channels(&channels_text)?,
        contact: row.get("contact")?,
        is_active: parse_bool(row.get("is_active")?, "companies.is_active")?,
    };
    company.validate()?;
    Ok(company)
}

pub(crate) fn channels_to_db(channels: &[NotificationChannel]) -> String {
    channels
        .iter()
        .map(|channel| channel.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

pub(crate) fn parse_channels(value: &str) -> RepoResult<Vec<NotificationChannel>> {
    if value.trim().is_empty() {
        return Ok(Vec::new());
    }
    value
        .split(',')
        .map(|part| {
            parse_channel(part).map_err(|err| {
                RepoError::InvalidData(format!("invalid channel list `{value}`: {err}"))
            })
        })
        .collect()
}

fn turnover_to_db(value: u64) -> RepoResult<i64> {
    i64::try_from(value)
        .map_err(|_| RepoError::InvalidData(format!("turnover `{value}` exceeds storage range")))
}

fn normalize_code(value: &str) -> String {
    value.trim().to_ascii_uppercase()
}
