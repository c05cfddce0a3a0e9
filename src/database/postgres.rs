//! Postgres-backed stores
//!
//! Queries are built at runtime with `sqlx::query`/`query_as` so the crate
//! compiles without a live database. JSON-shaped columns (overrides, failed
//! channels, healing history, step content) go through `sqlx::types::Json`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::errors::{StoreError, StoreResult};
use super::stores::{
    ContactStore, EnrollmentStore, HealingAuditStore, StepStore, UmbrellaAssignmentStore,
};
use crate::models::{
    Channel, ChannelOverrideMap, Contact, ContactField, ConversionMetadata, Enrollment,
    FailureType, HealingAuditEntry, HealingHistoryEntry, PhoneType, Step, StepContent, StepFlags,
    UmbrellaAssignment,
};

const ENROLLMENT_COLUMNS: &str = r#"
    enrollment_id, tenant_id, contact_id, sequence_id, status, current_step, next_step_at,
    channel_overrides, failed_channels, healing_history, needs_human_intervention,
    contact_replied, call_count, last_call_disposition, last_engagement_at, conversion,
    version, created_at, updated_at
"#;

#[derive(Debug, FromRow)]
struct EnrollmentRow {
    enrollment_id: Uuid,
    tenant_id: Uuid,
    contact_id: Uuid,
    sequence_id: Uuid,
    status: String,
    current_step: i32,
    next_step_at: Option<DateTime<Utc>>,
    channel_overrides: Json<ChannelOverrideMap>,
    failed_channels: Json<BTreeSet<Channel>>,
    healing_history: Json<Vec<HealingHistoryEntry>>,
    needs_human_intervention: bool,
    contact_replied: bool,
    call_count: i32,
    last_call_disposition: Option<String>,
    last_engagement_at: Option<DateTime<Utc>>,
    conversion: Option<Json<ConversionMetadata>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EnrollmentRow> for Enrollment {
    type Error = StoreError;

    fn try_from(row: EnrollmentRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(|_| {
            StoreError::InvalidData(format!(
                "enrollment {} has unknown status '{}'",
                row.enrollment_id, row.status
            ))
        })?;

        Ok(Enrollment {
            enrollment_id: row.enrollment_id,
            tenant_id: row.tenant_id,
            contact_id: row.contact_id,
            sequence_id: row.sequence_id,
            status,
            current_step: row.current_step,
            next_step_at: row.next_step_at,
            channel_overrides: row.channel_overrides.0,
            failed_channels: row.failed_channels.0,
            healing_history: row.healing_history.0,
            needs_human_intervention: row.needs_human_intervention,
            contact_replied: row.contact_replied,
            call_count: row.call_count,
            last_call_disposition: row.last_call_disposition,
            last_engagement_at: row.last_engagement_at,
            conversion: row.conversion.map(|c| c.0),
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgEnrollmentStore {
    pool: PgPool,
}

impl PgEnrollmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EnrollmentStore for PgEnrollmentStore {
    async fn find(&self, enrollment_id: Uuid) -> StoreResult<Option<Enrollment>> {
        let sql = format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM outreach_enrollments WHERE enrollment_id = $1"
        );
        let row = sqlx::query_as::<_, EnrollmentRow>(&sql)
            .bind(enrollment_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Enrollment::try_from).transpose()
    }

    async fn insert(&self, enrollment: &Enrollment) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO outreach_enrollments (
                enrollment_id, tenant_id, contact_id, sequence_id, status, current_step,
                next_step_at, channel_overrides, failed_channels, healing_history,
                needs_human_intervention, contact_replied, call_count, last_call_disposition,
                last_engagement_at, conversion, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(enrollment.enrollment_id)
        .bind(enrollment.tenant_id)
        .bind(enrollment.contact_id)
        .bind(enrollment.sequence_id)
        .bind(enrollment.status.as_str())
        .bind(enrollment.current_step)
        .bind(enrollment.next_step_at)
        .bind(Json(&enrollment.channel_overrides))
        .bind(Json(&enrollment.failed_channels))
        .bind(Json(&enrollment.healing_history))
        .bind(enrollment.needs_human_intervention)
        .bind(enrollment.contact_replied)
        .bind(enrollment.call_count)
        .bind(&enrollment.last_call_disposition)
        .bind(enrollment.last_engagement_at)
        .bind(enrollment.conversion.as_ref().map(Json))
        .bind(enrollment.version)
        .bind(enrollment.created_at)
        .bind(enrollment.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, enrollment: &mut Enrollment) -> StoreResult<()> {
        let updated: Option<(i64, DateTime<Utc>)> = sqlx::query_as(
            r#"
            UPDATE outreach_enrollments
            SET status = $3,
                current_step = $4,
                next_step_at = $5,
                channel_overrides = $6,
                failed_channels = $7,
                healing_history = $8,
                needs_human_intervention = $9,
                contact_replied = $10,
                call_count = $11,
                last_call_disposition = $12,
                last_engagement_at = $13,
                conversion = $14,
                version = version + 1,
                updated_at = NOW()
            WHERE enrollment_id = $1 AND version = $2
            RETURNING version, updated_at
            "#,
        )
        .bind(enrollment.enrollment_id)
        .bind(enrollment.version)
        .bind(enrollment.status.as_str())
        .bind(enrollment.current_step)
        .bind(enrollment.next_step_at)
        .bind(Json(&enrollment.channel_overrides))
        .bind(Json(&enrollment.failed_channels))
        .bind(Json(&enrollment.healing_history))
        .bind(enrollment.needs_human_intervention)
        .bind(enrollment.contact_replied)
        .bind(enrollment.call_count)
        .bind(&enrollment.last_call_disposition)
        .bind(enrollment.last_engagement_at)
        .bind(enrollment.conversion.as_ref().map(Json))
        .fetch_optional(&self.pool)
        .await?;

        if let Some((version, updated_at)) = updated {
            enrollment.version = version;
            enrollment.updated_at = updated_at;
            return Ok(());
        }

        // Zero rows: either the row is gone or someone else bumped the version
        let exists: Option<(i64,)> =
            sqlx::query_as("SELECT version FROM outreach_enrollments WHERE enrollment_id = $1")
                .bind(enrollment.enrollment_id)
                .fetch_optional(&self.pool)
                .await?;

        match exists {
            None => Err(StoreError::not_found("Enrollment", enrollment.enrollment_id)),
            Some(_) => Err(StoreError::VersionConflict {
                enrollment_id: enrollment.enrollment_id,
                expected_version: enrollment.version,
            }),
        }
    }
}

#[derive(Debug, FromRow)]
struct ContactRow {
    contact_id: Uuid,
    tenant_id: Uuid,
    first_name: Option<String>,
    full_name: Option<String>,
    phone: Option<String>,
    phone_type: Option<String>,
    phone_valid: Option<bool>,
    email: Option<String>,
    email_valid: Option<bool>,
}

impl From<ContactRow> for Contact {
    fn from(row: ContactRow) -> Self {
        Contact {
            contact_id: row.contact_id,
            tenant_id: row.tenant_id,
            first_name: row.first_name,
            full_name: row.full_name,
            phone: row.phone,
            phone_type: row
                .phone_type
                .as_deref()
                .and_then(|t| t.parse::<PhoneType>().ok()),
            phone_valid: row.phone_valid,
            email: row.email,
            email_valid: row.email_valid,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgContactStore {
    pool: PgPool,
}

impl PgContactStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactStore for PgContactStore {
    async fn find(&self, contact_id: Uuid) -> StoreResult<Option<Contact>> {
        let row = sqlx::query_as::<_, ContactRow>(
            r#"
            SELECT contact_id, tenant_id, first_name, full_name, phone, phone_type,
                   phone_valid, email, email_valid
            FROM outreach_contacts
            WHERE contact_id = $1
            "#,
        )
        .bind(contact_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Contact::from))
    }

    async fn insert(&self, contact: &Contact) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO outreach_contacts (
                contact_id, tenant_id, first_name, full_name, phone, phone_type,
                phone_valid, email, email_valid
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(contact.contact_id)
        .bind(contact.tenant_id)
        .bind(&contact.first_name)
        .bind(&contact.full_name)
        .bind(&contact.phone)
        .bind(contact.phone_type.map(|t| t.as_str()))
        .bind(contact.phone_valid)
        .bind(&contact.email)
        .bind(contact.email_valid)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_validity(
        &self,
        contact_id: Uuid,
        field: ContactField,
        valid: bool,
    ) -> StoreResult<()> {
        let sql = match field {
            ContactField::Email => {
                "UPDATE outreach_contacts SET email_valid = $2 WHERE contact_id = $1"
            }
            ContactField::Phone => {
                "UPDATE outreach_contacts SET phone_valid = $2 WHERE contact_id = $1"
            }
        };

        let result = sqlx::query(sql)
            .bind(contact_id)
            .bind(valid)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Contact", contact_id));
        }
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct StepRow {
    step_id: Uuid,
    sequence_id: Uuid,
    order_index: i32,
    channel: String,
    content: Json<serde_json::Value>,
    urgency_priority: Option<i32>,
    ai_personalization: bool,
}

impl TryFrom<StepRow> for Step {
    type Error = StoreError;

    fn try_from(row: StepRow) -> Result<Self, Self::Error> {
        let channel = row.channel.parse::<Channel>().map_err(|_| {
            StoreError::InvalidData(format!(
                "step {} has unknown channel '{}'",
                row.step_id, row.channel
            ))
        })?;

        Ok(Step {
            step_id: row.step_id,
            sequence_id: row.sequence_id,
            order_index: row.order_index,
            channel,
            content: StepContent::from(row.content.0),
            flags: StepFlags {
                urgency_priority: row.urgency_priority,
                ai_personalization: row.ai_personalization,
            },
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgStepStore {
    pool: PgPool,
}

impl PgStepStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const STEP_COLUMNS: &str =
    "step_id, sequence_id, order_index, channel, content, urgency_priority, ai_personalization";

#[async_trait]
impl StepStore for PgStepStore {
    async fn find(&self, step_id: Uuid) -> StoreResult<Option<Step>> {
        let sql = format!("SELECT {STEP_COLUMNS} FROM outreach_sequence_steps WHERE step_id = $1");
        let row = sqlx::query_as::<_, StepRow>(&sql)
            .bind(step_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Step::try_from).transpose()
    }

    async fn find_by_order(
        &self,
        sequence_id: Uuid,
        order_index: i32,
    ) -> StoreResult<Option<Step>> {
        let sql = format!(
            "SELECT {STEP_COLUMNS} FROM outreach_sequence_steps \
             WHERE sequence_id = $1 AND order_index = $2"
        );
        let row = sqlx::query_as::<_, StepRow>(&sql)
            .bind(sequence_id)
            .bind(order_index)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Step::try_from).transpose()
    }

    async fn insert(&self, step: &Step) -> StoreResult<()> {
        let content: serde_json::Value = step.content.clone().into();
        sqlx::query(
            r#"
            INSERT INTO outreach_sequence_steps (
                step_id, sequence_id, order_index, channel, content,
                urgency_priority, ai_personalization
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(step.step_id)
        .bind(step.sequence_id)
        .bind(step.order_index)
        .bind(step.channel.as_str())
        .bind(Json(content))
        .bind(step.flags.urgency_priority)
        .bind(step.flags.ai_personalization)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct HealingAuditRow {
    audit_id: Uuid,
    enrollment_id: Uuid,
    tenant_id: Uuid,
    step_id: Option<Uuid>,
    step_order: i32,
    channel: Option<String>,
    failure_type: String,
    failure_details: Json<serde_json::Value>,
    action_type: String,
    action_details: Json<serde_json::Value>,
    reason: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<HealingAuditRow> for HealingAuditEntry {
    type Error = StoreError;

    fn try_from(row: HealingAuditRow) -> Result<Self, Self::Error> {
        let action_type = row
            .action_type
            .parse()
            .map_err(StoreError::InvalidData)?;

        Ok(HealingAuditEntry {
            audit_id: row.audit_id,
            enrollment_id: row.enrollment_id,
            tenant_id: row.tenant_id,
            step_id: row.step_id,
            step_order: row.step_order,
            channel: row.channel.as_deref().and_then(|c| c.parse().ok()),
            failure_type: FailureType::from(row.failure_type),
            failure_details: row.failure_details.0,
            action_type,
            action_details: row.action_details.0,
            reason: row.reason,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgHealingAuditStore {
    pool: PgPool,
}

impl PgHealingAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealingAuditStore for PgHealingAuditStore {
    async fn append(&self, entry: &HealingAuditEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO outreach_healing_audit_log (
                audit_id, enrollment_id, tenant_id, step_id, step_order, channel,
                failure_type, failure_details, action_type, action_details, reason, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(entry.audit_id)
        .bind(entry.enrollment_id)
        .bind(entry.tenant_id)
        .bind(entry.step_id)
        .bind(entry.step_order)
        .bind(entry.channel.map(|c| c.as_str()))
        .bind(entry.failure_type.as_str())
        .bind(Json(&entry.failure_details))
        .bind(entry.action_type.as_str())
        .bind(Json(&entry.action_details))
        .bind(&entry.reason)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn entries_for(&self, enrollment_id: Uuid) -> StoreResult<Vec<HealingAuditEntry>> {
        let rows = sqlx::query_as::<_, HealingAuditRow>(
            r#"
            SELECT audit_id, enrollment_id, tenant_id, step_id, step_order, channel,
                   failure_type, failure_details, action_type, action_details, reason, created_at
            FROM outreach_healing_audit_log
            WHERE enrollment_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(enrollment_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(HealingAuditEntry::try_from).collect()
    }
}

#[derive(Debug, FromRow)]
struct UmbrellaAssignmentRow {
    umbrella_id: Uuid,
    tenant_id: Uuid,
    account_type: String,
    encrypted_credential: String,
    concurrency_limit: i32,
    tenant_concurrency_cap: Option<i32>,
    priority_weight: i32,
    active: bool,
}

impl From<UmbrellaAssignmentRow> for UmbrellaAssignment {
    fn from(row: UmbrellaAssignmentRow) -> Self {
        UmbrellaAssignment {
            umbrella_id: row.umbrella_id,
            tenant_id: row.tenant_id,
            account_type: row.account_type,
            encrypted_credential: row.encrypted_credential,
            concurrency_limit: row.concurrency_limit,
            tenant_concurrency_cap: row.tenant_concurrency_cap,
            priority_weight: row.priority_weight,
            active: row.active,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgUmbrellaAssignmentStore {
    pool: PgPool,
}

impl PgUmbrellaAssignmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UmbrellaAssignmentStore for PgUmbrellaAssignmentStore {
    async fn active_assignment(&self, tenant_id: Uuid) -> StoreResult<Option<UmbrellaAssignment>> {
        let row = sqlx::query_as::<_, UmbrellaAssignmentRow>(
            r#"
            SELECT u.umbrella_id, a.tenant_id, u.account_type, u.encrypted_credential,
                   u.concurrency_limit, a.tenant_concurrency_cap, a.priority_weight,
                   (u.active AND a.active) AS active
            FROM outreach_tenant_umbrella_assignments a
            JOIN outreach_umbrella_accounts u ON u.umbrella_id = a.umbrella_id
            WHERE a.tenant_id = $1 AND a.active AND u.active
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UmbrellaAssignment::from))
    }

    async fn reassign_tenant(
        &self,
        tenant_id: Uuid,
        umbrella_id: Uuid,
        tenant_concurrency_cap: Option<i32>,
        priority_weight: i32,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let account: Option<(Uuid,)> = sqlx::query_as(
            "SELECT umbrella_id FROM outreach_umbrella_accounts WHERE umbrella_id = $1",
        )
        .bind(umbrella_id)
        .fetch_optional(&mut *tx)
        .await?;
        if account.is_none() {
            return Err(StoreError::not_found("Umbrella account", umbrella_id));
        }

        sqlx::query(
            r#"
            INSERT INTO outreach_tenant_umbrella_assignments (
                tenant_id, umbrella_id, tenant_concurrency_cap, priority_weight, active, updated_at
            )
            VALUES ($1, $2, $3, $4, TRUE, NOW())
            ON CONFLICT (tenant_id) DO UPDATE
            SET umbrella_id = EXCLUDED.umbrella_id,
                tenant_concurrency_cap = EXCLUDED.tenant_concurrency_cap,
                priority_weight = EXCLUDED.priority_weight,
                active = TRUE,
                updated_at = NOW()
            "#,
        )
        .bind(tenant_id)
        .bind(umbrella_id)
        .bind(tenant_concurrency_cap)
        .bind(priority_weight)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
