use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a tenant's ERP database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Pending,
    Provisioning,
    Active,
    Error
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Error => "error"
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "pending" => Self::Pending,
            "provisioning" => Self::Provisioning,
            "active" => Self::Active,
            _ => Self::Error
        }
    }
}

/// One row per tenant. The record is created on the first provisioning
/// request and hard-deleted on decommission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRecord {
    pub tenant_id: String,
    pub database: String,
    pub status: TenantStatus,
    pub energy_capabilities_enabled: bool,
    pub installed_capabilities: Vec<String>,
    pub admin_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>
}

impl TenantRecord {
    /// Durable marker written before any external provisioning call, so a
    /// crash mid-provision leaves `provisioning` behind instead of silence.
    pub fn provisioning(tenant_id: &str, database: &str) -> Self {
        let now = Utc::now();
        Self {
            tenant_id: tenant_id.to_string(),
            database: database.to_string(),
            status: TenantStatus::Provisioning,
            energy_capabilities_enabled: false,
            installed_capabilities: Vec::new(),
            admin_email: None,
            created_at: now,
            updated_at: now,
            error: None
        }
    }
}

/// Durable link between an external entity and the ERP record it maps to.
///
/// `record_id` is only meaningful together with `record_kind` and the
/// owning tenant's database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMapping {
    pub entity_id: String,
    pub entity_type: String,
    pub record_id: i64,
    pub record_kind: String,
    pub record_name: String,
    pub last_sync: DateTime<Utc>
}

/// Terminal state of the latest sync run for a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    NeverSynced,
    Syncing,
    Synced,
    SyncedWithErrors,
    Error
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NeverSynced => "never_synced",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::SyncedWithErrors => "synced_with_errors",
            Self::Error => "error"
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "never_synced" => Self::NeverSynced,
            "syncing" => Self::Syncing,
            "synced" => Self::Synced,
            "synced_with_errors" => Self::SyncedWithErrors,
            _ => Self::Error
        }
    }
}

/// One row per tenant, overwritten wholesale on every sync run. The error
/// list is bounded to the run that wrote it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub last_sync: Option<DateTime<Utc>>,
    pub entities_synced: i32,
    pub errors: Vec<String>,
    pub updated_at: DateTime<Utc>
}

impl SyncStatus {
    pub fn never_synced() -> Self {
        Self {
            state: SyncState::NeverSynced,
            last_sync: None,
            entities_synced: 0,
            errors: Vec::new(),
            updated_at: Utc::now()
        }
    }

    pub fn syncing() -> Self {
        Self {
            state: SyncState::Syncing,
            last_sync: None,
            entities_synced: 0,
            errors: Vec::new(),
            updated_at: Utc::now()
        }
    }
}
