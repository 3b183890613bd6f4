use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub erp: ErpConfig,
    pub broker: BrokerConfig,
    pub database_url: String,
    #[serde(default = "default_webhook_port")]
    pub webhook_port: u16,
    pub webhook_secret: Option<String>,
    /// Page size for fetch-by-type sweeps.
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,
    #[serde(default = "default_base_capabilities")]
    pub base_capabilities: Vec<String>,
    #[serde(default = "default_energy_capabilities")]
    pub energy_capabilities: Vec<String>
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErpConfig {
    pub base_url: String,
    /// Master password for database lifecycle operations.
    pub master_password: String,
    /// Fixed service credential used for every record operation.
    pub service_login: String,
    pub service_password: String,
    pub template_database: String,
    #[serde(default = "default_database_prefix")]
    pub database_prefix: String,
    #[serde(default = "default_record_timeout")]
    pub record_timeout_seconds: u64,
    /// Database duplicate/drop can take far longer than record calls.
    #[serde(default = "default_lifecycle_timeout")]
    pub lifecycle_timeout_seconds: u64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub base_url: String,
    /// Target URI the broker pushes subscription notifications to.
    pub notification_endpoint: String,
    #[serde(default = "default_record_timeout")]
    pub timeout_seconds: u64
}

fn default_webhook_port() -> u16 {
    8091
}

fn default_page_limit() -> usize {
    1000
}

fn default_database_prefix() -> String {
    "erp".to_string()
}

fn default_record_timeout() -> u64 {
    30
}

fn default_lifecycle_timeout() -> u64 {
    120
}

fn default_base_capabilities() -> Vec<String> {
    ["base", "sale", "purchase", "stock", "account"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_energy_capabilities() -> Vec<String> {
    ["energy_community", "energy_selfconsumption", "energy_metering"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl ErpConfig {
    pub fn record_timeout(&self) -> Duration {
        Duration::from_secs(self.record_timeout_seconds)
    }

    pub fn lifecycle_timeout(&self) -> Duration {
        Duration::from_secs(self.lifecycle_timeout_seconds)
    }

    /// Deterministic database name for a tenant.
    pub fn tenant_database(&self, tenant_id: &str) -> String {
        format!("{}_{}", self.database_prefix, tenant_id)
    }
}

impl BrokerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            erp: ErpConfig {
                base_url: "http://localhost:8069".to_string(),
                master_password: String::new(),
                service_login: "admin".to_string(),
                service_password: String::new(),
                template_database: "erp_template".to_string(),
                database_prefix: default_database_prefix(),
                record_timeout_seconds: default_record_timeout(),
                lifecycle_timeout_seconds: default_lifecycle_timeout()
            },
            broker: BrokerConfig {
                base_url: "http://localhost:1026".to_string(),
                notification_endpoint: "http://localhost:8091/webhooks/entities".to_string(),
                timeout_seconds: default_record_timeout()
            },
            database_url: String::new(),
            webhook_port: default_webhook_port(),
            webhook_secret: None,
            page_limit: default_page_limit(),
            base_capabilities: default_base_capabilities(),
            energy_capabilities: default_energy_capabilities()
        }
    }
}
