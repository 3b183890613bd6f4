use crate::config::BrokerConfig;
use crate::error::{SyncError, SyncResult};
use crate::transform::EntitySnapshot;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Read and subscription surface of the context-graph store. Every call is
/// tenant-scoped; the broker partitions entities by the tenant header.
#[async_trait]
pub trait ContextBroker: Send + Sync {
    async fn get_entity(
        &self,
        tenant_id: &str,
        entity_id: &str
    ) -> SyncResult<Option<EntitySnapshot>>;

    async fn list_entities(
        &self,
        tenant_id: &str,
        entity_type: &str,
        limit: usize
    ) -> SyncResult<Vec<EntitySnapshot>>;

    /// Idempotent: an already-existing subscription is success.
    async fn create_subscription(
        &self,
        tenant_id: &str,
        subscription_id: &str,
        entity_type: &str
    ) -> SyncResult<()>;

    /// An already-absent subscription is success.
    async fn delete_subscription(&self, tenant_id: &str, subscription_id: &str) -> SyncResult<()>;
}

const TENANT_HEADER: &str = "NGSILD-Tenant";

pub struct NgsiBrokerClient {
    client: Client,
    config: BrokerConfig
}

impl NgsiBrokerClient {
    pub fn new(config: BrokerConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(SyncError::Http)?;

        Ok(Self { client, config })
    }

    fn entities_url(&self) -> String {
        format!("{}/ngsi-ld/v1/entities", self.config.base_url)
    }

    fn subscriptions_url(&self) -> String {
        format!("{}/ngsi-ld/v1/subscriptions", self.config.base_url)
    }

    fn subscription_body(&self, subscription_id: &str, entity_type: &str) -> Value {
        json!({
            "id": subscription_id,
            "type": "Subscription",
            "entities": [{"type": entity_type}],
            "notification": {
                "endpoint": {
                    "uri": self.config.notification_endpoint,
                    "accept": "application/json"
                }
            }
        })
    }
}

#[async_trait]
impl ContextBroker for NgsiBrokerClient {
    async fn get_entity(
        &self,
        tenant_id: &str,
        entity_id: &str
    ) -> SyncResult<Option<EntitySnapshot>> {
        let url = format!("{}/{}", self.entities_url(), entity_id);
        debug!(url = %url, tenant_id = %tenant_id, "Fetching entity from broker");

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/ld+json")
            .header(TENANT_HEADER, tenant_id)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(Some(response.json::<EntitySnapshot>().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(SyncError::BrokerApi {
                    status: status.as_u16(),
                    message: body
                })
            }
        }
    }

    async fn list_entities(
        &self,
        tenant_id: &str,
        entity_type: &str,
        limit: usize
    ) -> SyncResult<Vec<EntitySnapshot>> {
        let response = self
            .client
            .get(self.entities_url())
            .query(&[("type", entity_type), ("limit", &limit.to_string())])
            .header("Accept", "application/ld+json")
            .header(TENANT_HEADER, tenant_id)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let entities = response.json::<Vec<EntitySnapshot>>().await?;
                debug!(
                    entity_type = %entity_type,
                    count = entities.len(),
                    "Fetched entities from broker"
                );
                Ok(entities)
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(SyncError::BrokerApi {
                    status: status.as_u16(),
                    message: body
                })
            }
        }
    }

    async fn create_subscription(
        &self,
        tenant_id: &str,
        subscription_id: &str,
        entity_type: &str
    ) -> SyncResult<()> {
        let response = self
            .client
            .post(self.subscriptions_url())
            .header("Content-Type", "application/ld+json")
            .header(TENANT_HEADER, tenant_id)
            .json(&self.subscription_body(subscription_id, entity_type))
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED => {
                info!(subscription_id = %subscription_id, "Subscription registered");
                Ok(())
            }
            StatusCode::CONFLICT => {
                debug!(subscription_id = %subscription_id, "Subscription already exists");
                Ok(())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(SyncError::BrokerApi {
                    status: status.as_u16(),
                    message: body
                })
            }
        }
    }

    async fn delete_subscription(&self, tenant_id: &str, subscription_id: &str) -> SyncResult<()> {
        let url = format!("{}/{}", self.subscriptions_url(), subscription_id);

        let response = self
            .client
            .delete(&url)
            .header(TENANT_HEADER, tenant_id)
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => {
                debug!(subscription_id = %subscription_id, "Subscription removed");
                Ok(())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                warn!(
                    subscription_id = %subscription_id,
                    status = status.as_u16(),
                    "Failed to remove subscription"
                );
                Err(SyncError::BrokerApi {
                    status: status.as_u16(),
                    message: body
                })
            }
        }
    }
}

pub fn create_broker_client(config: BrokerConfig) -> SyncResult<Arc<dyn ContextBroker>> {
    Ok(Arc::new(NgsiBrokerClient::new(config)?))
}
