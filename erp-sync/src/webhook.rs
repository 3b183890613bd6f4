use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::sync::SyncEngine;
use crate::tenant::tenant_from_subscription_id;
use crate::transform::EntitySnapshot;
use crate::workflow::WorkflowService;
use axum::{
    Router,
    extract::{Json, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post}
};
use chrono::Utc;
use hmac::{Hmac, KeyInit, Mac};
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::Sha256;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Ingress for broker subscription notifications and workflow-bus events.
/// This is the only HTTP surface the engine owns; the general API front
/// door lives elsewhere.
pub struct WebhookServer {
    config: SyncConfig,
    engine: Arc<SyncEngine>,
    workflow: Arc<WorkflowService>
}

#[derive(Clone)]
struct AppState {
    webhook_secret: Option<String>,
    engine: Arc<SyncEngine>,
    workflow: Arc<WorkflowService>
}

impl WebhookServer {
    pub fn new(
        config: SyncConfig,
        engine: Arc<SyncEngine>,
        workflow: Arc<WorkflowService>
    ) -> Self {
        Self {
            config,
            engine,
            workflow
        }
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            webhook_secret: self.config.webhook_secret.clone(),
            engine: self.engine.clone(),
            workflow: self.workflow.clone()
        };

        Router::new()
            .route("/webhooks/entities", post(handle_entity_notification))
            .route("/webhooks/workflow", post(handle_workflow_event))
            .route("/health", get(health_check))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    pub async fn run(&self) -> SyncResult<()> {
        let addr = format!("0.0.0.0:{}", self.config.webhook_port);
        info!(addr = %addr, "Starting webhook server");

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| SyncError::Config(format!("Failed to bind: {e}")))?;

        axum::serve(listener, self.router())
            .await
            .map_err(|e| SyncError::Config(format!("Server error: {e}")))?;

        Ok(())
    }
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

/// Subscription notification as pushed by the context broker.
#[derive(Debug, Deserialize)]
struct EntityNotification {
    id: String,
    #[serde(rename = "subscriptionId")]
    subscription_id: String,
    #[serde(rename = "notifiedAt")]
    notified_at: Option<String>,
    data: Vec<EntitySnapshot>
}

async fn handle_entity_notification(
    State(state): State<AppState>,
    Json(notification): Json<EntityNotification>
) -> (StatusCode, Json<Value>) {
    debug!(
        notification_id = %notification.id,
        subscription_id = %notification.subscription_id,
        entities = notification.data.len(),
        "Received broker notification"
    );

    let Some(tenant_id) = tenant_from_subscription_id(&notification.subscription_id) else {
        warn!(
            subscription_id = %notification.subscription_id,
            "Could not determine tenant for subscription"
        );
        return (
            StatusCode::OK,
            Json(json!({"status": "ignored", "reason": "unknown_subscription"}))
        );
    };

    let mut synced = 0u32;
    let mut errors = 0u32;

    for entity in &notification.data {
        match state.engine.upsert_entity(&tenant_id, entity).await {
            Ok(record) => {
                info!(
                    tenant_id = %tenant_id,
                    entity_id = %entity.id,
                    record_id = record.record_id,
                    "Entity synced from notification"
                );
                synced += 1;
            }
            Err(e) => {
                error!(
                    tenant_id = %tenant_id,
                    entity_id = %entity.id,
                    error = %e,
                    "Failed to sync notified entity"
                );
                errors += 1;
            }
        }
    }

    (
        StatusCode::OK,
        Json(json!({
            "status": "processed",
            "synced": synced,
            "errors": errors,
            "timestamp": Utc::now().to_rfc3339()
        }))
    )
}

/// Workflow-bus event envelope. The tenant is explicit here, unlike broker
/// notifications where it is derived from the subscription id.
#[derive(Debug, Deserialize)]
struct WorkflowEventPayload {
    workflow_id: String,
    execution_id: String,
    event: String,
    data: Value,
    tenant_id: String
}

async fn handle_workflow_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String
) -> (StatusCode, Json<Value>) {
    if let Some(secret) = &state.webhook_secret {
        let signature = headers
            .get("x-workflow-signature")
            .and_then(|value| value.to_str().ok());

        let verified = signature
            .map(|signature| verify_workflow_signature(secret, &body, signature))
            .unwrap_or(false);

        if !verified {
            warn!("Invalid workflow webhook signature");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"status": "error", "error": "invalid signature"}))
            );
        }
    }

    let payload: WorkflowEventPayload = match serde_json::from_str(&body) {
        Ok(payload) => payload,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"status": "error", "error": format!("invalid payload: {e}")}))
            );
        }
    };

    info!(
        event = %payload.event,
        workflow_id = %payload.workflow_id,
        execution_id = %payload.execution_id,
        tenant_id = %payload.tenant_id,
        "Received workflow event"
    );

    match state
        .workflow
        .handle_event(&payload.tenant_id, &payload.event, &payload.data)
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "status": "processed",
                "event": payload.event,
                "result": outcome,
                "timestamp": Utc::now().to_rfc3339()
            }))
        ),
        Err(SyncError::InvalidWebhookPayload(message)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "error", "error": message}))
        ),
        Err(e) => {
            error!(event = %payload.event, error = %e, "Failed to process workflow event");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "error": e.to_string()}))
            )
        }
    }
}

fn verify_workflow_signature(secret: &str, body: &str, signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body.as_bytes());
    mac.verify_slice(&signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_signature_round_trip() {
        let body = r#"{"event":"sync.request"}"#;
        let signature = sign("shared-secret", body);
        assert!(verify_workflow_signature("shared-secret", body, &signature));
    }

    #[test]
    fn test_signature_wrong_secret_fails() {
        let body = r#"{"event":"sync.request"}"#;
        let signature = sign("shared-secret", body);
        assert!(!verify_workflow_signature("other-secret", body, &signature));
    }

    #[test]
    fn test_signature_invalid_hex_fails() {
        assert!(!verify_workflow_signature("secret", "{}", "not-hex"));
    }

    #[test]
    fn test_notification_deserialization() {
        let json = r#"{
            "id": "urn:ngsi-ld:Notification:1",
            "type": "Notification",
            "subscriptionId": "urn:ngsi-ld:Subscription:erp-sync-farm-7-agriparcel",
            "notifiedAt": "2025-06-01T10:00:00Z",
            "data": [
                {"id": "urn:x:1", "type": "AgriParcel", "area": {"value": 3.5}}
            ]
        }"#;

        let notification: EntityNotification = serde_json::from_str(json).unwrap();
        assert_eq!(notification.data.len(), 1);
        assert_eq!(notification.data[0].entity_type, "AgriParcel");
        assert_eq!(
            tenant_from_subscription_id(&notification.subscription_id),
            Some("farm-7".to_string())
        );
    }

    #[test]
    fn test_workflow_payload_deserialization() {
        let json = r#"{
            "workflow_id": "wf-12",
            "execution_id": "exec-99",
            "event": "erp.invoice.create",
            "data": {"partner_email": "kate@example.com", "lines": []},
            "tenant_id": "farm-7"
        }"#;

        let payload: WorkflowEventPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.event, "erp.invoice.create");
        assert_eq!(payload.tenant_id, "farm-7");
    }
}
