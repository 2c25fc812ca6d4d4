/// Best-effort admin audit logging
///
/// Privileged mutations hand an [`AdminAction`] to the [`AuditLogger`] and
/// move on. A background worker forwards entries to the `log_admin_action`
/// procedure; failures are logged and dropped, never surfaced to the caller.
/// Each entry is sent under the bearer token that was current when it was
/// recorded, so an identity change while entries are queued cannot move
/// them onto another admin.
use crate::gateway::RpcGateway;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};
use uuid::Uuid;

/// One privileged operation worth recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminAction {
    pub action: String,
    pub target_type: String,
    pub target_id: Option<String>,
    pub details: Value,
}

impl AdminAction {
    pub fn new(action: &str, target_type: &str, target_id: Option<Uuid>, details: Value) -> Self {
        Self {
            action: action.to_string(),
            target_type: target_type.to_string(),
            target_id: target_id.map(|id| id.to_string()),
            details,
        }
    }
}

/// Stored audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub admin_id: Uuid,
    pub action: String,
    pub target_type: String,
    pub target_id: Option<String>,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

/// Queued entry together with the actor's bearer token
struct PendingEntry {
    access_token: Option<String>,
    action: AdminAction,
}

/// Queue in front of the audit procedure
pub struct AuditLogger {
    gateway: Arc<dyn RpcGateway>,
    sender: Mutex<Option<mpsc::Sender<PendingEntry>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AuditLogger {
    /// Start the forwarding worker. Must be called from within a tokio runtime.
    pub fn spawn(gateway: Arc<dyn RpcGateway>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(Self::forward(gateway.clone(), receiver));

        Self {
            gateway,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue an entry. Never blocks and never fails the caller.
    pub fn record(&self, action: AdminAction) {
        let sender = self.sender.lock().ok().and_then(|s| s.clone());
        let Some(sender) = sender else {
            debug!("Audit logger closed; dropping {}", action.action);
            return;
        };

        let entry = PendingEntry {
            access_token: self.gateway.access_token(),
            action,
        };
        if let Err(e) = sender.try_send(entry) {
            let entry = match e {
                mpsc::error::TrySendError::Full(entry) | mpsc::error::TrySendError::Closed(entry) => entry,
            };
            warn!("Audit queue unavailable; dropping {} entry", entry.action.action);
        }
    }

    /// Stop accepting entries and wait for queued ones to be forwarded
    pub async fn close(&self) {
        let sender = self.sender.lock().ok().and_then(|mut s| s.take());
        drop(sender);

        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Audit worker ended abnormally: {}", e);
            }
        }
    }

    async fn forward(gateway: Arc<dyn RpcGateway>, mut receiver: mpsc::Receiver<PendingEntry>) {
        while let Some(PendingEntry { access_token, action }) = receiver.recv().await {
            let args = json!({
                "p_action": action.action,
                "p_target_type": action.target_type,
                "p_target_id": action.target_id,
                "p_details": action.details,
            });

            match gateway
                .rpc_with_token(access_token.as_deref(), "log_admin_action", args)
                .await
            {
                Ok(_) => debug!("Audit entry recorded: {}", action.action),
                Err(e) => warn!("Failed to record audit entry {}: {}", action.action, e),
            }
        }
    }
}

impl Drop for AuditLogger {
    fn drop(&mut self) {
        // Dropping the sender lets the worker drain and exit on its own
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }
}
