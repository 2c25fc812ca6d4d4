/// Stripe collaborators behind edge functions
use crate::{
    error::{ClubError, ClubResult},
    gateway::RpcGateway,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Which Stripe Connect link to request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectMode {
    Onboarding,
    Update,
}

/// Checkout outcome reported by `verify-payment`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct LinkReply {
    url: String,
}

#[derive(Debug, Deserialize)]
struct VerifyReply {
    status: PaymentStatus,
}

/// Thin client over the payment edge functions
#[derive(Clone)]
pub struct PaymentsClient {
    gateway: Arc<dyn RpcGateway>,
}

impl PaymentsClient {
    pub fn new(gateway: Arc<dyn RpcGateway>) -> Self {
        Self { gateway }
    }

    /// URL of the Stripe-hosted onboarding or account update page
    pub async fn connect_account(&self, mode: ConnectMode) -> ClubResult<String> {
        let reply = self
            .gateway
            .invoke_function("stripe-connect", Some(json!({ "mode": mode })))
            .await?;
        let reply: LinkReply = serde_json::from_value(reply)?;
        if reply.url.is_empty() {
            return Err(ClubError::Internal("stripe-connect returned no URL".to_string()));
        }
        Ok(reply.url)
    }

    /// Refresh the connected account state; the body is passed through as-is
    pub async fn sync_status(&self) -> ClubResult<Value> {
        Ok(self.gateway.invoke_function("stripe-sync-status", None).await?)
    }

    pub async fn verify_payment(&self, session_id: &str) -> ClubResult<PaymentStatus> {
        if session_id.trim().is_empty() {
            return Err(ClubError::Validation("Missing checkout session id".to_string()));
        }

        let reply = self
            .gateway
            .invoke_function("verify-payment", Some(json!({ "sessionId": session_id })))
            .await?;
        let reply: VerifyReply = serde_json::from_value(reply)?;
        tracing::debug!("Checkout {} is {:?}", session_id, reply.status);
        Ok(reply.status)
    }
}
