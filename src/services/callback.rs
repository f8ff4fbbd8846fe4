use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssuerResponseStatus {
    Successful,
    Declined,
}

/// Body posted to the requester's callback URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerResponseData {
    pub bpn: String,
    pub status: IssuerResponseStatus,
    pub message: Option<String>,
}

#[async_trait]
pub trait CallbackService: Send + Sync {
    async fn trigger_callback(&self, callback_url: &str, data: &IssuerResponseData) -> Result<()>;
}
