use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::models::NotificationTypeId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailParameter {
    pub key: String,
    pub value: String,
}

impl MailParameter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Portal notification and mail delivery
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn add_notification(
        &self,
        content: &str,
        recipient: Uuid,
        category: NotificationTypeId,
    ) -> Result<()>;

    async fn trigger_mail(
        &self,
        template: &str,
        recipient: Uuid,
        parameters: &[MailParameter],
    ) -> Result<()>;
}
