//! Provider webhook registration
//!
//! Points a phone number's "a call comes in" webhook (and optionally the
//! "primary handler fails" fallback) at the current public endpoint, with
//! the status callback alongside so hangups reach us.

use crate::domain::endpoint::EndpointSnapshot;
use crate::domain::provider::{PhoneNumberRecord, ProviderError, TelephonyProvider, VoiceWebhook};
use crate::domain::shared::value_objects::PhoneNumber;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

/// Which phone number to configure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhoneNumberTarget {
    /// IncomingPhoneNumber SID (`PN...`)
    Sid(String),
    /// Resolved to a SID through the account's number list
    Number(PhoneNumber),
}

pub struct WebhookRegistrar {
    provider: Arc<dyn TelephonyProvider>,
    target: PhoneNumberTarget,
    set_fallback: bool,
    resolved_sid: OnceCell<String>,
}

impl WebhookRegistrar {
    pub fn new(
        provider: Arc<dyn TelephonyProvider>,
        target: PhoneNumberTarget,
        set_fallback: bool,
    ) -> Self {
        Self {
            provider,
            target,
            set_fallback,
            resolved_sid: OnceCell::new(),
        }
    }

    /// SID of the target number, looked up once
    pub async fn phone_sid(&self) -> Result<&str, ProviderError> {
        let sid = self
            .resolved_sid
            .get_or_try_init(|| async {
                match &self.target {
                    PhoneNumberTarget::Sid(sid) => Ok(sid.clone()),
                    PhoneNumberTarget::Number(number) => {
                        let numbers = self.provider.list_phone_numbers().await?;
                        numbers
                            .into_iter()
                            .find(|record| record.phone_number == number.as_str())
                            .map(|record| record.sid)
                            .ok_or_else(|| ProviderError::NumberNotFound(number.to_string()))
                    }
                }
            })
            .await?;
        Ok(sid.as_str())
    }

    /// Point the webhook at `snapshot`
    pub async fn register(
        &self,
        snapshot: &EndpointSnapshot,
    ) -> Result<PhoneNumberRecord, ProviderError> {
        let phone_sid = self.phone_sid().await?;
        let voice_url = snapshot.bootstrap_url();
        let webhook = VoiceWebhook {
            fallback_url: self.set_fallback.then(|| voice_url.clone()),
            voice_url,
            status_callback_url: snapshot.status_url(),
        };

        let record = self
            .provider
            .configure_voice_webhook(phone_sid, &webhook)
            .await?;

        info!(
            "A call comes in -> POST {} (number {}, endpoint v{})",
            webhook.voice_url,
            record.phone_number,
            snapshot.version()
        );
        if let Some(fallback) = &webhook.fallback_url {
            info!("Primary handler fails -> POST {}", fallback);
        }

        Ok(record)
    }
}
