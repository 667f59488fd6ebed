//! Telephony provider port
//!
//! The REST operations this service needs from the provider: placing and
//! hanging up calls, and pointing a phone number's voice webhook at us. None of them are
//! retried automatically; a failed call placement is surfaced to the caller.

use crate::domain::shared::value_objects::{CallSid, PhoneNumber};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Provider failures, typed so callers can tell them apart
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider rejected the request (HTTP {status}, code {code:?}): {message}")]
    Rejected {
        status: u16,
        code: Option<i64>,
        message: String,
    },

    #[error("provider rejected the credentials: {0}")]
    Unauthorized(String),

    #[error("provider is rate limiting requests: {0}")]
    RateLimited(String),

    #[error("phone number not found on the account: {0}")]
    NumberNotFound(String),

    #[error("provider request failed: {0}")]
    Transport(String),

    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),
}

/// Request to place an outbound call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCallRequest {
    pub to: PhoneNumber,
    pub from: PhoneNumber,
    /// Call-control document endpoint the provider fetches once answered
    pub bootstrap_url: String,
    pub status_callback_url: String,
}

/// Provider acknowledgment of a placed call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedCall {
    pub call_sid: CallSid,
    pub status: String,
}

/// Phone number resource on the provider account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneNumberRecord {
    pub sid: String,
    pub phone_number: String,
    pub friendly_name: Option<String>,
    pub voice_url: Option<String>,
}

/// Voice webhook settings pushed to a phone number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceWebhook {
    pub voice_url: String,
    /// Same URL as the primary handler when set
    pub fallback_url: Option<String>,
    pub status_callback_url: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TelephonyProvider: Send + Sync {
    /// Ask the provider to place a call
    async fn place_call(&self, request: &OutboundCallRequest) -> Result<PlacedCall, ProviderError>;

    /// Hang up a call that is in progress
    async fn hangup_call(&self, call_sid: &CallSid) -> Result<(), ProviderError>;

    /// List the account's incoming phone numbers
    async fn list_phone_numbers(&self) -> Result<Vec<PhoneNumberRecord>, ProviderError>;

    /// Point a phone number's voice webhook at `webhook`
    async fn configure_voice_webhook(
        &self,
        phone_sid: &str,
        webhook: &VoiceWebhook,
    ) -> Result<PhoneNumberRecord, ProviderError>;
}
