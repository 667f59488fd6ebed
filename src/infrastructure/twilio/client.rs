//! Twilio REST client
//!
//! Form-encoded requests against the 2010-04-01 API with HTTP basic auth.
//! Requests are never retried here; failures are mapped to [`ProviderError`].

use crate::domain::provider::{
    OutboundCallRequest, PhoneNumberRecord, PlacedCall, ProviderError, TelephonyProvider,
    VoiceWebhook,
};
use crate::domain::shared::value_objects::CallSid;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const API_VERSION: &str = "2010-04-01";

/// Error body returned by the API on 4xx/5xx
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<i64>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallResource {
    sid: String,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PhoneNumberPage {
    #[serde(default)]
    incoming_phone_numbers: Vec<PhoneNumberResource>,
    next_page_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PhoneNumberResource {
    sid: String,
    phone_number: String,
    friendly_name: Option<String>,
    voice_url: Option<String>,
}

impl From<PhoneNumberResource> for PhoneNumberRecord {
    fn from(resource: PhoneNumberResource) -> Self {
        Self {
            sid: resource.sid,
            phone_number: resource.phone_number,
            friendly_name: resource.friendly_name,
            voice_url: resource.voice_url.filter(|url| !url.is_empty()),
        }
    }
}

pub struct TwilioClient {
    http: Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
}

impl TwilioClient {
    pub fn new(
        api_base: impl Into<String>,
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
        })
    }

    pub fn account_sid(&self) -> &str {
        &self.account_sid
    }

    fn account_url(&self, resource: &str) -> String {
        format!(
            "{}/{}/Accounts/{}/{}",
            self.api_base, API_VERSION, self.account_sid, resource
        )
    }

    async fn send_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<Response, ProviderError> {
        let response = self
            .http
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(form)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        check_status(response).await
    }

    async fn get(&self, url: &str) -> Result<Response, ProviderError> {
        let response = self
            .http
            .get(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        check_status(response).await
    }
}

/// Map a non-success response into a typed error
async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let parsed: Option<ApiErrorBody> = serde_json::from_str(&body).ok();
    let code = parsed.as_ref().and_then(|b| b.code);
    let message = parsed
        .and_then(|b| b.message)
        .unwrap_or_else(|| body.trim().to_string());

    warn!(
        "Twilio API error: HTTP {} code {:?}: {}",
        status.as_u16(),
        code,
        message
    );

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Unauthorized(message),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(message),
        _ => ProviderError::Rejected {
            status: status.as_u16(),
            code,
            message,
        },
    })
}

async fn parse_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ProviderError> {
    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

#[async_trait::async_trait]
impl TelephonyProvider for TwilioClient {
    async fn place_call(&self, request: &OutboundCallRequest) -> Result<PlacedCall, ProviderError> {
        let to = request.to.to_string();
        let from = request.from.to_string();
        info!("Placing call from {} to {}", from, to);

        let form = [
            ("To", to.as_str()),
            ("From", from.as_str()),
            ("Url", request.bootstrap_url.as_str()),
            ("Method", "POST"),
            ("StatusCallback", request.status_callback_url.as_str()),
            ("StatusCallbackMethod", "POST"),
        ];

        let response = self.send_form(&self.account_url("Calls.json"), &form).await?;
        let call: CallResource = parse_json(response).await?;
        let call_sid =
            CallSid::parse(&call.sid).map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        info!("Call placed: {} ({:?})", call_sid, call.status);
        Ok(PlacedCall {
            call_sid,
            status: call.status.unwrap_or_else(|| "queued".to_string()),
        })
    }

    async fn hangup_call(&self, call_sid: &CallSid) -> Result<(), ProviderError> {
        let url = self.account_url(&format!("Calls/{}.json", call_sid));
        let response = self.send_form(&url, &[("Status", "completed")]).await?;
        let call: CallResource = parse_json(response).await?;
        info!("Call {} hung up ({:?})", call.sid, call.status);
        Ok(())
    }

    async fn list_phone_numbers(&self) -> Result<Vec<PhoneNumberRecord>, ProviderError> {
        let mut numbers = Vec::new();
        let mut next = Some(self.account_url("IncomingPhoneNumbers.json?PageSize=100"));

        while let Some(url) = next.take() {
            debug!("Listing phone numbers: {}", url);
            let page: PhoneNumberPage = parse_json(self.get(&url).await?).await?;
            numbers.extend(page.incoming_phone_numbers.into_iter().map(PhoneNumberRecord::from));
            next = page
                .next_page_uri
                .filter(|uri| !uri.is_empty())
                .map(|uri| format!("{}{}", self.api_base, uri));
        }

        Ok(numbers)
    }

    async fn configure_voice_webhook(
        &self,
        phone_sid: &str,
        webhook: &VoiceWebhook,
    ) -> Result<PhoneNumberRecord, ProviderError> {
        let mut form = vec![
            ("VoiceUrl", webhook.voice_url.as_str()),
            ("VoiceMethod", "POST"),
            ("StatusCallback", webhook.status_callback_url.as_str()),
            ("StatusCallbackMethod", "POST"),
        ];
        if let Some(fallback) = &webhook.fallback_url {
            form.push(("VoiceFallbackUrl", fallback.as_str()));
            form.push(("VoiceFallbackMethod", "POST"));
        }

        let url = self.account_url(&format!("IncomingPhoneNumbers/{}.json", phone_sid));
        let response = match self.send_form(&url, &form).await {
            Err(ProviderError::Rejected { status: 404, .. }) => {
                return Err(ProviderError::NumberNotFound(phone_sid.to_string()))
            }
            other => other?,
        };

        let record: PhoneNumberRecord = parse_json::<PhoneNumberResource>(response).await?.into();
        info!(
            "Voice webhook for {} ({}) set to {}",
            record.phone_number, record.sid, webhook.voice_url
        );
        Ok(record)
    }
}
