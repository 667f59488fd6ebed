//! Shared fixtures for the integration tests

#![allow(dead_code)]

use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use voxbridge::application::call::{CallService, CallServiceConfig};
use voxbridge::application::events::EventBroadcaster;
use voxbridge::config::Settings;
use voxbridge::domain::endpoint::{normalize_public_url, PublicEndpoint};
use voxbridge::domain::provider::{
    OutboundCallRequest, PhoneNumberRecord, PlacedCall, ProviderError, TelephonyProvider,
    VoiceWebhook,
};
use voxbridge::domain::shared::value_objects::CallSid;
use voxbridge::infrastructure::pipeline::EchoPipeline;
use voxbridge::interface::api::{build_router, AppState};

pub const PUBLIC_HOST: &str = "abc.ngrok.io";

/// Provider double that records every request it gets
#[derive(Default)]
pub struct RecordingProvider {
    pub placed: Mutex<Vec<OutboundCallRequest>>,
    pub webhooks: Mutex<Vec<(String, VoiceWebhook)>>,
    pub hangups: Mutex<Vec<CallSid>>,
}

impl RecordingProvider {
    pub fn placed_count(&self) -> usize {
        self.placed.lock().unwrap().len()
    }

    pub fn hangups(&self) -> Vec<CallSid> {
        self.hangups.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl TelephonyProvider for RecordingProvider {
    async fn place_call(&self, request: &OutboundCallRequest) -> Result<PlacedCall, ProviderError> {
        let mut placed = self.placed.lock().unwrap();
        placed.push(request.clone());
        Ok(PlacedCall {
            call_sid: CallSid::parse(&format!("CA{:032}", placed.len())).unwrap(),
            status: "queued".to_string(),
        })
    }

    async fn hangup_call(&self, call_sid: &CallSid) -> Result<(), ProviderError> {
        self.hangups.lock().unwrap().push(call_sid.clone());
        Ok(())
    }

    async fn list_phone_numbers(&self) -> Result<Vec<PhoneNumberRecord>, ProviderError> {
        Ok(Vec::new())
    }

    async fn configure_voice_webhook(
        &self,
        phone_sid: &str,
        webhook: &VoiceWebhook,
    ) -> Result<PhoneNumberRecord, ProviderError> {
        self.webhooks
            .lock()
            .unwrap()
            .push((phone_sid.to_string(), webhook.clone()));
        Ok(PhoneNumberRecord {
            sid: phone_sid.to_string(),
            phone_number: "+16025550100".to_string(),
            friendly_name: None,
            voice_url: Some(webhook.voice_url.clone()),
        })
    }
}

pub struct TestApp {
    pub calls: Arc<CallService>,
    pub provider: Arc<RecordingProvider>,
    pub router: Router,
}

pub fn test_app() -> TestApp {
    test_app_with(Settings::default(), PublicEndpoint::unmanaged())
}

/// Service bound to `https://abc.ngrok.io` with the echo pipeline
pub fn test_app_with(settings: Settings, endpoint: PublicEndpoint) -> TestApp {
    let snapshot = endpoint.rotate(normalize_public_url(PUBLIC_HOST).unwrap());
    endpoint.mark_registered(snapshot.version());

    let provider = Arc::new(RecordingProvider::default());
    let calls = Arc::new(CallService::new(
        endpoint,
        provider.clone(),
        Arc::new(EchoPipeline::new()),
        EventBroadcaster::default(),
        CallServiceConfig::from(&settings),
    ));
    let state = AppState {
        calls: calls.clone(),
        settings: Arc::new(settings),
    };
    let router = build_router(state, PrometheusBuilder::new().build_recorder().handle());

    TestApp {
        calls,
        provider,
        router,
    }
}

/// Serve `router` on an ephemeral local port
pub async fn spawn_server(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Form-encode provider webhook fields
pub fn form(fields: &[(&str, &str)]) -> String {
    serde_urlencoded::to_string(fields).unwrap()
}
