//! Public endpoint of this process
//!
//! The tunnel hands us a public base URL. Every reader takes an immutable,
//! versioned snapshot; rotation swaps the snapshot atomically and notifies
//! subscribers (the webhook supervisor re-registers on every rotation).

use crate::domain::shared::error::DomainError;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use url::Url;

/// Path the provider posts call notifications to
pub const BOOTSTRAP_PATH: &str = "/";
/// Path of the media stream WebSocket
pub const MEDIA_STREAM_PATH: &str = "/ws";
/// Path of the call status callback
pub const STATUS_CALLBACK_PATH: &str = "/status";

/// One published value of the public endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointSnapshot {
    base: Url,
    version: u64,
}

impl EndpointSnapshot {
    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Host (and port, when non-default) the provider addresses
    pub fn authority(&self) -> String {
        let host = self.base.host_str().unwrap_or_default();
        match self.base.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Webhook URL for call notifications
    pub fn bootstrap_url(&self) -> String {
        self.join(BOOTSTRAP_PATH, false)
    }

    /// Status callback URL
    pub fn status_url(&self) -> String {
        self.join(STATUS_CALLBACK_PATH, false)
    }

    /// WebSocket URL the provider opens the media stream to
    pub fn stream_url(&self) -> String {
        self.join(MEDIA_STREAM_PATH, true)
    }

    /// Public URL of an arbitrary local path, as the provider addressed it
    pub fn public_url(&self, path: &str) -> String {
        self.join(path, false)
    }

    fn join(&self, path: &str, websocket: bool) -> String {
        let scheme = match (self.base.scheme(), websocket) {
            ("https", true) => "wss",
            ("http", true) => "ws",
            (scheme, _) => scheme,
        };
        format!("{}://{}{}", scheme, self.authority(), path)
    }
}

/// Normalize operator input into a public base URL
///
/// Accepts a bare host (`abc.ngrok.io`), which is assumed to be HTTPS, or a
/// full `http(s)://` URL. Paths, queries and fragments are dropped.
pub fn normalize_public_url(input: &str) -> Result<Url, DomainError> {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(DomainError::ValidationError(
            "public endpoint cannot be empty".to_string(),
        ));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let mut url = Url::parse(&candidate).map_err(|e| {
        DomainError::ValidationError(format!("invalid public endpoint {:?}: {}", input, e))
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(DomainError::ValidationError(format!(
            "public endpoint {:?} must use http or https",
            input
        )));
    }
    if url.host_str().is_none() {
        return Err(DomainError::ValidationError(format!(
            "public endpoint {:?} has no host",
            input
        )));
    }

    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Whether the webhook at the provider points at the current snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "version", rename_all = "snake_case")]
pub enum RegistrationState {
    /// Webhook is configured outside this process
    Unmanaged,
    /// Nothing registered yet
    Pending,
    /// Registered for the given snapshot version
    Registered(u64),
}

/// Process-wide public endpoint, cheap to clone
#[derive(Clone)]
pub struct PublicEndpoint {
    tx: Arc<watch::Sender<Option<Arc<EndpointSnapshot>>>>,
    /// 0 = unmanaged, u64::MAX = pending, otherwise the registered version
    registered: Arc<AtomicU64>,
}

const UNMANAGED: u64 = 0;
const PENDING: u64 = u64::MAX;

impl PublicEndpoint {
    /// Endpoint whose provider webhook is configured by someone else
    pub fn unmanaged() -> Self {
        Self::with_state(UNMANAGED)
    }

    /// Endpoint whose webhook this process registers; stale until it does
    pub fn managed() -> Self {
        Self::with_state(PENDING)
    }

    fn with_state(state: u64) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            registered: Arc::new(AtomicU64::new(state)),
        }
    }

    /// Current snapshot, if the tunnel has produced one
    pub fn current(&self) -> Option<Arc<EndpointSnapshot>> {
        self.tx.borrow().clone()
    }

    /// Publish a new base URL; returns the resulting snapshot
    ///
    /// Publishing the URL that is already current is a no-op and keeps the
    /// version.
    pub fn rotate(&self, base: Url) -> Arc<EndpointSnapshot> {
        let mut published = Arc::new(EndpointSnapshot {
            base: base.clone(),
            version: 1,
        });
        self.tx.send_if_modified(|current| {
            if let Some(existing) = current {
                if existing.base == base {
                    published = existing.clone();
                    return false;
                }
            }
            let version = current.as_ref().map(|s| s.version + 1).unwrap_or(1);
            published = Arc::new(EndpointSnapshot {
                base: base.clone(),
                version,
            });
            *current = Some(published.clone());
            true
        });
        published
    }

    /// Subscribe to rotations
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<EndpointSnapshot>>> {
        self.tx.subscribe()
    }

    /// Record that the provider webhook now points at `version`
    pub fn mark_registered(&self, version: u64) {
        if self.registered.load(Ordering::Acquire) != UNMANAGED {
            self.registered.store(version, Ordering::Release);
        }
    }

    pub fn registration(&self) -> RegistrationState {
        match self.registered.load(Ordering::Acquire) {
            UNMANAGED => RegistrationState::Unmanaged,
            PENDING => RegistrationState::Pending,
            version => RegistrationState::Registered(version),
        }
    }

    /// Snapshot that is safe to hand to the provider
    ///
    /// Fails when no endpoint is bound, or when this process manages the
    /// webhook and the provider still points at an older snapshot.
    pub fn routable(&self) -> Result<Arc<EndpointSnapshot>, DomainError> {
        let snapshot = self.current().ok_or_else(|| {
            DomainError::NotFound("no public endpoint is bound".to_string())
        })?;

        match self.registration() {
            RegistrationState::Unmanaged => Ok(snapshot),
            RegistrationState::Registered(v) if v == snapshot.version => Ok(snapshot),
            RegistrationState::Registered(v) => Err(DomainError::Conflict(format!(
                "webhook registered for endpoint v{} but current endpoint is v{} ({})",
                v, snapshot.version, snapshot.base
            ))),
            RegistrationState::Pending => Err(DomainError::Conflict(format!(
                "webhook not yet registered for endpoint v{} ({})",
                snapshot.version, snapshot.base
            ))),
        }
    }
}

impl std::fmt::Debug for PublicEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicEndpoint")
            .field("current", &self.current())
            .field("registration", &self.registration())
            .finish()
    }
}
