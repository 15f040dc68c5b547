//! Per-session client settings.

use std::time::Duration;

use skirmish_proto::{DEFAULT_MAX_FRAME, PROTOCOL_VERSION, ParticipantId};

/// How long a correlated request may wait for its response before the
/// caller gets a timeout error.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a cached remote read stays fresh. Pushes overwrite cached
/// values regardless of age, so this only bounds staleness for state the
/// client has never been told about.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Identity and tuning for one client session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub participant: ParticipantId,
    pub display_name: String,
    pub client_version: String,
    pub request_timeout: Duration,
    pub cache_ttl: Duration,
    pub max_frame: usize,
    /// Serialized army roster uploaded when the host gathers companies.
    pub company_payload: Vec<u8>,
}

impl ClientConfig {
    pub fn new(participant: ParticipantId, display_name: impl Into<String>) -> Self {
        Self {
            participant,
            display_name: display_name.into(),
            client_version: PROTOCOL_VERSION.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            cache_ttl: DEFAULT_CACHE_TTL,
            max_frame: DEFAULT_MAX_FRAME,
            company_payload: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_client_version(mut self, version: impl Into<String>) -> Self {
        self.client_version = version.into();
        self
    }

    #[must_use]
    pub fn with_company_payload(mut self, payload: Vec<u8>) -> Self {
        self.company_payload = payload;
        self
    }
}
