use std::time::Duration;

use crate::{EventSenderEngine, EventUploader, ReqwestTransport, Result};

/// Region hosting the events collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Region {
    /// `https://events.eu.confidence.dev`
    #[default]
    Eu,
    /// `https://events.us.confidence.dev`
    Us,
}

impl Region {
    /// Base URL of the collector in this region.
    pub fn base_url(self) -> &'static str {
        match self {
            Region::Eu => "https://events.eu.confidence.dev",
            Region::Us => "https://events.us.confidence.dev",
        }
    }
}

/// Configuration for [`EventUploader`] and [`EventSenderEngine`].
///
/// # Examples
/// ```
/// # use std::time::Duration;
/// # use confidence_events::{EventsConfig, Region};
/// let config = EventsConfig::from_client_secret("client-secret")
///     .region(Region::Us)
///     .batch_size(50)
///     .flush_interval(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct EventsConfig {
    pub(crate) client_secret: String,
    pub(crate) base_url: String,
    pub(crate) batch_size: usize,
    pub(crate) max_queue_size: usize,
    pub(crate) flush_interval: Duration,
    pub(crate) request_timeout: Duration,
}

impl EventsConfig {
    /// Default value for [`EventsConfig::batch_size`].
    pub const DEFAULT_BATCH_SIZE: usize = 10;
    /// Smallest accepted batch size.
    pub const MIN_BATCH_SIZE: usize = 1;
    /// Largest accepted batch size.
    pub const MAX_BATCH_SIZE: usize = 1_000;
    /// Default value for [`EventsConfig::max_queue_size`].
    pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1_000;
    /// Default value for [`EventsConfig::flush_interval`].
    pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
    /// Default value for [`EventsConfig::request_timeout`].
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a default configuration using the specified client secret.
    ///
    /// ```
    /// # use confidence_events::EventsConfig;
    /// EventsConfig::from_client_secret("client-secret");
    /// ```
    pub fn from_client_secret(client_secret: impl Into<String>) -> Self {
        EventsConfig {
            client_secret: client_secret.into(),
            base_url: Region::default().base_url().to_owned(),
            batch_size: EventsConfig::DEFAULT_BATCH_SIZE,
            max_queue_size: EventsConfig::DEFAULT_MAX_QUEUE_SIZE,
            flush_interval: EventsConfig::DEFAULT_FLUSH_INTERVAL,
            request_timeout: EventsConfig::DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Send events to the collector in `region`.
    pub fn region(mut self, region: Region) -> Self {
        self.base_url = region.base_url().to_owned();
        self
    }

    /// Override base URL for API calls. Clients should use [`EventsConfig::region`] in most cases.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Maximum number of events per uploaded batch. Reaching it in the queue triggers a flush.
    ///
    /// Clamped to [`EventsConfig::MIN_BATCH_SIZE`]..=[`EventsConfig::MAX_BATCH_SIZE`].
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size =
            batch_size.clamp(EventsConfig::MIN_BATCH_SIZE, EventsConfig::MAX_BATCH_SIZE);
        self
    }

    /// Maximum number of events kept in memory while the collector is unreachable. Oldest events
    /// are dropped first. Never smaller than the batch size.
    pub fn max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Interval between periodic flushes. `Duration::ZERO` disables periodic flushing.
    pub fn flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Maximum time a single upload may take before it is abandoned and retried later. Bounds how
    /// long [`EventSenderEngine::flush`] and [`EventSenderEngine::shutdown`] can wait on a stalled
    /// collector.
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub(crate) fn effective_max_queue_size(&self) -> usize {
        self.max_queue_size.max(self.batch_size)
    }

    /// Create an [`EventUploader`] publishing to the configured collector.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidBaseUrl`](crate::Error::InvalidBaseUrl) if the base URL is invalid.
    /// - [`Error::Network`](crate::Error::Network) if the HTTP client cannot be initialized.
    pub fn to_uploader(&self) -> Result<EventUploader> {
        let transport = ReqwestTransport::with_timeout(self.request_timeout)?;
        EventUploader::new(&self.base_url, transport)
    }

    /// Start an [`EventSenderEngine`] on the current tokio runtime, uploading with reqwest.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidBaseUrl`](crate::Error::InvalidBaseUrl) if the base URL is invalid.
    /// - [`Error::MissingRuntime`](crate::Error::MissingRuntime) if called outside of a tokio
    ///   runtime.
    pub fn start_engine(self) -> Result<EventSenderEngine> {
        let uploader = self.to_uploader()?;
        EventSenderEngine::start(self, uploader)
    }
}
