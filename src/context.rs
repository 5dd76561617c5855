//! Client configuration

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cnc::{default_aeron_dir, CNC_FILE};
use crate::error::SeuratError;
use crate::idle::IdleStrategy;
use crate::image::Image;

/// Callback for errors surfaced by the conductor.
pub type ErrorHandler = Arc<dyn Fn(&SeuratError) + Send + Sync>;
/// Callback when an image becomes available on a subscription.
pub type AvailableImageHandler = Arc<dyn Fn(&Image) + Send + Sync>;
/// Callback when an image goes away.
pub type UnavailableImageHandler = Arc<dyn Fn(&Image) + Send + Sync>;
/// Callback `(channel, stream_id, session_id, correlation_id)` when a
/// publication is ready.
pub type NewPublicationHandler = Arc<dyn Fn(&str, i32, i32, i64) + Send + Sync>;
/// Callback `(channel, stream_id, correlation_id)` when a subscription is
/// ready.
pub type NewSubscriptionHandler = Arc<dyn Fn(&str, i32, i64) + Send + Sync>;

/// Settings for connecting an [`Aeron`](crate::client::Aeron) instance to a
/// media driver. Built fluently, consumed by `Aeron::connect`.
#[derive(Clone)]
pub struct Context {
    aeron_dir: PathBuf,
    media_driver_timeout: Duration,
    resource_linger_timeout: Duration,
    publication_connection_timeout: Duration,
    keepalive_interval: Duration,
    idle_strategy: IdleStrategy,
    error_handler: ErrorHandler,
    available_image_handler: Option<AvailableImageHandler>,
    unavailable_image_handler: Option<UnavailableImageHandler>,
    new_publication_handler: Option<NewPublicationHandler>,
    new_subscription_handler: Option<NewSubscriptionHandler>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        let aeron_dir = std::env::var_os("AERON_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_aeron_dir);

        Self {
            aeron_dir,
            media_driver_timeout: Duration::from_secs(10),
            resource_linger_timeout: Duration::from_secs(5),
            publication_connection_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_millis(500),
            idle_strategy: IdleStrategy::default(),
            error_handler: Arc::new(|error| log::error!("client error: {}", error)),
            available_image_handler: None,
            unavailable_image_handler: None,
            new_publication_handler: None,
            new_subscription_handler: None,
        }
    }

    /// Directory holding the driver's CnC file.
    pub fn with_aeron_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.aeron_dir = dir.as_ref().to_path_buf();
        self
    }

    /// How long without a driver heartbeat before the client declares the
    /// driver dead.
    pub fn with_media_driver_timeout(mut self, timeout: Duration) -> Self {
        self.media_driver_timeout = timeout;
        self
    }

    /// How long released log-buffer mappings are retained for late pollers.
    pub fn with_resource_linger_timeout(mut self, timeout: Duration) -> Self {
        self.resource_linger_timeout = timeout;
        self
    }

    pub fn with_publication_connection_timeout(mut self, timeout: Duration) -> Self {
        self.publication_connection_timeout = timeout;
        self
    }

    /// Cadence of `CLIENT_KEEPALIVE` commands and driver liveness checks.
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Idle strategy for the conductor thread and blocking waits.
    pub fn with_idle_strategy(mut self, strategy: IdleStrategy) -> Self {
        self.idle_strategy = strategy;
        self
    }

    pub fn with_error_handler(
        mut self,
        handler: impl Fn(&SeuratError) + Send + Sync + 'static,
    ) -> Self {
        self.error_handler = Arc::new(handler);
        self
    }

    pub fn with_available_image_handler(
        mut self,
        handler: impl Fn(&Image) + Send + Sync + 'static,
    ) -> Self {
        self.available_image_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_unavailable_image_handler(
        mut self,
        handler: impl Fn(&Image) + Send + Sync + 'static,
    ) -> Self {
        self.unavailable_image_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_new_publication_handler(
        mut self,
        handler: impl Fn(&str, i32, i32, i64) + Send + Sync + 'static,
    ) -> Self {
        self.new_publication_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_new_subscription_handler(
        mut self,
        handler: impl Fn(&str, i32, i64) + Send + Sync + 'static,
    ) -> Self {
        self.new_subscription_handler = Some(Arc::new(handler));
        self
    }

    pub fn aeron_dir(&self) -> &Path {
        &self.aeron_dir
    }

    /// Full path of the CnC file this context points at.
    pub fn cnc_file_name(&self) -> PathBuf {
        self.aeron_dir.join(CNC_FILE)
    }

    pub fn media_driver_timeout(&self) -> Duration {
        self.media_driver_timeout
    }

    pub fn resource_linger_timeout(&self) -> Duration {
        self.resource_linger_timeout
    }

    pub fn publication_connection_timeout(&self) -> Duration {
        self.publication_connection_timeout
    }

    pub fn keepalive_interval(&self) -> Duration {
        self.keepalive_interval
    }

    pub fn idle_strategy(&self) -> IdleStrategy {
        self.idle_strategy
    }

    pub(crate) fn error_handler(&self) -> ErrorHandler {
        Arc::clone(&self.error_handler)
    }

    pub(crate) fn available_image_handler(&self) -> Option<AvailableImageHandler> {
        self.available_image_handler.clone()
    }

    pub(crate) fn unavailable_image_handler(&self) -> Option<UnavailableImageHandler> {
        self.unavailable_image_handler.clone()
    }

    pub(crate) fn new_publication_handler(&self) -> Option<NewPublicationHandler> {
        self.new_publication_handler.clone()
    }

    pub(crate) fn new_subscription_handler(&self) -> Option<NewSubscriptionHandler> {
        self.new_subscription_handler.clone()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("aeron_dir", &self.aeron_dir)
            .field("media_driver_timeout", &self.media_driver_timeout)
            .field("resource_linger_timeout", &self.resource_linger_timeout)
            .field(
                "publication_connection_timeout",
                &self.publication_connection_timeout,
            )
            .field("keepalive_interval", &self.keepalive_interval)
            .field("idle_strategy", &self.idle_strategy)
            .finish()
    }
}
