//! Client conductor: command/response correlation, liveness, image lifecycle
//!
//! One conductor thread per client drives the duty cycle: drain driver
//! events, send keepalives, expire lingering log mappings, and watch driver
//! liveness. User threads enqueue commands through the proxy and spin on the
//! non-blocking `find_*` probes; all registration state lives behind one
//! mutex and user callbacks fire outside it.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::broadcast::CopyReceiver;
use crate::buffer::AtomicBuffer;
use crate::channel::validate_channel;
use crate::command::{
    self, ClientTimeout, CounterUpdate, ErrorResponse, ImageMessage, ImageReady,
    OperationSucceeded, PublicationReady, SubscriptionReady,
};
use crate::context::{
    AvailableImageHandler, Context, ErrorHandler, NewPublicationHandler, NewSubscriptionHandler,
    UnavailableImageHandler,
};
use crate::counters::{CountersReader, Position};
use crate::driver_proxy::DriverProxy;
use crate::error::{Result, SeuratError};
use crate::exclusive_publication::ExclusivePublication;
use crate::idle::{IdleStrategy, Idler};
use crate::image::Image;
use crate::logbuffer::LogBuffers;
use crate::memory::MappedFile;
use crate::publication::Publication;
use crate::subscription::Subscription;

#[derive(Debug)]
enum PublicationState {
    Awaiting,
    Ready(Arc<Publication>),
    ReadyExclusive(Option<Box<ExclusivePublication>>),
    Errored { code: i32, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PublicationKind {
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct PublicationEntry {
    channel: String,
    stream_id: i32,
    kind: PublicationKind,
    state: PublicationState,
    registration_id: i64,
    log_buffers: Option<Arc<LogBuffers>>,
}

#[derive(Debug)]
enum SubscriptionState {
    Awaiting,
    Ready(Arc<Subscription>),
    Errored { code: i32, message: String },
}

#[derive(Debug)]
struct SubscriptionEntry {
    channel: String,
    stream_id: i32,
    state: SubscriptionState,
}

#[derive(Debug)]
enum OperationState {
    Awaiting,
    Done,
    Errored { code: i32, message: String },
}

#[derive(Debug)]
struct LingeringResource {
    deadline: Instant,
    _log: Arc<LogBuffers>,
}

#[derive(Debug, Default)]
struct ConductorState {
    publications: HashMap<i64, PublicationEntry>,
    publication_aliases: HashMap<i64, i64>,
    subscriptions: HashMap<i64, SubscriptionEntry>,
    operations: HashMap<i64, OperationState>,
    counters: HashMap<i64, i32>,
    lingering: Vec<LingeringResource>,
}

/// User callbacks collected under the state lock, fired after it is
/// released so handlers may call back into the client.
enum Callback {
    NewPublication {
        channel: String,
        stream_id: i32,
        session_id: i32,
        correlation_id: i64,
    },
    NewSubscription {
        channel: String,
        stream_id: i32,
        correlation_id: i64,
    },
    AvailableImage(Arc<Image>),
    UnavailableImage(Arc<Image>),
}

/// The per-client state machine between user threads and the media driver.
pub struct ClientConductor {
    proxy: Arc<DriverProxy>,
    _cnc: Arc<MappedFile>,
    counters_metadata: AtomicBuffer,
    counters_values: AtomicBuffer,
    state: Mutex<ConductorState>,
    running: AtomicBool,
    client_liveness_timeout_ns: i64,
    driver_timeout: Duration,
    keepalive_interval: Duration,
    resource_linger_timeout: Duration,
    idle_strategy: IdleStrategy,
    error_handler: ErrorHandler,
    available_image_handler: Option<AvailableImageHandler>,
    unavailable_image_handler: Option<UnavailableImageHandler>,
    new_publication_handler: Option<NewPublicationHandler>,
    new_subscription_handler: Option<NewSubscriptionHandler>,
}

impl ClientConductor {
    pub(crate) fn new(
        proxy: Arc<DriverProxy>,
        context: &Context,
        cnc: Arc<MappedFile>,
        counters_metadata: AtomicBuffer,
        counters_values: AtomicBuffer,
        client_liveness_timeout_ns: i64,
    ) -> Self {
        Self {
            proxy,
            _cnc: cnc,
            counters_metadata,
            counters_values,
            state: Mutex::new(ConductorState::default()),
            running: AtomicBool::new(true),
            client_liveness_timeout_ns,
            driver_timeout: context.media_driver_timeout(),
            keepalive_interval: context.keepalive_interval(),
            resource_linger_timeout: context.resource_linger_timeout(),
            idle_strategy: context.idle_strategy(),
            error_handler: context.error_handler(),
            available_image_handler: context.available_image_handler(),
            unavailable_image_handler: context.unavailable_image_handler(),
            new_publication_handler: context.new_publication_handler(),
            new_subscription_handler: context.new_subscription_handler(),
        }
    }

    pub fn client_id(&self) -> i64 {
        self.proxy.client_id()
    }

    /// Allocate the next driver-wide correlation id.
    pub fn proxy_next_correlation_id(&self) -> i64 {
        self.proxy.next_correlation_id()
    }

    /// Liveness timeout the driver announced for clients, in nanoseconds.
    pub fn client_liveness_timeout_ns(&self) -> i64 {
        self.client_liveness_timeout_ns
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn counter_reader(&self) -> CountersReader {
        CountersReader::new(self.counters_metadata, self.counters_values)
    }

    /// Counter id announced for a correlation id, if any.
    pub fn find_counter_id(&self, correlation_id: i64) -> Option<i32> {
        self.lock_state().counters.get(&correlation_id).copied()
    }

    // ---- conductor thread ------------------------------------------------

    /// The conductor duty cycle; runs on its own thread until the client
    /// closes or a fatal condition fires.
    pub(crate) fn run(self: Arc<Self>, mut copy_receiver: CopyReceiver) {
        let mut idler = Idler::new(self.idle_strategy);
        let mut last_keepalive = Instant::now() - self.keepalive_interval;
        let mut lapped_baseline = copy_receiver.lapped_count();

        while self.running.load(Ordering::Acquire) {
            let mut work = self.service_events(&mut copy_receiver);

            let lapped = copy_receiver.lapped_count();
            if lapped != lapped_baseline {
                // Driver events were missed; client state is unknowable.
                self.terminate(SeuratError::EventStreamLost { lapped });
                break;
            }

            work += self.on_heartbeat_check_timeouts(&mut last_keepalive);
            idler.idle(work);
        }
    }

    fn service_events(self: &Arc<Self>, copy_receiver: &mut CopyReceiver) -> usize {
        let mut callbacks = Vec::new();
        let this = Arc::clone(self);
        let count = copy_receiver.receive(&mut |msg_type_id, buffer, offset, length| {
            if let Err(error) = this.on_event(msg_type_id, buffer, offset, length, &mut callbacks)
            {
                (this.error_handler)(&error);
            }
        });

        for callback in callbacks {
            self.fire(callback);
        }
        count
    }

    /// Fire a user callback, isolating panics from the duty cycle.
    fn fire(&self, callback: Callback) {
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| match callback {
            Callback::NewPublication {
                channel,
                stream_id,
                session_id,
                correlation_id,
            } => {
                if let Some(handler) = &self.new_publication_handler {
                    handler(&channel, stream_id, session_id, correlation_id);
                }
            }
            Callback::NewSubscription {
                channel,
                stream_id,
                correlation_id,
            } => {
                if let Some(handler) = &self.new_subscription_handler {
                    handler(&channel, stream_id, correlation_id);
                }
            }
            Callback::AvailableImage(image) => {
                if let Some(handler) = &self.available_image_handler {
                    handler(&image);
                }
            }
            Callback::UnavailableImage(image) => {
                if let Some(handler) = &self.unavailable_image_handler {
                    handler(&image);
                }
            }
        }));

        if result.is_err() {
            (self.error_handler)(&SeuratError::invalid_parameter(
                "handler",
                "user handler panicked",
            ));
        }
    }

    fn on_event(
        self: &Arc<Self>,
        msg_type_id: i32,
        buffer: &AtomicBuffer,
        offset: usize,
        _length: usize,
        callbacks: &mut Vec<Callback>,
    ) -> Result<()> {
        match msg_type_id {
            command::ON_PUBLICATION_READY => {
                self.on_publication_ready(PublicationReady::wrap(*buffer, offset), false, callbacks)
            }
            command::ON_EXCLUSIVE_PUBLICATION_READY => {
                self.on_publication_ready(PublicationReady::wrap(*buffer, offset), true, callbacks)
            }
            command::ON_SUBSCRIPTION_READY => {
                self.on_subscription_ready(SubscriptionReady::wrap(*buffer, offset), callbacks)
            }
            command::ON_AVAILABLE_IMAGE => {
                self.on_available_image(ImageReady::wrap(*buffer, offset), callbacks)
            }
            command::ON_UNAVAILABLE_IMAGE => {
                self.on_unavailable_image(ImageMessage::wrap(*buffer, offset), callbacks)
            }
            command::ON_OPERATION_SUCCESS => {
                self.on_operation_success(OperationSucceeded::wrap(*buffer, offset))
            }
            command::ON_ERROR => self.on_error_response(ErrorResponse::wrap(*buffer, offset)),
            command::ON_COUNTER_READY => {
                let event = CounterUpdate::wrap(*buffer, offset);
                self.lock_state()
                    .counters
                    .insert(event.correlation_id(), event.counter_id());
                Ok(())
            }
            command::ON_UNAVAILABLE_COUNTER => {
                let event = CounterUpdate::wrap(*buffer, offset);
                self.lock_state().counters.remove(&event.correlation_id());
                Ok(())
            }
            command::ON_CLIENT_TIMEOUT => {
                let event = ClientTimeout::wrap(*buffer, offset);
                if event.client_id() == self.client_id() {
                    self.terminate(SeuratError::ClientTimeout {
                        client_id: event.client_id(),
                    });
                }
                Ok(())
            }
            other => {
                log::debug!("ignoring unknown driver event type {:#x}", other);
                Ok(())
            }
        }
    }

    fn on_publication_ready(
        self: &Arc<Self>,
        event: PublicationReady,
        exclusive: bool,
        callbacks: &mut Vec<Callback>,
    ) -> Result<()> {
        let correlation_id = event.correlation_id();
        let log_file_name = event.log_file_name();
        let log_buffers = Arc::new(LogBuffers::map(&log_file_name)?);
        let position_limit = Position::new(self.counters_values, event.position_limit_counter_id());

        let mut guard = self.lock_state();
        let state = &mut *guard;
        let entry = match state.publications.get_mut(&correlation_id) {
            Some(entry) => entry,
            None => {
                log::debug!("publication ready for unknown correlation {}", correlation_id);
                return Ok(());
            }
        };
        if !matches!(entry.state, PublicationState::Awaiting) {
            return Ok(());
        }

        entry.registration_id = event.registration_id();
        entry.log_buffers = Some(Arc::clone(&log_buffers));

        if exclusive {
            let publication = ExclusivePublication::new(
                Arc::downgrade(self),
                log_buffers,
                entry.channel.clone(),
                entry.stream_id,
                event.session_id(),
                correlation_id,
                event.registration_id(),
                position_limit,
                event.channel_status_counter_id(),
            );
            entry.state = PublicationState::ReadyExclusive(Some(Box::new(publication)));
        } else {
            let publication = Arc::new(Publication::new(
                Arc::downgrade(self),
                log_buffers,
                entry.channel.clone(),
                entry.stream_id,
                event.session_id(),
                correlation_id,
                event.registration_id(),
                position_limit,
                event.channel_status_counter_id(),
            ));
            entry.state = PublicationState::Ready(publication);
        }

        callbacks.push(Callback::NewPublication {
            channel: entry.channel.clone(),
            stream_id: entry.stream_id,
            session_id: event.session_id(),
            correlation_id,
        });
        state
            .publication_aliases
            .insert(event.registration_id(), correlation_id);
        Ok(())
    }

    fn on_subscription_ready(
        self: &Arc<Self>,
        event: SubscriptionReady,
        callbacks: &mut Vec<Callback>,
    ) -> Result<()> {
        let correlation_id = event.correlation_id();
        let mut state = self.lock_state();
        let entry = match state.subscriptions.get_mut(&correlation_id) {
            Some(entry) => entry,
            None => {
                log::debug!("subscription ready for unknown correlation {}", correlation_id);
                return Ok(());
            }
        };
        if !matches!(entry.state, SubscriptionState::Awaiting) {
            return Ok(());
        }

        let subscription = Arc::new(Subscription::new(
            Arc::downgrade(self),
            entry.channel.clone(),
            entry.stream_id,
            correlation_id,
            event.channel_status_counter_id(),
        ));
        entry.state = SubscriptionState::Ready(Arc::clone(&subscription));

        callbacks.push(Callback::NewSubscription {
            channel: entry.channel.clone(),
            stream_id: entry.stream_id,
            correlation_id,
        });
        Ok(())
    }

    fn on_available_image(
        self: &Arc<Self>,
        event: ImageReady,
        callbacks: &mut Vec<Callback>,
    ) -> Result<()> {
        let subscription = {
            let state = self.lock_state();
            match state
                .subscriptions
                .get(&event.subscription_registration_id())
            {
                Some(SubscriptionEntry {
                    state: SubscriptionState::Ready(subscription),
                    ..
                }) => Arc::clone(subscription),
                _ => {
                    log::debug!(
                        "image for unknown subscription {}",
                        event.subscription_registration_id()
                    );
                    return Ok(());
                }
            }
        };

        let log_buffers = Arc::new(LogBuffers::map(event.log_file_name())?);
        let subscriber_position =
            Position::new(self.counters_values, event.subscriber_position_id());
        let image = Arc::new(Image::new(
            event.session_id(),
            event.correlation_id(),
            event.subscription_registration_id(),
            event.source_identity(),
            log_buffers,
            subscriber_position,
        ));

        subscription.add_image(Arc::clone(&image));
        callbacks.push(Callback::AvailableImage(image));
        Ok(())
    }

    fn on_unavailable_image(
        self: &Arc<Self>,
        event: ImageMessage,
        callbacks: &mut Vec<Callback>,
    ) -> Result<()> {
        let subscription = {
            let state = self.lock_state();
            match state
                .subscriptions
                .get(&event.subscription_registration_id())
            {
                Some(SubscriptionEntry {
                    state: SubscriptionState::Ready(subscription),
                    ..
                }) => Arc::clone(subscription),
                _ => return Ok(()),
            }
        };

        if let Some(image) = subscription.remove_image(event.correlation_id()) {
            image.close();
            self.linger_log_buffers(image.log_buffers());
            callbacks.push(Callback::UnavailableImage(image));
        }
        Ok(())
    }

    fn on_operation_success(&self, event: OperationSucceeded) -> Result<()> {
        let mut state = self.lock_state();
        if let Some(op) = state.operations.get_mut(&event.correlation_id()) {
            *op = OperationState::Done;
        }
        Ok(())
    }

    fn on_error_response(&self, event: ErrorResponse) -> Result<()> {
        let correlation_id = event.offending_command_correlation_id();
        let code = event.error_code();
        let message = event.error_message();

        let mut state = self.lock_state();
        if let Some(entry) = state.publications.get_mut(&correlation_id) {
            entry.state = PublicationState::Errored { code, message };
        } else if let Some(entry) = state.subscriptions.get_mut(&correlation_id) {
            entry.state = SubscriptionState::Errored { code, message };
        } else if let Some(op) = state.operations.get_mut(&correlation_id) {
            *op = OperationState::Errored { code, message };
        } else {
            log::debug!(
                "error response for unknown correlation {}: {} ({})",
                correlation_id,
                message,
                code
            );
        }
        Ok(())
    }

    fn on_heartbeat_check_timeouts(&self, last_keepalive: &mut Instant) -> usize {
        let mut work = 0;

        if last_keepalive.elapsed() >= self.keepalive_interval {
            *last_keepalive = Instant::now();
            work += 1;

            let heartbeat_ms = self.proxy.time_of_last_driver_keepalive_ms();
            if heartbeat_ms > 0 {
                let age_ms = epoch_ms().saturating_sub(heartbeat_ms);
                if age_ms > self.driver_timeout.as_millis() as i64 {
                    self.terminate(SeuratError::driver_timeout(format!(
                        "no driver heartbeat for {} ms (timeout {} ms)",
                        age_ms,
                        self.driver_timeout.as_millis()
                    )));
                    return work;
                }
            }

            if let Err(error) = self.proxy.client_keepalive() {
                // Full ring is transient; the next cycle retries.
                log::warn!("failed to send keepalive: {}", error);
            }
        }

        work += self.expire_lingering_resources();
        work
    }

    fn expire_lingering_resources(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock_state();
        let before = state.lingering.len();
        state.lingering.retain(|resource| resource.deadline > now);
        before - state.lingering.len()
    }

    fn linger_log_buffers(&self, log: Arc<LogBuffers>) {
        let deadline = Instant::now() + self.resource_linger_timeout;
        self.lock_state().lingering.push(LingeringResource {
            deadline,
            _log: log,
        });
    }

    /// Fatal transition: report once, close every resource, stop the loop.
    fn terminate(&self, error: SeuratError) {
        if self.running.swap(false, Ordering::AcqRel) {
            (self.error_handler)(&error);
            self.force_close_resources();
        }
    }

    fn force_close_resources(&self) {
        let (publications, subscriptions) = {
            let mut state = self.lock_state();
            (
                state.publications.drain().collect::<Vec<_>>(),
                state.subscriptions.drain().collect::<Vec<_>>(),
            )
        };

        for (_, entry) in publications {
            match entry.state {
                PublicationState::Ready(publication) => publication.mark_closed(),
                PublicationState::ReadyExclusive(Some(publication)) => {
                    publication.mark_closed();
                }
                _ => {}
            }
        }
        for (_, entry) in subscriptions {
            if let SubscriptionState::Ready(subscription) = entry.state {
                subscription.mark_closed();
                for image in subscription.take_images() {
                    image.close();
                }
            }
        }
    }

    // ---- user-thread entry points ---------------------------------------

    /// Issue `ADD_PUBLICATION`; returns the registration (correlation) id.
    pub fn add_publication(&self, channel: &str, stream_id: i32) -> Result<i64> {
        self.ensure_open()?;
        validate_channel(channel)?;

        // Hold the state lock across the ring write so the response cannot
        // be serviced before the pending entry exists.
        let mut state = self.lock_state();
        let correlation_id = self.proxy.add_publication(channel, stream_id)?;
        state.publications.insert(
            correlation_id,
            PublicationEntry {
                channel: channel.to_string(),
                stream_id,
                kind: PublicationKind::Shared,
                state: PublicationState::Awaiting,
                registration_id: command::NULL_VALUE,
                log_buffers: None,
            },
        );
        Ok(correlation_id)
    }

    /// Issue `ADD_EXCLUSIVE_PUBLICATION`; returns the registration id.
    pub fn add_exclusive_publication(&self, channel: &str, stream_id: i32) -> Result<i64> {
        self.ensure_open()?;
        validate_channel(channel)?;

        let mut state = self.lock_state();
        let correlation_id = self.proxy.add_exclusive_publication(channel, stream_id)?;
        state.publications.insert(
            correlation_id,
            PublicationEntry {
                channel: channel.to_string(),
                stream_id,
                kind: PublicationKind::Exclusive,
                state: PublicationState::Awaiting,
                registration_id: command::NULL_VALUE,
                log_buffers: None,
            },
        );
        Ok(correlation_id)
    }

    /// Issue `ADD_SUBSCRIPTION`; returns the registration id.
    pub fn add_subscription(&self, channel: &str, stream_id: i32) -> Result<i64> {
        self.ensure_open()?;
        validate_channel(channel)?;

        let mut state = self.lock_state();
        let correlation_id = self.proxy.add_subscription(channel, stream_id)?;
        state.subscriptions.insert(
            correlation_id,
            SubscriptionEntry {
                channel: channel.to_string(),
                stream_id,
                state: SubscriptionState::Awaiting,
            },
        );
        Ok(correlation_id)
    }

    /// Non-blocking probe: `Ok(None)` while pending, the publication once
    /// ready, the driver's error if registration failed.
    pub fn find_publication(&self, registration_id: i64) -> Result<Option<Arc<Publication>>> {
        self.ensure_open()?;
        let state = self.lock_state();
        let key = resolve_key(&state, registration_id);
        match state.publications.get(&key) {
            None => Err(unknown_registration(registration_id)),
            Some(entry) => match &entry.state {
                PublicationState::Awaiting => Ok(None),
                PublicationState::Ready(publication) => Ok(Some(Arc::clone(publication))),
                PublicationState::ReadyExclusive(_) => Err(SeuratError::invalid_parameter(
                    "registrationId",
                    "registration is an exclusive publication",
                )),
                PublicationState::Errored { code, message } => {
                    Err(SeuratError::registration(*code, message.clone()))
                }
            },
        }
    }

    /// Non-blocking probe for an exclusive publication. Ownership moves to
    /// the caller on first success.
    pub fn find_exclusive_publication(
        &self,
        registration_id: i64,
    ) -> Result<Option<ExclusivePublication>> {
        self.ensure_open()?;
        let mut state = self.lock_state();
        let key = resolve_key(&state, registration_id);
        match state.publications.get_mut(&key) {
            None => Err(unknown_registration(registration_id)),
            Some(entry) => match &mut entry.state {
                PublicationState::Awaiting => Ok(None),
                PublicationState::ReadyExclusive(slot) => match slot.take() {
                    Some(publication) => Ok(Some(*publication)),
                    None => Err(SeuratError::invalid_parameter(
                        "registrationId",
                        "exclusive publication already retrieved",
                    )),
                },
                PublicationState::Ready(_) => Err(SeuratError::invalid_parameter(
                    "registrationId",
                    "registration is a shared publication",
                )),
                PublicationState::Errored { code, message } => {
                    Err(SeuratError::registration(*code, message.clone()))
                }
            },
        }
    }

    /// Non-blocking probe for a subscription.
    pub fn find_subscription(&self, registration_id: i64) -> Result<Option<Arc<Subscription>>> {
        self.ensure_open()?;
        let state = self.lock_state();
        match state.subscriptions.get(&registration_id) {
            None => Err(unknown_registration(registration_id)),
            Some(entry) => match &entry.state {
                SubscriptionState::Awaiting => Ok(None),
                SubscriptionState::Ready(subscription) => Ok(Some(Arc::clone(subscription))),
                SubscriptionState::Errored { code, message } => {
                    Err(SeuratError::registration(*code, message.clone()))
                }
            },
        }
    }

    pub fn await_publication(&self, registration_id: i64) -> Result<Arc<Publication>> {
        self.await_with_timeout(|| self.find_publication(registration_id))
    }

    pub fn await_exclusive_publication(
        &self,
        registration_id: i64,
    ) -> Result<ExclusivePublication> {
        self.await_with_timeout(|| self.find_exclusive_publication(registration_id))
    }

    pub fn await_subscription(&self, registration_id: i64) -> Result<Arc<Subscription>> {
        self.await_with_timeout(|| self.find_subscription(registration_id))
    }

    pub fn add_publication_destination(&self, registration_id: i64, channel: &str) -> Result<()> {
        validate_channel(channel)?;
        let correlation_id = {
            let mut state = self.lock_state();
            let correlation_id = self.proxy.add_destination(registration_id, channel)?;
            state
                .operations
                .insert(correlation_id, OperationState::Awaiting);
            correlation_id
        };
        self.await_operation(correlation_id)
    }

    pub fn remove_publication_destination(
        &self,
        registration_id: i64,
        channel: &str,
    ) -> Result<()> {
        validate_channel(channel)?;
        let correlation_id = {
            let mut state = self.lock_state();
            let correlation_id = self.proxy.remove_destination(registration_id, channel)?;
            state
                .operations
                .insert(correlation_id, OperationState::Awaiting);
            correlation_id
        };
        self.await_operation(correlation_id)
    }

    pub fn add_subscription_destination(&self, registration_id: i64, channel: &str) -> Result<()> {
        self.add_publication_destination(registration_id, channel)
    }

    pub fn remove_subscription_destination(
        &self,
        registration_id: i64,
        channel: &str,
    ) -> Result<()> {
        self.remove_publication_destination(registration_id, channel)
    }

    /// Remove a publication registration and linger its log mapping.
    pub(crate) fn release_publication(&self, correlation_id: i64) -> Result<()> {
        let entry = {
            let mut state = self.lock_state();
            let entry = state.publications.remove(&correlation_id);
            if let Some(entry) = &entry {
                if entry.registration_id != command::NULL_VALUE {
                    state.publication_aliases.remove(&entry.registration_id);
                }
            }
            entry
        };

        if let Some(entry) = entry {
            if let Some(log) = entry.log_buffers {
                self.linger_log_buffers(log);
            }
            if let PublicationState::ReadyExclusive(Some(publication)) = entry.state {
                publication.mark_closed();
            }
            if entry.registration_id != command::NULL_VALUE && self.is_running() {
                self.proxy.remove_publication(entry.registration_id)?;
            }
        }
        Ok(())
    }

    /// Remove a subscription registration, closing and lingering its images.
    pub(crate) fn release_subscription(&self, registration_id: i64) -> Result<()> {
        let entry = self.lock_state().subscriptions.remove(&registration_id);

        if let Some(entry) = entry {
            if let SubscriptionState::Ready(subscription) = entry.state {
                subscription.mark_closed();
                for image in subscription.take_images() {
                    image.close();
                    self.linger_log_buffers(image.log_buffers());
                }
            }
            if self.is_running() {
                self.proxy.remove_subscription(registration_id)?;
            }
        }
        Ok(())
    }

    /// Orderly shutdown from the owning client: release every registration
    /// and announce `CLIENT_CLOSE`. The conductor thread observes `running`
    /// and exits.
    pub(crate) fn close(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            let (publications, subscriptions) = {
                let mut state = self.lock_state();
                state.publication_aliases.clear();
                (
                    state.publications.drain().collect::<Vec<_>>(),
                    state.subscriptions.drain().collect::<Vec<_>>(),
                )
            };

            for (_, entry) in publications {
                match entry.state {
                    PublicationState::Ready(publication) => publication.mark_closed(),
                    PublicationState::ReadyExclusive(Some(publication)) => {
                        publication.mark_closed();
                    }
                    _ => {}
                }
                if entry.registration_id != command::NULL_VALUE {
                    if let Err(error) = self.proxy.remove_publication(entry.registration_id) {
                        log::warn!("failed to remove publication on close: {}", error);
                    }
                }
            }

            for (registration_id, entry) in subscriptions {
                if let SubscriptionState::Ready(subscription) = entry.state {
                    subscription.mark_closed();
                    for image in subscription.take_images() {
                        image.close();
                    }
                }
                if let Err(error) = self.proxy.remove_subscription(registration_id) {
                    log::warn!("failed to remove subscription on close: {}", error);
                }
            }

            if let Err(error) = self.proxy.client_close() {
                log::warn!("failed to send client close: {}", error);
            }
        }
    }

    fn await_operation(&self, correlation_id: i64) -> Result<()> {
        let outcome = self.await_with_timeout(|| {
            let state = self.lock_state();
            match state.operations.get(&correlation_id) {
                Some(OperationState::Awaiting) => Ok(None),
                Some(OperationState::Done) => Ok(Some(Ok(()))),
                Some(OperationState::Errored { code, message }) => {
                    Ok(Some(Err(SeuratError::registration(*code, message.clone()))))
                }
                None => Ok(Some(Err(unknown_registration(correlation_id)))),
            }
        });

        self.lock_state().operations.remove(&correlation_id);
        outcome?
    }

    /// Spin on a non-blocking probe with the configured idle strategy until
    /// resolution, client close, or the driver timeout.
    fn await_with_timeout<T>(&self, mut probe: impl FnMut() -> Result<Option<T>>) -> Result<T> {
        let deadline = Instant::now() + self.driver_timeout;
        let mut idler = Idler::new(self.idle_strategy);

        loop {
            if let Some(value) = probe()? {
                return Ok(value);
            }
            if !self.is_running() {
                return Err(SeuratError::ClientClosed);
            }
            if Instant::now() > deadline {
                return Err(SeuratError::driver_timeout(
                    "driver did not respond to command",
                ));
            }
            idler.idle(0);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(SeuratError::ClientClosed)
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ConductorState> {
        self.state.lock().expect("conductor state lock poisoned")
    }

    /// Registered kind for a correlation id (used by probes and tests).
    pub fn publication_kind_is_exclusive(&self, registration_id: i64) -> Option<bool> {
        let state = self.lock_state();
        let key = resolve_key(&state, registration_id);
        state
            .publications
            .get(&key)
            .map(|entry| entry.kind == PublicationKind::Exclusive)
    }
}

impl std::fmt::Debug for ClientConductor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConductor")
            .field("client_id", &self.client_id())
            .field("running", &self.is_running())
            .field("driver_timeout", &self.driver_timeout)
            .finish()
    }
}

fn resolve_key(state: &ConductorState, registration_id: i64) -> i64 {
    if state.publications.contains_key(&registration_id) {
        registration_id
    } else {
        state
            .publication_aliases
            .get(&registration_id)
            .copied()
            .unwrap_or(registration_id)
    }
}

fn unknown_registration(registration_id: i64) -> SeuratError {
    SeuratError::invalid_parameter(
        "registrationId",
        format!("unknown registration id {}", registration_id),
    )
}

fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
