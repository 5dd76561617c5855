//! Top-level client attached to a media driver

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::broadcast::{CopyReceiver, Receiver};
use crate::cnc::CncFile;
use crate::conductor::ClientConductor;
use crate::context::Context;
use crate::counters::CountersReader;
use crate::driver_proxy::DriverProxy;
use crate::error::Result;
use crate::exclusive_publication::ExclusivePublication;
use crate::publication::Publication;
use crate::ringbuffer::ManyToOneRingBuffer;
use crate::subscription::Subscription;

/// A client instance attached to a co-located media driver through its CnC
/// file. Owns the conductor thread; dropping or closing the instance shuts
/// the conductor down and releases every registration.
#[derive(Debug)]
pub struct Aeron {
    conductor: Arc<ClientConductor>,
    conductor_thread: Option<JoinHandle<()>>,
    client_id: i64,
}

impl Aeron {
    /// Map the driver's CnC file, validate it, and start the conductor.
    pub fn connect(context: Context) -> Result<Self> {
        let cnc = CncFile::map(context.cnc_file_name())?;

        let ring = Arc::new(ManyToOneRingBuffer::new(cnc.to_driver_buffer())?);
        let receiver = Receiver::new(cnc.to_clients_buffer())?;
        let copy_receiver = CopyReceiver::new(receiver);
        let proxy = Arc::new(DriverProxy::new(ring));
        let client_id = proxy.client_id();

        let conductor = Arc::new(ClientConductor::new(
            proxy,
            &context,
            cnc.mapped_file(),
            cnc.counters_metadata_buffer(),
            cnc.counters_values_buffer(),
            cnc.client_liveness_timeout_ns(),
        ));

        let thread = {
            let conductor = Arc::clone(&conductor);
            std::thread::Builder::new()
                .name("seurat-conductor".to_string())
                .spawn(move || conductor.run(copy_receiver))
                .map_err(|e| crate::error::SeuratError::from_io(e, "Failed to spawn conductor"))?
        };

        log::debug!("connected to driver at {:?} as client {}", context.aeron_dir(), client_id);

        Ok(Self {
            conductor,
            conductor_thread: Some(thread),
            client_id,
        })
    }

    /// Identity allocated for this client by the driver's correlation
    /// counter.
    pub fn client_id(&self) -> i64 {
        self.client_id
    }

    /// Unique correlation id for application-level request pairing. Thread
    /// safe and unique across all clients of this driver.
    pub fn next_correlation_id(&self) -> i64 {
        self.conductor.proxy_next_correlation_id()
    }

    /// True once the client has closed or a fatal driver condition fired.
    pub fn is_closed(&self) -> bool {
        !self.conductor.is_running()
    }

    /// Opaque handle over the driver's counters.
    pub fn counter_reader(&self) -> CountersReader {
        self.conductor.counter_reader()
    }

    /// Liveness timeout the driver announced for its clients, nanoseconds.
    pub fn client_liveness_timeout_ns(&self) -> i64 {
        self.conductor.client_liveness_timeout_ns()
    }

    /// Add a publication and wait for the driver to make it ready.
    pub fn add_publication(&self, channel: &str, stream_id: i32) -> Result<Arc<Publication>> {
        let registration_id = self.conductor.add_publication(channel, stream_id)?;
        self.conductor.await_publication(registration_id)
    }

    /// Asynchronous variant: returns the registration id for
    /// [`get_publication`](Self::get_publication).
    pub fn async_add_publication(&self, channel: &str, stream_id: i32) -> Result<i64> {
        self.conductor.add_publication(channel, stream_id)
    }

    /// Probe an asynchronous add: `Ok(None)` while pending.
    pub fn get_publication(&self, registration_id: i64) -> Result<Option<Arc<Publication>>> {
        self.conductor.find_publication(registration_id)
    }

    /// Add an exclusive publication and wait for it. The returned value is
    /// owned: offers take `&mut self`.
    pub fn add_exclusive_publication(
        &self,
        channel: &str,
        stream_id: i32,
    ) -> Result<ExclusivePublication> {
        let registration_id = self.conductor.add_exclusive_publication(channel, stream_id)?;
        self.conductor.await_exclusive_publication(registration_id)
    }

    pub fn async_add_exclusive_publication(&self, channel: &str, stream_id: i32) -> Result<i64> {
        self.conductor.add_exclusive_publication(channel, stream_id)
    }

    /// Probe an asynchronous exclusive add; ownership transfers on the
    /// first successful call.
    pub fn get_exclusive_publication(
        &self,
        registration_id: i64,
    ) -> Result<Option<ExclusivePublication>> {
        self.conductor.find_exclusive_publication(registration_id)
    }

    /// Add a subscription and wait for the driver to make it ready.
    pub fn add_subscription(&self, channel: &str, stream_id: i32) -> Result<Arc<Subscription>> {
        let registration_id = self.conductor.add_subscription(channel, stream_id)?;
        self.conductor.await_subscription(registration_id)
    }

    pub fn async_add_subscription(&self, channel: &str, stream_id: i32) -> Result<i64> {
        self.conductor.add_subscription(channel, stream_id)
    }

    /// Probe an asynchronous add: `Ok(None)` while pending.
    pub fn get_subscription(&self, registration_id: i64) -> Result<Option<Arc<Subscription>>> {
        self.conductor.find_subscription(registration_id)
    }

    /// Close the client: releases every registration with the driver,
    /// stops the conductor thread, and unmaps lingered resources.
    /// Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.conductor.close();
        if let Some(thread) = self.conductor_thread.take() {
            if thread.join().is_err() {
                log::error!("conductor thread panicked during shutdown");
            }
        }
        Ok(())
    }
}

impl Drop for Aeron {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
