//! # Seurat - Aeron client over shared memory
//!
//! Seurat is a client library for the [Aeron](https://aeron.io) media
//! driver: it attaches to a co-located driver process through the driver's
//! memory-mapped CnC file, exchanges commands and events over lock-free
//! ring and broadcast buffers, and publishes/consumes message streams
//! directly in memory-mapped log buffers using the term-based fragmented
//! framing protocol.
//!
//! ## Architecture
//!
//! ```text
//!  client ─→ driver : command records on an MPSC ring buffer (to-driver)
//!  driver ─→ client : event records on an SPMC broadcast buffer (to-clients)
//!  driver ←→ client : per-stream mmapped log buffers carrying data frames
//! ```
//!
//! One conductor thread per [`Aeron`] instance correlates commands with
//! driver responses, tracks driver liveness, and manages image lifecycle.
//! User threads call the lock-free fast paths: [`Publication::offer`],
//! [`Subscription::poll`], [`Publication::try_claim`].
//!
//! ## Example
//!
//! ```no_run
//! use seurat::{Aeron, Context};
//!
//! let aeron = Aeron::connect(Context::new())?;
//! let publication = aeron.add_publication("aeron:ipc", 1001)?;
//! while publication.offer(b"hello") < 0 {
//!     std::thread::yield_now();
//! }
//! # Ok::<(), seurat::SeuratError>(())
//! ```
//!
//! The name honours Georges Seurat, who also assembled complete pictures
//! from very small fragments.

// Transport primitives
pub mod broadcast;
pub mod buffer;
pub mod ringbuffer;

// Shared files and layout
pub mod cnc;
pub mod counters;
pub mod logbuffer;
pub mod memory;

// Control protocol
pub mod command;
pub mod driver_proxy;

// Client machinery
pub mod channel;
pub mod client;
pub mod conductor;
pub mod context;
pub mod error;
pub mod exclusive_publication;
pub mod fragment_assembler;
pub mod idle;
pub mod image;
pub mod publication;
pub mod subscription;
pub mod util;

// Main API re-exports
pub use buffer::{AtomicBuffer, OwnedBuffer};
pub use channel::{validate_channel, IPC_CHANNEL};
pub use client::Aeron;
pub use cnc::{default_aeron_dir, CncFile};
pub use conductor::ClientConductor;
pub use context::Context;
pub use counters::{CountersReader, Position};
pub use error::{Result, SeuratError};
pub use exclusive_publication::ExclusivePublication;
pub use fragment_assembler::FragmentAssembler;
pub use idle::{IdleStrategy, Idler};
pub use image::Image;
pub use logbuffer::{
    BufferClaim, ControlledPollAction, Header, LogBuffers, ReservedValueSupplier,
};
pub use publication::{
    Publication, ADMIN_ACTION, BACK_PRESSURED, MAX_POSITION_EXCEEDED, NOT_CONNECTED,
    PUBLICATION_CLOSED,
};
pub use ringbuffer::ManyToOneRingBuffer;
pub use subscription::Subscription;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
