//! Error types for the capture pipeline.
//!
//! Configuration-time problems surface synchronously through these variants.
//! Transport failures during an active print job never reach the caller;
//! they are contained by [`crate::PortSlot`], which closes the port and
//! drains the rest of the job with output suppressed.

use thiserror::Error;

/// Main error type for pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying I/O error from a transport or the file store.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The raster protocol only understands a fixed set of resolutions.
    ///
    /// Raised when an [`crate::EscprConfig`] is built, before any job can
    /// reach the printer with a header the device would reject.
    #[error("Unsupported resolution: {0} dpi")]
    UnsupportedResolution(u32),

    /// Invalid configuration parameter provided.
    #[error("Invalid configuration parameter: {0}")]
    InvalidConfig(String),

    /// Network printing was requested with no target address configured.
    #[error("No printer address set")]
    NoPrinterAddress,

    /// The print store has not been initialised for this location.
    #[error("Print store is not ready")]
    StoreNotReady,

    /// A consumer tried to attach to the fan-out after the producer started.
    ///
    /// The barrier party count must be fixed before the first row is
    /// published; attaching mid-stream would either deadlock the rendezvous
    /// or skip a cycle, so it is rejected outright.
    #[error("Cannot attach a consumer while the producer is running")]
    ProducerRunning,
}
