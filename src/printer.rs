//! Physical printer output pipeline.
//!
//! Rows reach this module either live from the fan-out or replayed from a
//! stored `.cap` file; both paths run the same job state machine
//! (`idle → open → active → closing → idle`) against one active
//! [`Port`] × [`Protocol`] pair. A single job lock serializes overlapping
//! jobs from different sources, and transport failures are contained here:
//! a failed port drains the rest of the job with output suppressed instead
//! of ever stalling the row stream.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use log::{error, info};
use tokio::sync::{Mutex, MutexGuard};

use crate::capture::RowSource;
use crate::escp::{EscpConfig, EscpProtocol};
use crate::packbits::PackBitsReader;
use crate::{Error, Row, ROW_BYTES};

/// Transport for sending encoded bytes to a printer.
///
/// Lifecycle is `open → write* → close`, once per job. Serial and parallel
/// transports are always connected, so `open` and `close` default to
/// no-ops; the network transport connects per job.
#[async_trait]
pub trait Port: Send {
    async fn open(&mut self) -> Result<(), Error> {
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), Error>;

    async fn close(&mut self) {}
}

/// The active port slot, with best-effort write semantics.
///
/// A failed open or write logs, closes the port, and latches the slot shut
/// for the rest of the job; the protocol keeps emitting into the void so
/// the consumer loop never blocks on a dead printer. The next job starts
/// with a fresh `open`.
pub struct PortSlot {
    port: Option<Box<dyn Port>>,
    failed: bool,
}

impl PortSlot {
    pub fn new(port: Option<Box<dyn Port>>) -> Self {
        PortSlot {
            port,
            failed: false,
        }
    }

    pub fn set(&mut self, port: Option<Box<dyn Port>>) {
        self.port = port;
        self.failed = false;
    }

    pub async fn open(&mut self) {
        self.failed = false;
        if let Some(port) = &mut self.port {
            if let Err(e) = port.open().await {
                error!("Printer port failed to open: {}", e);
                port.close().await;
                self.failed = true;
            }
        }
    }

    pub async fn write(&mut self, data: &[u8]) {
        if self.failed {
            return;
        }
        if let Some(port) = &mut self.port {
            if let Err(e) = port.write(data).await {
                error!("Printer port write failed: {}", e);
                port.close().await;
                self.failed = true;
            }
        }
    }

    pub async fn close(&mut self) {
        if self.failed {
            return; // already closed by the failure path
        }
        if let Some(port) = &mut self.port {
            port.close().await;
        }
    }
}

/// Printer-language encoder.
///
/// Lifecycle is `begin → write_row* → end` per job. A protocol owns its
/// line buffering and emits transport bytes through the [`PortSlot`];
/// parameter validation happens when the protocol is configured, so these
/// methods are infallible and transport errors die in the slot.
#[async_trait]
pub trait Protocol: Send {
    /// Emit the job preamble (printer reset, job and page headers).
    async fn begin(&mut self, port: &mut PortSlot);

    /// Accumulate one captured row, flushing printer-native lines as the
    /// internal buffer fills.
    async fn write_row(&mut self, port: &mut PortSlot, row: &Row);

    /// Flush any partial line and emit the job trailer.
    async fn end(&mut self, port: &mut PortSlot);
}

struct PrinterState {
    port: PortSlot,
    protocol: Box<dyn Protocol>,
}

/// The physical output pipeline.
///
/// Holds the active port and protocol behind the job lock; configuration
/// swaps and job starts both go through it, so a target change can never
/// interleave with a job's line buffering. Construct once, share via
/// `Arc`, and reconfigure through the setters.
pub struct PhysicalPrinter {
    state: Mutex<PrinterState>,
    enabled: AtomicBool,
}

impl PhysicalPrinter {
    /// New pipeline with no port attached, the dot-matrix protocol with
    /// default settings, and output disabled.
    pub fn new() -> Self {
        PhysicalPrinter {
            state: Mutex::new(PrinterState {
                port: PortSlot::new(None),
                protocol: Box::new(EscpProtocol::new(EscpConfig::new())),
            }),
            enabled: AtomicBool::new(false),
        }
    }

    /// Swap the active transport. Blocks until any running job finishes.
    pub async fn set_port(&self, port: Option<Box<dyn Port>>) {
        self.state.lock().await.port.set(port);
    }

    /// Swap the active printer language. Blocks until any running job
    /// finishes.
    pub async fn set_protocol(&self, protocol: Box<dyn Protocol>) {
        self.state.lock().await.protocol = protocol;
    }

    pub fn set_enabled(&self, enabled: bool) {
        info!("Physical printing {}", if enabled { "enabled" } else { "disabled" });
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Run one print job: consume rows until the end-of-job marker,
    /// driving the active protocol over the active port.
    ///
    /// Rows arriving while output is disabled are drained and dropped.
    /// The job lock is taken on the first row and held to the end, so a
    /// live capture and a file replay can overlap without interleaving.
    pub async fn print_job<S: RowSource + ?Sized>(&self, rows: &mut S, label: &str) {
        let mut started_at: Option<Instant> = None;
        let mut session: Option<MutexGuard<'_, PrinterState>> = None;

        while let Some(row) = rows.next_row().await {
            if started_at.is_none() {
                if !self.enabled.load(Ordering::SeqCst) {
                    continue;
                }
                started_at = Some(Instant::now());
            }
            if session.is_none() {
                let mut state = self.state.lock().await;
                state.port.open().await;
                let PrinterState { port, protocol } = &mut *state;
                protocol.begin(port).await;
                session = Some(state);
            }
            if let Some(state) = session.as_mut() {
                let PrinterState { port, protocol } = &mut **state;
                protocol.write_row(port, &row).await;
            }
        }

        if let Some(mut state) = session.take() {
            let PrinterState { port, protocol } = &mut *state;
            protocol.end(port).await;
            port.close().await;
        }
        if let Some(started) = started_at {
            info!("{} print time: {} ms", label, started.elapsed().as_millis());
            info!("{} print finished", label);
        }
    }

    /// Print every job that ever comes out of `rows`; the live-capture
    /// output task.
    pub async fn capture<S: RowSource>(&self, mut rows: S) {
        info!("Waiting for printout to print");
        loop {
            self.print_job(&mut rows, "ZX/TS").await;
        }
    }

    /// Replay one stored capture file as a single print job.
    pub async fn print_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let mut rows = FileRowSource::open(&path)?;
        info!("Printing file {}", path.as_ref().display());
        self.print_job(&mut rows, "File").await;
        Ok(())
    }
}

impl Default for PhysicalPrinter {
    fn default() -> Self {
        Self::new()
    }
}

/// Replays a stored `.cap` file as a row source: one end-of-job at end of
/// file, row-at-a-time through the storage codec.
pub struct FileRowSource {
    reader: PackBitsReader<BufReader<File>>,
    done: bool,
}

impl FileRowSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = File::open(path)?;
        Ok(FileRowSource {
            reader: PackBitsReader::new(BufReader::new(file)),
            done: false,
        })
    }
}

#[async_trait]
impl RowSource for FileRowSource {
    async fn next_row(&mut self) -> Option<Row> {
        if self.done {
            return None;
        }
        let mut bytes = [0u8; ROW_BYTES];
        for byte in bytes.iter_mut() {
            match self.reader.read_byte() {
                Ok(Some(value)) => *byte = value,
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    error!("Failed to read capture file: {}", e);
                    self.done = true;
                    return None;
                }
            }
        }
        Some(Row::new(bytes))
    }
}
