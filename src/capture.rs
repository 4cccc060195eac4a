//! Row capture from the emulated ZX printer port.
//!
//! The hardware side (PIO state machine plus a one-row DMA transfer on the
//! real device) sits behind [`RowTransfer`]; the capture protocol itself is
//! the idle-timeout logic that turns an endless trickle of rows into
//! silence-delimited jobs.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::time::{sleep, Instant};

use crate::Row;

/// How often the capture loop re-checks an in-flight transfer.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Idle gap that ends a job when no row completes. Two seconds of silence
/// is far longer than the gap between rows of a single printout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(2000);

/// An asynchronous sequence of rows.
///
/// `None` is the end-of-job marker. Sources are restartable: after
/// returning `None` they may produce rows again when the next job begins.
#[async_trait]
pub trait RowSource: Send {
    async fn next_row(&mut self) -> Option<Row>;
}

/// One-row transfer engine, the seam to the strobe-clocked hardware.
///
/// On the real device this arms a DMA transfer fed by the PIO program that
/// clocks pixels off the port; the same state machine drives the status
/// line (off-paper before the first row, ready/busy for buffer
/// backpressure), so flow control never reaches this trait.
pub trait RowTransfer: Send {
    /// Arm a transfer of one full row. No-op while a transfer is in flight.
    fn start(&mut self);

    /// Completed row, if the armed transfer has finished. Disarms.
    fn poll(&mut self) -> Option<Row>;
}

/// Lazy, infinite, restartable sequence of captured rows.
///
/// Each [`RowSource::next_row`] call arms the hardware transfer and
/// cooperatively yields until it completes. If the idle timeout elapses
/// first and at least one row has been captured since the last end-of-job,
/// the job is closed with a single `None`; if nothing was ever captured
/// there is no job to end and the wait simply continues.
pub struct RowCapture<T: RowTransfer> {
    transfer: T,
    timeout: Duration,
    started: bool,
    last_row: Instant,
}

impl<T: RowTransfer> RowCapture<T> {
    pub fn new(transfer: T, timeout: Duration) -> Self {
        RowCapture {
            transfer,
            timeout,
            started: false,
            last_row: Instant::now(),
        }
    }
}

#[async_trait]
impl<T: RowTransfer> RowSource for RowCapture<T> {
    async fn next_row(&mut self) -> Option<Row> {
        self.transfer.start();
        loop {
            if let Some(row) = self.transfer.poll() {
                self.started = true;
                self.last_row = Instant::now();
                return Some(row);
            }
            sleep(POLL_INTERVAL).await;
            if self.started && self.last_row.elapsed() > self.timeout {
                debug!("Capture idle for {:?}, ending job", self.timeout);
                self.started = false;
                return None;
            }
        }
    }
}
