//! ZX Printer Capture Pipeline
//!
//! This crate implements the print pipeline of a ZX Printer hardware emulator:
//! it reconstructs the 256-pixel scanlines a ZX Spectrum (or Timex TS2040)
//! clocks out of its printer port, fans every captured row out to independent
//! consumers in lock-step, stores printouts as PackBits-compressed `.cap`
//! files, and reproduces them on real printers speaking either dot-matrix
//! ESC/P or raster ESC/P-R, over serial, parallel or network transports.
//!
//! # Example
//!
//! ```rust,no_run
//! use zx_capture::{EscprConfig, EscprProtocol, NetworkPort, PaperSize, PhysicalPrinter};
//!
//! # async fn replay() -> Result<(), zx_capture::Error> {
//! let printer = PhysicalPrinter::new();
//! let config = EscprConfig::new(PaperSize::LETTER, [3.0; 4], 360)?;
//! printer.set_protocol(Box::new(EscprProtocol::new(config))).await;
//! printer.set_port(Some(Box::new(NetworkPort::new(Some("192.168.1.40".into()))))).await;
//! printer.set_enabled(true);
//! printer.print_file("printout/prt000001.cap").await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

mod capture;
mod error;
mod escp;
mod escpr;
mod fanout;
mod packbits;
mod ports;
mod printer;
mod raster;
mod store;

pub use crate::{
    capture::{RowCapture, RowSource, RowTransfer, DEFAULT_IDLE_TIMEOUT},
    error::Error,
    escp::{Density, EscpConfig, EscpProtocol, LineEnd, PageEnd},
    escpr::{EscprConfig, EscprProtocol, PaperSize},
    fanout::{Barrier, Consumer, RowFanOut},
    packbits::{PackBitsReader, PackBitsWriter},
    ports::{NetworkPort, ParallelPort, SerialPort},
    printer::{FileRowSource, PhysicalPrinter, Port, PortSlot, Protocol},
    raster::{expand_bits, pack_bits, pwg_rle},
    store::{capture_to_store, CaptureEvent, PrintStore},
};

/// Pixels in one captured scanline.
///
/// The ZX Printer prints 256 dots across the paper width; the emulated port
/// clocks exactly this many pixels per row, so every row in the pipeline is
/// the same fixed size.
pub const ROW_PIXELS: usize = 256;

/// Bytes in one packed scanline (256 pixels, 8 pixels per byte, MSB first).
pub const ROW_BYTES: usize = ROW_PIXELS / 8;

/// One captured or replayed printer scanline.
///
/// A `Row` is immutable once produced and cheap to clone; every consumer of
/// a fan-out cycle shares the same backing buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Row(Arc<[u8; ROW_BYTES]>);

impl Row {
    pub fn new(bytes: [u8; ROW_BYTES]) -> Self {
        Row(Arc::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; ROW_BYTES] {
        &self.0
    }

    /// State of one pixel, counted from the left edge.
    ///
    /// # Panics
    ///
    /// Panics if `x >= ROW_PIXELS`.
    pub fn pixel(&self, x: usize) -> bool {
        assert!(x < ROW_PIXELS, "pixel index {} out of range", x);
        self.0[x / 8] & (0x80 >> (x % 8)) != 0
    }
}

impl From<[u8; ROW_BYTES]> for Row {
    fn from(bytes: [u8; ROW_BYTES]) -> Self {
        Row::new(bytes)
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Row({:02x?}..)", &self.0[..4])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_addresses_bits_msb_first() {
        let mut bytes = [0u8; ROW_BYTES];
        bytes[0] = 0x80;
        bytes[31] = 0x01;
        let row = Row::new(bytes);
        assert!(row.pixel(0));
        assert!(!row.pixel(1));
        assert!(row.pixel(255));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn pixel_rejects_out_of_range_index() {
        Row::new([0; ROW_BYTES]).pixel(ROW_PIXELS);
    }
}
