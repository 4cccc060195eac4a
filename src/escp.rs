//! Dot-matrix printer output (ESC/P and ESC/POS style command stream).
//!
//! Captured rows are stacked eight at a time into a column-major band, one
//! byte per printed column with bit 7 as the topmost pin, and each full
//! band goes out as one `ESC * m nL nH` graphics line. At 60 dpi a captured
//! pixel maps to one printed dot; the 120 dpi mode doubles every dot so the
//! printout keeps its width.

use async_trait::async_trait;

use crate::printer::{PortSlot, Protocol};
use crate::{Row, ROW_PIXELS};

/// Pins per graphics band; the classic 8-pin print head.
const BAND_ROWS: u8 = 8;

/// Line-feed policy after each printed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnd {
    /// Carriage return only; the printer's own line spacing advances paper.
    Cr,
    /// Carriage return plus line feed.
    CrLf,
}

/// What to emit when a job finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEnd {
    /// End the last line like any other.
    Line,
    /// Eject the page with a form feed.
    FormFeed,
}

/// Horizontal dot density of the graphics mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Density {
    /// 60 dpi, one printed dot per captured pixel.
    Single,
    /// 120 dpi, every captured pixel doubled.
    Double,
}

impl Density {
    /// Graphics mode selector `m` of `ESC *`.
    fn graphics_mode(self) -> u8 {
        match self {
            Density::Single => 0,
            Density::Double => 1,
        }
    }

    fn xscale(self) -> usize {
        match self {
            Density::Single => 1,
            Density::Double => 2,
        }
    }
}

/// Dot-matrix output settings.
#[derive(Debug, Clone)]
pub struct EscpConfig {
    left_margin: u8,
    line_end: LineEnd,
    page_end: PageEnd,
    density: Density,
}

impl EscpConfig {
    pub fn new() -> Self {
        EscpConfig {
            left_margin: 1,
            line_end: LineEnd::CrLf,
            page_end: PageEnd::Line,
            density: Density::Single,
        }
    }

    /// Left margin in character columns, minimum 1.
    pub fn left_margin(self, columns: u8) -> Self {
        EscpConfig {
            left_margin: columns.max(1),
            ..self
        }
    }

    pub fn line_end(self, line_end: LineEnd) -> Self {
        EscpConfig { line_end, ..self }
    }

    pub fn page_end(self, page_end: PageEnd) -> Self {
        EscpConfig { page_end, ..self }
    }

    pub fn density(self, density: Density) -> Self {
        EscpConfig { density, ..self }
    }
}

impl Default for EscpConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// ESC/P protocol driver.
pub struct EscpProtocol {
    config: EscpConfig,
    band: Vec<u8>,
    pin: u8,
}

impl EscpProtocol {
    pub fn new(config: EscpConfig) -> Self {
        let band = vec![0; ROW_PIXELS * config.density.xscale()];
        EscpProtocol {
            config,
            band,
            pin: BAND_ROWS - 1,
        }
    }

    async fn end_of_line(&self, port: &mut PortSlot) {
        port.write(b"\r").await;
        if self.config.line_end == LineEnd::CrLf {
            port.write(b"\n").await;
        }
    }

    async fn flush_band(&mut self, port: &mut PortSlot) {
        let columns = self.band.len();
        port.write(&[
            0x1B,
            b'*',
            self.config.density.graphics_mode(),
            (columns & 0xFF) as u8,
            (columns >> 8) as u8,
        ])
        .await;
        port.write(&self.band).await;
        self.end_of_line(port).await;
    }
}

#[async_trait]
impl Protocol for EscpProtocol {
    async fn begin(&mut self, port: &mut PortSlot) {
        self.band.fill(0);
        self.pin = BAND_ROWS - 1;
        port.write(b"\x1B@").await; // initialize printer
        port.write(&[0x1B, b'3', 24]).await; // line spacing 24/180 = 8 dots at 60 dpi
        port.write(b"\x1BP").await; // pitch 10 cpi
        port.write(&[0x1B, b'l', self.config.left_margin]).await;
        self.end_of_line(port).await;
    }

    async fn write_row(&mut self, port: &mut PortSlot, row: &Row) {
        let xscale = self.config.density.xscale();
        let mut column = 0;
        for &byte in row.as_bytes() {
            for bit in (0..8).rev() {
                let set = byte & (1 << bit) != 0;
                for _ in 0..xscale {
                    if set {
                        self.band[column] |= 1 << self.pin;
                    }
                    column += 1;
                }
            }
        }
        if self.pin == 0 {
            self.flush_band(port).await;
            self.band.fill(0);
            self.pin = BAND_ROWS - 1;
        } else {
            self.pin -= 1;
        }
    }

    async fn end(&mut self, port: &mut PortSlot) {
        if self.pin != BAND_ROWS - 1 {
            self.flush_band(port).await;
        }
        match self.config.page_end {
            PageEnd::FormFeed => port.write(b"\r\x0C").await,
            PageEnd::Line => self.end_of_line(port).await,
        }
        port.write(b"\x1B@").await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer::Port;
    use crate::{Error, ROW_BYTES};
    use std::sync::{Arc, Mutex};

    struct SinkPort {
        bytes: Arc<Mutex<Vec<u8>>>,
    }

    fn recording_slot() -> (PortSlot, Arc<Mutex<Vec<u8>>>) {
        let bytes = Arc::new(Mutex::new(Vec::new()));
        let port = SinkPort {
            bytes: bytes.clone(),
        };
        (PortSlot::new(Some(Box::new(port))), bytes)
    }

    #[async_trait]
    impl Port for SinkPort {
        async fn write(&mut self, data: &[u8]) -> Result<(), Error> {
            self.bytes.lock().unwrap().extend_from_slice(data);
            Ok(())
        }
    }

    fn count_graphics_lines(bytes: &[u8]) -> usize {
        bytes.windows(2).filter(|w| w == b"\x1B*").count()
    }

    async fn run_job(protocol: &mut EscpProtocol, port: &mut PortSlot, rows: usize) {
        protocol.begin(port).await;
        for i in 0..rows {
            protocol.write_row(port, &Row::new([i as u8; ROW_BYTES])).await;
        }
        protocol.end(port).await;
    }

    #[tokio::test]
    async fn three_bands_flush_three_lines() {
        let (mut port, bytes) = recording_slot();
        let mut protocol = EscpProtocol::new(EscpConfig::new());
        run_job(&mut protocol, &mut port, 24).await;

        let bytes = bytes.lock().unwrap();
        assert!(bytes.starts_with(b"\x1B@\x1B3\x18\x1BP\x1Bl\x01\r\n"));
        assert!(bytes.ends_with(b"\r\n\x1B@"));
        assert_eq!(count_graphics_lines(&bytes), 3);
    }

    #[tokio::test]
    async fn partial_band_flushes_once_at_job_end() {
        let (mut port, bytes) = recording_slot();
        let mut protocol = EscpProtocol::new(EscpConfig::new());
        run_job(&mut protocol, &mut port, 3).await;
        assert_eq!(count_graphics_lines(&bytes.lock().unwrap()), 1);
    }

    #[tokio::test]
    async fn empty_job_emits_no_graphics() {
        let (mut port, bytes) = recording_slot();
        let mut protocol = EscpProtocol::new(EscpConfig::new());
        run_job(&mut protocol, &mut port, 0).await;
        assert_eq!(count_graphics_lines(&bytes.lock().unwrap()), 0);
    }

    #[tokio::test]
    async fn band_is_column_major_with_top_pin_first() {
        let (mut port, bytes) = recording_slot();
        let mut protocol = EscpProtocol::new(EscpConfig::new());
        protocol.begin(&mut port).await;

        // leftmost pixel set on the first row only
        let mut first = [0u8; ROW_BYTES];
        first[0] = 0x80;
        protocol.write_row(&mut port, &Row::new(first)).await;
        for _ in 0..7 {
            protocol.write_row(&mut port, &Row::new([0; ROW_BYTES])).await;
        }

        let bytes = bytes.lock().unwrap();
        let header = bytes
            .windows(2)
            .position(|w| w == b"\x1B*")
            .expect("graphics line missing");
        // ESC * m nL nH, then 256 column bytes
        assert_eq!(&bytes[header + 2..header + 5], &[0, 0, 1]);
        assert_eq!(bytes[header + 5], 0x80); // first column, pin 7 = top row
        assert!(bytes[header + 6..header + 5 + ROW_PIXELS]
            .iter()
            .all(|&b| b == 0));
    }

    #[tokio::test]
    async fn double_density_doubles_columns() {
        let (mut port, bytes) = recording_slot();
        let config = EscpConfig::new().density(Density::Double);
        let mut protocol = EscpProtocol::new(config);
        run_job(&mut protocol, &mut port, 8).await;

        let bytes = bytes.lock().unwrap();
        let header = bytes.windows(2).position(|w| w == b"\x1B*").unwrap();
        // mode 1, 512 columns = nL 0, nH 2
        assert_eq!(&bytes[header + 2..header + 5], &[1, 0, 2]);
    }

    #[tokio::test]
    async fn cr_only_and_form_feed_settings() {
        let (mut port, bytes) = recording_slot();
        let config = EscpConfig::new()
            .line_end(LineEnd::Cr)
            .page_end(PageEnd::FormFeed)
            .left_margin(0);
        let mut protocol = EscpProtocol::new(config);
        run_job(&mut protocol, &mut port, 8).await;

        let bytes = bytes.lock().unwrap();
        assert!(!bytes.contains(&b'\n'));
        assert!(bytes.starts_with(b"\x1B@\x1B3\x18\x1BP\x1Bl\x01\r")); // margin clamped to 1
        assert!(bytes.ends_with(b"\r\x0C\x1B@"));
    }
}
