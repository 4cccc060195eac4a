//! Printer transports.
//!
//! Three ways out of the box: a serial link with optional XON/XOFF flow
//! control and inter-byte pacing, a parallel bus that takes bytes as fast
//! as the strobe line allows, and a raw TCP socket to a network printer.
//! Serial and parallel are generic over the underlying byte stream so the
//! actual device handle stays out of this crate; hardware handshaking
//! (CTS, printer BUSY) belongs to that stream.

use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use log::{error, info};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::sleep;

use crate::printer::Port;
use crate::Error;

const XOFF: u8 = 0x13;

/// How long to sit between flow-state polls while the peer holds us off.
const BUSY_SLEEP: Duration = Duration::from_millis(200);

/// Well-known raw print service port (JetDirect).
pub const RAW_PRINT_PORT: u16 = 9100;

/// Serial transport with software flow control.
///
/// With neither flow control nor a delay configured, writes go through in
/// one piece. Otherwise bytes go out one at a time: before each byte the
/// input side is drained, and an XOFF from the printer stalls transmission
/// until the next received byte that is not another XOFF.
pub struct SerialPort<T> {
    stream: T,
    software_flow: bool,
    inter_byte_delay: Duration,
    stopped: bool,
}

impl<T> SerialPort<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: T) -> Self {
        SerialPort {
            stream,
            software_flow: false,
            inter_byte_delay: Duration::ZERO,
            stopped: false,
        }
    }

    pub fn set_flow_control(&mut self, software: bool, inter_byte_delay: Duration) {
        self.software_flow = software;
        self.inter_byte_delay = inter_byte_delay;
        self.stopped = false;
    }

    /// Drain whatever the printer has sent without blocking. Any received
    /// byte restarts transmission, it doesn't have to be XON; only another
    /// XOFF keeps us stopped.
    fn poll_flow_state(&mut self) -> Result<(), Error> {
        let mut byte = [0u8; 1];
        while let Some(read) = self.stream.read(&mut byte).now_or_never() {
            if read? == 0 {
                break;
            }
            self.stopped = byte[0] == XOFF;
        }
        Ok(())
    }
}

#[async_trait]
impl<T> Port for SerialPort<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        if !self.software_flow && self.inter_byte_delay.is_zero() {
            self.stream.write_all(data).await?;
            self.stream.flush().await?;
            return Ok(());
        }
        for &byte in data {
            if self.software_flow {
                self.poll_flow_state()?;
                while self.stopped {
                    sleep(BUSY_SLEEP).await;
                    self.poll_flow_state()?;
                }
            }
            self.stream.write_all(&[byte]).await?;
            self.stream.flush().await?;
            if !self.inter_byte_delay.is_zero() {
                sleep(self.inter_byte_delay).await;
            }
        }
        Ok(())
    }
}

/// Parallel transport. Pacing lives in the bus driver behind the stream,
/// so this is a straight passthrough.
pub struct ParallelPort<T> {
    stream: T,
}

impl<T> ParallelPort<T>
where
    T: AsyncWrite + Unpin + Send,
{
    pub fn new(stream: T) -> Self {
        ParallelPort { stream }
    }
}

#[async_trait]
impl<T> Port for ParallelPort<T>
where
    T: AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

/// Raw TCP transport, connecting per job.
///
/// The address is `host` or `host:port`; without a port the raw print
/// service port 9100 is assumed. No address configured means every job
/// fails at open.
pub struct NetworkPort {
    address: Option<String>,
    stream: Option<TcpStream>,
}

impl NetworkPort {
    pub fn new(address: Option<String>) -> Self {
        NetworkPort {
            address,
            stream: None,
        }
    }

    pub fn set_address(&mut self, address: Option<String>) {
        self.address = address;
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }
}

#[async_trait]
impl Port for NetworkPort {
    async fn open(&mut self) -> Result<(), Error> {
        let address = self.address.as_deref().ok_or(Error::NoPrinterAddress)?;
        let target = if address.contains(':') {
            address.to_string()
        } else {
            format!("{}:{}", address, RAW_PRINT_PORT)
        };
        info!("Network printer connecting to '{}'", target);
        match TcpStream::connect(&target).await {
            Ok(stream) => {
                self.stream = Some(stream);
                Ok(())
            }
            Err(e) => {
                error!("Network printer failed to connect: {}", e);
                Err(e.into())
            }
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        if let Some(stream) = &mut self.stream {
            if let Err(e) = stream.write_all(data).await {
                self.close().await;
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}
