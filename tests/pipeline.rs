//! Full pipeline: hardware transfer → capture → fan-out → store + printer.

use std::collections::VecDeque;
use std::fs::File;
use std::io::BufReader;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use zx_capture::{
    capture_to_store, CaptureEvent, Error, PackBitsReader, PhysicalPrinter, Port, PortSlot,
    PrintStore, Protocol, Row, RowCapture, RowFanOut, RowTransfer, DEFAULT_IDLE_TIMEOUT,
    ROW_BYTES,
};

/// Scripted transfer engine: each entry is (polls until the row completes,
/// the row). At one poll per millisecond a large delay models printer
/// silence crossing the idle timeout.
struct ScriptedTransfer {
    rows: VecDeque<(u32, Row)>,
    armed: bool,
    polls: u32,
}

impl ScriptedTransfer {
    fn new(script: Vec<(u32, Row)>) -> Self {
        ScriptedTransfer {
            rows: script.into(),
            armed: false,
            polls: 0,
        }
    }
}

impl RowTransfer for ScriptedTransfer {
    fn start(&mut self) {
        if !self.armed {
            self.armed = true;
            self.polls = 0;
        }
    }

    fn poll(&mut self) -> Option<Row> {
        let (delay, _) = *self.rows.front()?;
        self.polls += 1;
        if self.polls < delay {
            return None;
        }
        self.armed = false;
        self.rows.pop_front().map(|(_, row)| row)
    }
}

/// Protocol that journals its lifecycle into the port: `[` begin, one byte
/// per row (the row's first byte), `]` end.
struct JournalProtocol;

#[async_trait]
impl Protocol for JournalProtocol {
    async fn begin(&mut self, port: &mut PortSlot) {
        port.write(b"[").await;
    }

    async fn write_row(&mut self, port: &mut PortSlot, row: &Row) {
        port.write(&row.as_bytes()[..1]).await;
    }

    async fn end(&mut self, port: &mut PortSlot) {
        port.write(b"]").await;
    }
}

struct SinkPort {
    bytes: Arc<Mutex<Vec<u8>>>,
}

#[async_trait]
impl Port for SinkPort {
    async fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        self.bytes.lock().unwrap().extend_from_slice(data);
        Ok(())
    }
}

fn row(fill: u8) -> Row {
    Row::new([fill; ROW_BYTES])
}

fn stored_rows(store: &PrintStore, name: &str) -> Vec<Vec<u8>> {
    let file = File::open(store.path_of(name)).unwrap();
    let mut reader = PackBitsReader::new(BufReader::new(file));
    let mut rows = Vec::new();
    let mut current = Vec::new();
    while let Some(byte) = reader.read_byte().unwrap() {
        current.push(byte);
        if current.len() == ROW_BYTES {
            rows.push(std::mem::take(&mut current));
        }
    }
    assert!(current.is_empty());
    rows
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[tokio::test(start_paused = true)]
async fn two_jobs_flow_to_store_and_printer() {
    init_logging();
    // Two bursts of rows separated by more than the idle timeout.
    let transfer = ScriptedTransfer::new(vec![
        (1, row(0x01)),
        (1, row(0x02)),
        (1, row(0x03)),
        (3000, row(0x09)),
    ]);
    let capture = RowCapture::new(transfer, DEFAULT_IDLE_TIMEOUT);

    let fanout = RowFanOut::new();
    let store_rows = fanout.add_consumer().unwrap();
    let print_rows = fanout.add_consumer().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Mutex::new(PrintStore::open(dir.path()).unwrap()));
    let (events, mut completed) = mpsc::channel(4);
    let enabled = Arc::new(AtomicBool::new(true));

    let printed = Arc::new(Mutex::new(Vec::new()));
    let printer = Arc::new(PhysicalPrinter::new());
    printer
        .set_port(Some(Box::new(SinkPort {
            bytes: printed.clone(),
        })))
        .await;
    printer.set_protocol(Box::new(JournalProtocol)).await;
    printer.set_enabled(true);

    let store_task = tokio::spawn(capture_to_store(
        store.clone(),
        store_rows,
        events,
        enabled,
    ));
    let print_task = {
        let printer = printer.clone();
        tokio::spawn(async move { printer.capture(print_rows).await })
    };
    let producer = tokio::spawn(async move { fanout.produce(capture).await });

    // Both capture files complete, in order.
    assert_eq!(
        completed.recv().await,
        Some(CaptureEvent::Completed {
            file: "prt000001.cap".into()
        })
    );
    assert_eq!(
        completed.recv().await,
        Some(CaptureEvent::Completed {
            file: "prt000002.cap".into()
        })
    );

    // Let the printer side of the second end-of-job settle.
    tokio::time::sleep(Duration::from_millis(50)).await;
    producer.abort();
    store_task.abort();
    print_task.abort();

    let store = store.lock().unwrap();
    assert_eq!(
        store.list().unwrap(),
        vec!["prt000001.cap", "prt000002.cap"]
    );
    assert_eq!(
        stored_rows(&store, "prt000001.cap"),
        vec![
            vec![0x01; ROW_BYTES],
            vec![0x02; ROW_BYTES],
            vec![0x03; ROW_BYTES],
        ]
    );
    assert_eq!(stored_rows(&store, "prt000002.cap"), vec![vec![0x09; ROW_BYTES]]);

    // The printer saw the same two jobs framed begin/end.
    assert_eq!(&*printed.lock().unwrap(), b"[\x01\x02\x03][\x09]");
}

#[tokio::test(start_paused = true)]
async fn disabled_printer_still_stores_captures() {
    init_logging();
    let transfer = ScriptedTransfer::new(vec![(1, row(0x55)), (1, row(0x66))]);
    let capture = RowCapture::new(transfer, DEFAULT_IDLE_TIMEOUT);

    let fanout = RowFanOut::new();
    let store_rows = fanout.add_consumer().unwrap();
    let print_rows = fanout.add_consumer().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Mutex::new(PrintStore::open(dir.path()).unwrap()));
    let (events, mut completed) = mpsc::channel(4);
    let enabled = Arc::new(AtomicBool::new(true));

    let printed = Arc::new(Mutex::new(Vec::new()));
    let printer = Arc::new(PhysicalPrinter::new());
    printer
        .set_port(Some(Box::new(SinkPort {
            bytes: printed.clone(),
        })))
        .await;
    printer.set_protocol(Box::new(JournalProtocol)).await;
    // output left disabled

    let store_task = tokio::spawn(capture_to_store(
        store.clone(),
        store_rows,
        events,
        enabled,
    ));
    let print_task = {
        let printer = printer.clone();
        tokio::spawn(async move { printer.capture(print_rows).await })
    };
    let producer = tokio::spawn(async move { fanout.produce(capture).await });

    assert_eq!(
        completed.recv().await,
        Some(CaptureEvent::Completed {
            file: "prt000001.cap".into()
        })
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    producer.abort();
    store_task.abort();
    print_task.abort();

    let store = store.lock().unwrap();
    assert_eq!(
        stored_rows(&store, "prt000001.cap"),
        vec![vec![0x55; ROW_BYTES], vec![0x66; ROW_BYTES]]
    );
    assert!(printed.lock().unwrap().is_empty());
}
