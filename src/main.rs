//
// cargo run printout/prt000001.cap
// cargo run printout/prt000001.cap 192.168.1.40
//
use std::process::ExitCode;

use zx_capture::{
    EscprConfig, EscprProtocol, NetworkPort, PaperSize, PhysicalPrinter, RowSource,
    FileRowSource, Row, ROW_PIXELS,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    match args.as_slice() {
        [_, file] => dump(file).await,
        [_, file, host] => reprint(file, host).await,
        _ => {
            println!("usage: zx-capture <file.cap> [printer-host]");
            ExitCode::FAILURE
        }
    }
}

/// Render a stored capture as ASCII art, one character per pixel.
async fn dump(file: &str) -> ExitCode {
    let mut rows = match FileRowSource::open(file) {
        Ok(rows) => rows,
        Err(e) => {
            println!("can't open '{}': {}", file, e);
            return ExitCode::FAILURE;
        }
    };

    while let Some(row) = rows.next_row().await {
        println!("{}", render(&row));
    }
    ExitCode::SUCCESS
}

fn render(row: &Row) -> String {
    (0..ROW_PIXELS)
        .map(|x| if row.pixel(x) { '*' } else { ' ' })
        .collect()
}

/// Replay a stored capture to a network raster printer.
async fn reprint(file: &str, host: &str) -> ExitCode {
    let config = match EscprConfig::new(PaperSize::LETTER, [3.0; 4], 360) {
        Ok(config) => config,
        Err(e) => {
            println!("bad printer settings: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let printer = PhysicalPrinter::new();
    printer
        .set_port(Some(Box::new(NetworkPort::new(Some(host.to_string())))))
        .await;
    printer.set_protocol(Box::new(EscprProtocol::new(config))).await;
    printer.set_enabled(true);

    match printer.print_file(file).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("can't print '{}': {}", file, e);
            ExitCode::FAILURE
        }
    }
}
