//! Numbered capture store and the capture-to-store consumer.
//!
//! Finished printouts land in a `printout/` folder as `prtNNNNNN.cap`
//! files, PackBits-compressed scanlines back to back. A small JSON config
//! file remembers the next file number so numbering survives restarts even
//! when files have been copied off and deleted; on open the counter is
//! reconciled against whatever files are actually present and the larger
//! wins.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{error, info};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::capture::RowSource;
use crate::packbits::{PackBitsReader, PackBitsWriter};
use crate::Error;

const PRINTOUT_FOLDER: &str = "printout";
const CONFIG_FILE: &str = "prtconfig.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreSettings {
    next: u32,
}

/// Notification sent when a capture file is complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Completed { file: String },
}

/// The on-disk capture store.
pub struct PrintStore {
    folder: PathBuf,
    next: u32,
}

impl PrintStore {
    /// Opens (creating if needed) the `printout/` folder under `root` and
    /// works out the next file number.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, Error> {
        let folder = root.as_ref().join(PRINTOUT_FOLDER);
        if !folder.is_dir() {
            info!("Creating print folder");
            fs::create_dir_all(&folder)?;
        }

        info!("Finding next print file");
        let settings = File::open(folder.join(CONFIG_FILE))
            .ok()
            .and_then(|fp| serde_json::from_reader::<_, StoreSettings>(fp).ok())
            .unwrap_or_default();

        let mut store = PrintStore { folder, next: 1 };
        let file_next = store
            .list()?
            .iter()
            .filter_map(|name| parse_number(name))
            .max()
            .map_or(1, |last| last + 1);
        store.next = settings.next.max(file_next).max(1);

        if store.next != settings.next {
            store.save_settings()?;
        }

        info!(
            "Next print file is #{} '{}'",
            store.next,
            store.path_of(&file_name(store.next)).display()
        );
        Ok(store)
    }

    /// Numbered capture files present in the store, in numeric order.
    ///
    /// The folder can disappear under us when the store lives on removable
    /// media; that is reported as [`Error::StoreNotReady`] rather than a
    /// bare I/O error.
    pub fn list(&self) -> Result<Vec<String>, Error> {
        if !self.folder.is_dir() {
            return Err(Error::StoreNotReady);
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.folder)? {
            let name = entry?.file_name();
            if let Some(name) = name.to_str() {
                if parse_number(name).is_some() {
                    files.push(name.to_string());
                }
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.folder.join(name)
    }

    /// Reserves the next file number; the counter is only persisted by an
    /// explicit `save_settings` once the capture completes.
    pub fn allocate(&mut self) -> (String, PathBuf) {
        let name = file_name(self.next);
        self.next += 1;
        let path = self.path_of(&name);
        (name, path)
    }

    pub fn save_settings(&self) -> Result<(), Error> {
        info!("Saving print capture settings");
        let fp = File::create(self.folder.join(CONFIG_FILE))?;
        serde_json::to_writer(fp, &StoreSettings { next: self.next })
            .map_err(|e| Error::Io(e.into()))?;
        Ok(())
    }

    pub fn delete(&self, name: &str) -> Result<(), Error> {
        if !self.folder.is_dir() {
            return Err(Error::StoreNotReady);
        }
        if parse_number(name).is_none() {
            return Err(Error::InvalidConfig(format!(
                "not a capture file name: {}",
                name
            )));
        }
        fs::remove_file(self.path_of(name))?;
        Ok(())
    }

    /// Concatenates stored captures into one new capture file, in the
    /// given order. Best-effort: any failure removes the partial output.
    pub fn merge(&mut self, sources: &[&str]) -> Result<String, Error> {
        let (name, path) = self.allocate();
        match self.merge_into(&path, sources) {
            Ok(()) => {
                self.save_settings()?;
                Ok(name)
            }
            Err(e) => {
                let _ = fs::remove_file(&path);
                Err(e)
            }
        }
    }

    fn merge_into(&self, path: &Path, sources: &[&str]) -> Result<(), Error> {
        let mut writer = PackBitsWriter::new(BufWriter::new(File::create(path)?));
        for source in sources {
            let mut reader = PackBitsReader::new(BufReader::new(File::open(self.path_of(source))?));
            while let Some(byte) = reader.read_byte()? {
                writer.write_byte(byte)?;
            }
        }
        writer.finish()?.flush()?;
        Ok(())
    }
}

fn file_name(number: u32) -> String {
    format!("prt{:06}.cap", number)
}

fn parse_number(name: &str) -> Option<u32> {
    let digits = name.strip_prefix("prt")?.strip_suffix(".cap")?;
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Drains a row source into numbered capture files, forever.
///
/// The first row of each job opens the next numbered file, provided capture
/// is enabled at that moment; a job whose first row arrives while capture
/// is disabled is discarded whole. End-of-job closes the file, persists the
/// counter and announces the finished file on the event channel. Storage
/// failures log and suppress output for the rest of the job; the row stream
/// itself is never interrupted.
pub async fn capture_to_store<S: RowSource>(
    store: Arc<Mutex<PrintStore>>,
    mut rows: S,
    events: mpsc::Sender<CaptureEvent>,
    enabled: Arc<AtomicBool>,
) {
    info!("Waiting for printout to capture");
    loop {
        let mut started: Option<Instant> = None;
        let mut writer: Option<(String, PackBitsWriter<BufWriter<File>>)> = None;
        let mut job_failed = false;

        while let Some(row) = rows.next_row().await {
            if started.is_none() {
                if !enabled.load(Ordering::Relaxed) {
                    continue;
                }
                started = Some(Instant::now());
            }
            if writer.is_none() && !job_failed {
                info!("Capture started");
                let (name, path) = store.lock().unwrap_or_else(|e| e.into_inner()).allocate();
                match File::create(&path) {
                    Ok(file) => {
                        writer = Some((name, PackBitsWriter::new(BufWriter::new(file))));
                    }
                    Err(e) => {
                        error!("Capture failed to open '{}': {}", path.display(), e);
                        job_failed = true;
                    }
                }
            }
            if let Some((_, encoder)) = &mut writer {
                if let Err(e) = encoder.write_bytes(row.as_bytes()) {
                    error!("Capture write failed: {}", e);
                    writer = None;
                    job_failed = true;
                }
            }
        }

        if let Some((name, encoder)) = writer.take() {
            match encoder.finish().and_then(|mut sink| sink.flush()) {
                Ok(()) => {
                    let _ = events.send(CaptureEvent::Completed { file: name }).await;
                }
                Err(e) => error!("Capture close failed: {}", e),
            }
        }
        if let Some(start) = started.take() {
            info!("Capture time: {} ms", start.elapsed().as_millis());
            info!("Capture finished");
            let store = store.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = store.save_settings() {
                error!("Failed to save capture settings: {}", e);
            }
        }
    }
}
