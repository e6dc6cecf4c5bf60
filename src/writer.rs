use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::Path;
use std::sync::mpsc::{self, SyncSender};
use std::thread::{self, JoinHandle};

use crate::error::{Error, Result};
use crate::osm::OsmElement;

/// Committed batches waiting for the output thread.
const QUEUED_BATCHES: usize = 16;

/// Streams committed batches to a JSON-lines file (or stdout) from a
/// background thread.
pub struct BatchWriter {
    tx: Option<SyncSender<Vec<OsmElement>>>,
    output_thread: Option<JoinHandle<io::Result<u64>>>,
}

impl BatchWriter {
    /// Open the output. An existing file is only replaced when `overwrite`
    /// is set.
    pub fn create(output_path: Option<&Path>, overwrite: bool) -> Result<Self> {
        let writer: Box<dyn Write + Send> = match output_path {
            Some(path) => Box::new(BufWriter::new(open_output(path, overwrite)?)),
            None => Box::new(BufWriter::new(std::io::stdout())),
        };
        Ok(Self::spawn(writer))
    }

    /// Write into any sink, e.g. an in-memory buffer.
    pub fn spawn(mut writer: Box<dyn Write + Send>) -> Self {
        let (tx, rx) = mpsc::sync_channel::<Vec<OsmElement>>(QUEUED_BATCHES);

        let output_thread = thread::spawn(move || -> io::Result<u64> {
            let mut feature_count = 0u64;

            while let Ok(batch) = rx.recv() {
                for element in &batch {
                    serde_json::to_writer(&mut writer, element)?;
                    writer.write_all(b"\n")?;
                    feature_count += 1;
                }
            }

            writer.flush()?;
            Ok(feature_count)
        });

        BatchWriter {
            tx: Some(tx),
            output_thread: Some(output_thread),
        }
    }

    /// Commit one batch. Empty batches are skipped.
    pub fn write_batch(&mut self, batch: Vec<OsmElement>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let sent = self.tx.as_ref().map(|tx| tx.send(batch).is_ok());
        if sent == Some(true) {
            return Ok(());
        }
        // The output thread is gone; finish() reports why.
        Err(self.join().err().unwrap_or_else(|| {
            Error::Output("output thread stopped accepting batches".to_string())
        }))
    }

    /// Flush everything and return the number of features written.
    pub fn finish(mut self) -> Result<u64> {
        self.join()
    }

    fn join(&mut self) -> Result<u64> {
        // Close the channel to signal completion
        drop(self.tx.take());

        match self.output_thread.take() {
            Some(handle) => Ok(handle
                .join()
                .map_err(|_| Error::Output("output thread panicked".to_string()))??),
            None => Err(Error::Output("output already finished".to_string())),
        }
    }
}

impl Drop for BatchWriter {
    fn drop(&mut self) {
        if self.output_thread.is_some()
            && let Err(e) = self.join()
        {
            log::error!("Failed to finish output: {}", e);
        }
    }
}

fn open_output(path: &Path, overwrite: bool) -> Result<File> {
    if overwrite {
        return Ok(File::create(path)?);
    }
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => Error::OutputExists(path.display().to_string()),
            _ => e.into(),
        })
}
