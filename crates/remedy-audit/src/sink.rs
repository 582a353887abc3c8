//! Best-effort mirrors of the audit chain
//!
//! Sinks receive a copy of every entry after it is sealed. Delivery is a
//! notification only: a sink that fails logs and moves on, and the chain's
//! correctness never depends on it.

use crate::entry::AuditEntry;
use crate::error::AuditError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use tokio::sync::{mpsc, oneshot};

/// Receiver of sealed audit entries
pub trait AuditSink: Send + Sync {
    /// Deliver one entry; must not block for long and must not panic
    fn deliver(&self, entry: &AuditEntry);
}

/// Mirrors entries into the `tracing` log stream
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn deliver(&self, entry: &AuditEntry) {
        tracing::info!(
            target: "remedy::audit",
            seq = entry.sequence,
            actor = %entry.actor,
            resource = %entry.resource,
            action = %entry.action,
            hash = %entry.hash.short(),
            "{}",
            entry.result
        );
    }
}

/// Appends entries to a JSON-lines file
///
/// One entry per line, in chain order. `deliver` only queues the entry; a
/// dedicated writer thread owns the file, so a slow disk never holds up the
/// chain's append lock. Write failures are logged and dropped.
#[derive(Debug)]
pub struct JsonlFileSink {
    path: PathBuf,
    queue: mpsc::UnboundedSender<WriterMessage>,
}

#[derive(Debug)]
enum WriterMessage {
    Entry(Box<AuditEntry>),
    Flush(oneshot::Sender<()>),
}

impl JsonlFileSink {
    /// Open (or create) the log file in append mode and start its writer
    ///
    /// # Errors
    /// Returns error if the file or its parent directory cannot be created,
    /// or the writer thread cannot be started
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let (queue, rx) = mpsc::unbounded_channel();
        let writer = LineWriter {
            path: path.clone(),
            out: BufWriter::new(file),
        };
        thread::Builder::new()
            .name("audit-writer".to_string())
            .spawn(move || writer.run(rx))?;
        Ok(Self { path, queue })
    }

    /// Path of the underlying file
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait until every entry delivered so far is on disk
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.queue.send(WriterMessage::Flush(ack)).is_err() || done.await.is_err() {
            tracing::warn!(path = %self.path.display(), "audit writer stopped before flush");
        }
    }
}

impl AuditSink for JsonlFileSink {
    fn deliver(&self, entry: &AuditEntry) {
        if self.queue.send(WriterMessage::Entry(Box::new(entry.clone()))).is_err() {
            tracing::warn!(
                path = %self.path.display(),
                seq = entry.sequence,
                "audit writer stopped; entry not mirrored"
            );
        }
    }
}

/// Owned by the writer thread
struct LineWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl LineWriter {
    fn run(mut self, mut rx: mpsc::UnboundedReceiver<WriterMessage>) {
        while let Some(message) = rx.blocking_recv() {
            let mut acks = Vec::new();
            self.handle(message, &mut acks);
            // Drain whatever queued up meanwhile, then flush once
            while let Ok(message) = rx.try_recv() {
                self.handle(message, &mut acks);
            }
            if let Err(e) = self.out.flush() {
                tracing::warn!(path = %self.path.display(), error = %e, "audit sink flush failed");
            }
            for ack in acks {
                let _ = ack.send(());
            }
        }
        let _ = self.out.flush();
    }

    fn handle(&mut self, message: WriterMessage, acks: &mut Vec<oneshot::Sender<()>>) {
        match message {
            WriterMessage::Entry(entry) => {
                if let Err(e) = self.write_line(&entry) {
                    tracing::warn!(
                        path = %self.path.display(),
                        seq = entry.sequence,
                        error = %e,
                        "audit sink write failed"
                    );
                }
            }
            WriterMessage::Flush(ack) => acks.push(ack),
        }
    }

    fn write_line(&mut self, entry: &AuditEntry) -> Result<(), AuditError> {
        serde_json::to_writer(&mut self.out, entry)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }
}

/// Load entries previously written by [`JsonlFileSink`]
///
/// # Errors
/// Returns error if the file cannot be read or a line is not a valid entry
pub fn read_jsonl(path: impl AsRef<Path>) -> Result<Vec<AuditEntry>, AuditError> {
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line).map_err(|source| AuditError::MalformedLine {
            line: index + 1,
            source,
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Bounded, evictable view of the most recent entries
///
/// This is a projection for status reporting; evicting from it never touches
/// the chain itself.
#[derive(Debug)]
pub struct RecentEvents {
    capacity: usize,
    buffer: Mutex<VecDeque<AuditEntry>>,
}

impl RecentEvents {
    /// Create a ring buffer holding at most `capacity` entries
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffer: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    /// Retained entries, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<AuditEntry> {
        self.buffer.lock().iter().cloned().collect()
    }

    /// Maximum number of retained entries
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl AuditSink for RecentEvents {
    fn deliver(&self, entry: &AuditEntry) {
        let mut buffer = self.buffer.lock();
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(entry.clone());
    }
}
