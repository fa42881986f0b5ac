// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The append-only durability engine: logs every write command as an
//! encoded RESP array, replays them on startup, and compacts the log via a
//! background snapshot thread (`BGREWRITEAOF`).
//!
//! There is no fork-and-snapshot here — the source relies on copy-on-write
//! pages from `fork()`, which has no portable safe-Rust equivalent. Instead
//! the caller hands over an already-cloned command snapshot (cheap `Bytes`
//! clones, see [`crate::keyspace::Keyspace::snapshot_commands`]) and this
//! module only owns the file I/O and the rewrite-buffer bookkeeping.

use crate::config::AppendFsync;
use crate::error::{Error, Result};
use crate::resp::RespValue;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

enum RewriteOutcome {
    Success,
    Failure(String),
}

struct RewriteState {
    in_progress: Arc<AtomicBool>,
    outcome: Arc<Mutex<Option<RewriteOutcome>>>,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl RewriteState {
    fn new() -> Self {
        Self {
            in_progress: Arc::new(AtomicBool::new(false)),
            outcome: Arc::new(Mutex::new(None)),
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// The append-only log: an in-memory buffer of encoded commands, flushed to
/// `path` according to `fsync` policy, with a background rewrite path for
/// compaction.
pub struct Durability {
    path: PathBuf,
    tmp_path: PathBuf,
    file: File,
    buffer: Vec<u8>,
    fsync: AppendFsync,
    flush_interval: Duration,
    last_flush: Instant,
    rewrite: RewriteState,
}

impl Durability {
    pub fn open(path: impl AsRef<Path>, fsync: AppendFsync, flush_interval_secs: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let tmp_path = path.with_extension("rewrite.tmp");
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            tmp_path,
            file,
            buffer: Vec::new(),
            fsync,
            flush_interval: Duration::from_secs(flush_interval_secs.max(1)),
            last_flush: Instant::now(),
            rewrite: RewriteState::new(),
        })
    }

    /// Encodes `command` (a full RESP array, e.g. `["SET", "k", "v"]`) into
    /// the in-memory buffer, and into the rewrite buffer too if a
    /// compaction is currently in flight.
    pub fn append(&mut self, command: &RespValue) -> Result<()> {
        crate::resp::encode(command, &mut self.buffer);
        if self.rewrite.in_progress.load(Ordering::Acquire) {
            let mut rewrite_buf = self.rewrite.buffer.lock().expect("rewrite buffer mutex poisoned");
            crate::resp::encode(command, &mut rewrite_buf);
        }
        if self.fsync == AppendFsync::Always {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes the in-memory buffer to disk, fsync-ing if the policy demands it.
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.file.write_all(&self.buffer)?;
        if self.fsync != AppendFsync::No {
            self.file.sync_data()?;
        }
        self.buffer.clear();
        self.last_flush = Instant::now();
        Ok(())
    }

    /// Should be called periodically by the event loop: flushes on the
    /// `everysec` schedule and finalizes a completed background rewrite.
    pub fn tick(&mut self) {
        if self.fsync == AppendFsync::EverySec && self.last_flush.elapsed() >= self.flush_interval {
            if let Err(e) = self.flush() {
                log::warn!("periodic AOF flush failed: {e}");
            }
        }
        self.poll_rewrite_completion();
    }

    /// Reads the log and decodes every RESP array in it. Stops (without
    /// erroring) at the first malformed or truncated record, logging a
    /// diagnostic — a mid-record tear at the tail of a crashed process is
    /// expected, not an error condition.
    pub fn load(&self) -> Result<Vec<RespValue>> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let pool = crate::segment::SegmentPool::new();
        let mut buf = crate::segmented_buffer::SegmentedBuffer::new(pool);
        buf.append(&bytes);

        let mut commands = Vec::new();
        loop {
            match crate::resp::decode(&mut buf) {
                Ok(Some(value)) => commands.push(value),
                Ok(None) => {
                    if !buf.is_empty() {
                        log::warn!("AOF '{}' ends with a truncated record; stopping replay", self.path.display());
                    }
                    break;
                }
                Err(e) => {
                    log::error!("AOF '{}' contains a corrupt record ({e}); stopping replay", self.path.display());
                    break;
                }
            }
        }
        Ok(commands)
    }

    #[must_use]
    pub fn is_rewriting(&self) -> bool {
        self.rewrite.in_progress.load(Ordering::Acquire)
    }

    /// Spawns a background thread that writes `snapshot` out to a temporary
    /// file. Concurrent writes are buffered via [`Durability::append`] and
    /// concatenated onto the rewrite output once the thread finishes.
    pub fn start_rewrite(&mut self, snapshot: Vec<RespValue>) -> Result<()> {
        if self.rewrite.in_progress.swap(true, Ordering::AcqRel) {
            return Err(Error::RewriteInProgress);
        }
        *self.rewrite.buffer.lock().expect("rewrite buffer mutex poisoned") = Vec::new();
        *self.rewrite.outcome.lock().expect("rewrite outcome mutex poisoned") = None;

        let tmp_path = self.tmp_path.clone();
        let outcome = Arc::clone(&self.rewrite.outcome);

        std::thread::spawn(move || {
            let result = (|| -> std::io::Result<()> {
                let mut out = Vec::new();
                for command in &snapshot {
                    crate::resp::encode(command, &mut out);
                }
                fs::write(&tmp_path, &out)?;
                Ok(())
            })();

            let outcome_value = match result {
                Ok(()) => RewriteOutcome::Success,
                Err(e) => RewriteOutcome::Failure(e.to_string()),
            };
            *outcome.lock().expect("rewrite outcome mutex poisoned") = Some(outcome_value);
            // `in_progress` is cleared by `poll_rewrite_completion` on the
            // main loop once it has finalized (or discarded) the output, not
            // here — otherwise a second rewrite could race the first one's
            // finalization.
        });
        Ok(())
    }

    fn poll_rewrite_completion(&mut self) {
        let Some(outcome) = self
            .rewrite
            .outcome
            .lock()
            .expect("rewrite outcome mutex poisoned")
            .take()
        else {
            return;
        };

        match outcome {
            RewriteOutcome::Success => {
                if let Err(e) = self.finalize_rewrite() {
                    log::error!("AOF rewrite finalization failed: {e}");
                    let _ = fs::remove_file(&self.tmp_path);
                }
            }
            RewriteOutcome::Failure(msg) => {
                log::error!("AOF rewrite failed: {msg}");
                let _ = fs::remove_file(&self.tmp_path);
            }
        }
        self.rewrite.buffer.lock().expect("rewrite buffer mutex poisoned").clear();
        self.rewrite.in_progress.store(false, Ordering::Release);
    }

    fn finalize_rewrite(&mut self) -> Result<()> {
        let rewrite_buf = self.rewrite.buffer.lock().expect("rewrite buffer mutex poisoned");
        if !rewrite_buf.is_empty() {
            let mut tmp = OpenOptions::new().append(true).open(&self.tmp_path)?;
            tmp.write_all(&rewrite_buf)?;
            tmp.sync_data()?;
        }
        drop(rewrite_buf);

        fs::rename(&self.tmp_path, &self.path)?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.buffer.clear();
        log::info!("AOF rewrite completed: '{}'", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::Bytes;
    use test_log::test;

    fn cmd(parts: &[&str]) -> RespValue {
        RespValue::Array(parts.iter().map(|p| RespValue::bulk(Bytes::from(*p))).collect())
    }

    #[test]
    fn append_and_flush_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.aof");

        let mut d = Durability::open(&path, AppendFsync::Always, 1).unwrap();
        d.append(&cmd(&["SET", "a", "1"])).unwrap();
        d.append(&cmd(&["SET", "b", "2"])).unwrap();

        let loaded = d.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], cmd(&["SET", "a", "1"]));
    }

    #[test]
    fn load_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.aof");
        let d = Durability::open(&path, AppendFsync::No, 1).unwrap();
        assert!(d.load().unwrap().is_empty());
    }

    #[test]
    fn second_rewrite_while_in_progress_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.aof");
        let mut d = Durability::open(&path, AppendFsync::Always, 1).unwrap();

        d.start_rewrite(vec![cmd(&["SET", "a", "1"])]).unwrap();
        assert!(matches!(d.start_rewrite(vec![]), Err(Error::RewriteInProgress)));
    }

    #[test]
    fn rewrite_finalizes_and_replaces_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.aof");
        let mut d = Durability::open(&path, AppendFsync::Always, 1).unwrap();
        d.append(&cmd(&["SET", "stale", "1"])).unwrap();
        d.flush().unwrap();

        d.start_rewrite(vec![cmd(&["SET", "fresh", "2"])]).unwrap();
        d.append(&cmd(&["SET", "during-rewrite", "3"])).unwrap();

        // Poll until the background thread has published its outcome and
        // the main loop's tick has finalized it.
        for _ in 0..200 {
            d.tick();
            if !d.is_rewriting() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!d.is_rewriting());

        let loaded = d.load().unwrap();
        assert_eq!(loaded, vec![cmd(&["SET", "fresh", "2"]), cmd(&["SET", "during-rewrite", "3"])]);
    }
}
