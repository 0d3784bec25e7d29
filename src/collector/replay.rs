//! Replay collector: feeds recorded motion readings from a JSON-lines stream.
//!
//! Each line is a [`MotionReading`](super::types::MotionReading) or the word
//! `simulate`. Lines are read on a background thread and handed to the
//! consumer over a bounded channel, the same way a live device callback
//! would push samples.

use crate::collector::types::SensorInput;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Where readings come from.
pub enum SampleSource {
    /// A JSON-lines file
    File(PathBuf),
    /// Standard input
    Stdin,
    /// Any buffered reader (used by tests and embedders)
    Reader(Box<dyn BufRead + Send>),
}

impl std::fmt::Debug for SampleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleSource::File(path) => write!(f, "File({path:?})"),
            SampleSource::Stdin => write!(f, "Stdin"),
            SampleSource::Reader(_) => write!(f, "Reader(..)"),
        }
    }
}

impl SampleSource {
    /// Build a source from a CLI argument: `-` means stdin.
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            SampleSource::Stdin
        } else {
            SampleSource::File(PathBuf::from(arg))
        }
    }

    fn open(self) -> Result<Box<dyn BufRead + Send>, CollectorError> {
        match self {
            SampleSource::File(path) => {
                let file = File::open(&path).map_err(|e| {
                    CollectorError::SensorUnavailable(format!("cannot open {path:?}: {e}"))
                })?;
                Ok(Box::new(BufReader::new(file)))
            }
            SampleSource::Stdin => Ok(Box::new(BufReader::new(std::io::stdin()))),
            SampleSource::Reader(reader) => Ok(reader),
        }
    }
}

/// Configuration for the replay collector.
#[derive(Debug, Clone, Default)]
pub struct CollectorConfig {
    /// Sleep between readings according to their `timestampMs` offsets
    pub realtime: bool,
}

/// Errors that can occur during collection.
#[derive(Debug)]
pub enum CollectorError {
    AlreadyRunning,
    /// The sensor source cannot deliver samples
    SensorUnavailable(String),
}

impl std::fmt::Display for CollectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectorError::AlreadyRunning => write!(f, "Collector is already running"),
            CollectorError::SensorUnavailable(msg) => write!(f, "Sensor unavailable: {msg}"),
        }
    }
}

impl std::error::Error for CollectorError {}

/// Collector that replays a recorded motion stream.
pub struct ReplayCollector {
    config: CollectorConfig,
    source: Option<SampleSource>,
    sender: Option<Sender<SensorInput>>,
    receiver: Receiver<SensorInput>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl ReplayCollector {
    /// Create a new collector over the given source.
    pub fn new(source: SampleSource, config: CollectorConfig) -> Self {
        // Use a bounded channel to prevent unbounded memory growth
        let (sender, receiver) = bounded(10_000);

        Self {
            config,
            source: Some(source),
            sender: Some(sender),
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    /// Create a collector over an in-memory or otherwise custom reader.
    pub fn from_reader<R: BufRead + Send + 'static>(reader: R) -> Self {
        Self::new(
            SampleSource::Reader(Box::new(reader)),
            CollectorConfig::default(),
        )
    }

    /// Start delivering readings from a background thread.
    ///
    /// A source can only be replayed once; starting again after it has been
    /// consumed reports the sensor as unavailable.
    pub fn start(&mut self) -> Result<(), CollectorError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRunning);
        }

        let (source, sender) = match (self.source.take(), self.sender.take()) {
            (Some(source), Some(sender)) => (source, sender),
            _ => {
                return Err(CollectorError::SensorUnavailable(
                    "sample source already consumed".to_string(),
                ))
            }
        };
        let reader = source.open()?;

        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let realtime = self.config.realtime;

        let handle = thread::spawn(move || {
            replay_lines(reader, sender, running.clone(), realtime);
            running.store(false, Ordering::SeqCst);
        });

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop delivering readings.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            // A reader blocked on stdin cannot be interrupted; leave it detached
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }

    /// Check if the collector is currently delivering readings.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the receiver for sensor input.
    ///
    /// The channel disconnects once the source is exhausted (or fails to
    /// open) and every reading has been received.
    pub fn receiver(&self) -> Receiver<SensorInput> {
        self.receiver.clone()
    }

    /// Try to receive an input without blocking.
    pub fn try_recv(&self) -> Option<SensorInput> {
        self.receiver.try_recv().ok()
    }
}

fn replay_lines(
    reader: Box<dyn BufRead + Send>,
    sender: Sender<SensorInput>,
    running: Arc<AtomicBool>,
    realtime: bool,
) {
    let mut last_offset: Option<u64> = None;

    for (index, line) in reader.lines().enumerate() {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let line = match line {
            Ok(line) => line,
            // Not UTF-8; the reader is already past the line
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                tracing::warn!("Skipping unreadable line {}: {}", index + 1, e);
                continue;
            }
            Err(e) => {
                tracing::warn!("Sensor stream read failed: {}", e);
                break;
            }
        };

        let input = match SensorInput::parse_line(&line) {
            Ok(Some(input)) => input,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("Skipping malformed reading on line {}: {}", index + 1, e);
                continue;
            }
        };

        if realtime {
            if let Some(offset) = input.timestamp_ms() {
                if let Some(previous) = last_offset {
                    thread::sleep(Duration::from_millis(offset.saturating_sub(previous)));
                }
                last_offset = Some(offset);
            }
        }

        if sender.send(input).is_err() {
            break;
        }
    }
}
