//! Event sources and the state tracking front-end
//!
//! The history core never invents quarks or decides what an interval means.
//! That is the job of this layer: an `EventSource` yields timestamped
//! attribute changes, a `QuarkResolver` pins attribute paths to stable
//! quarks, and `StateTracker` turns consecutive changes of one attribute
//! into closed intervals fed to the pipeline.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::history::error::HistoryError;
use crate::history::pipeline::HistoryPipeline;
use crate::history::value::StateValue;

/// Errors from event parsing and registry persistence
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error at line {line}: {reason}")]
    Parse { line: u64, reason: String },

    #[error("registry error: {0}")]
    Registry(#[from] serde_json::Error),

    #[error(transparent)]
    History(#[from] HistoryError),
}

pub type SourceResult<T> = Result<T, SourceError>;

/// One attribute change observed in the input
#[derive(Debug, Clone, PartialEq)]
pub struct StateEvent {
    pub timestamp: i64,
    /// Hierarchical attribute path, e.g. `cpu/0/status`
    pub path: String,
    pub value: StateValue,
}

/// A restartable stream of state events, ordered by timestamp
pub trait EventSource {
    /// Timestamp of the first event; the history starts here
    fn start_time(&self) -> i64;

    /// The next event, `None` at the end of the input
    fn next_event(&mut self) -> SourceResult<Option<StateEvent>>;

    /// Rewind to the first event
    fn reset(&mut self) -> SourceResult<()>;
}

/// Maps attribute paths to stable quarks
pub trait QuarkResolver {
    /// Quark for `path`, allocating one on first sight
    fn quark_for(&mut self, path: &str) -> u32;

    /// Reverse lookup
    fn path_of(&self, quark: u32) -> Option<&str>;
}

/// Path-to-quark registry, persisted as JSON so a reopened history can
/// resolve the same paths to the same quarks
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AttributeRegistry {
    /// Paths indexed by quark
    paths: Vec<String>,
    #[serde(skip)]
    by_path: HashMap<String, u32>,
}

impl AttributeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Quark of `path` if it is registered, without allocating one
    pub fn lookup(&self, path: &str) -> Option<u32> {
        self.by_path.get(path).copied()
    }

    pub fn to_json(&self) -> SourceResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> SourceResult<Self> {
        let mut registry: Self = serde_json::from_slice(bytes)?;
        registry.by_path = registry
            .paths
            .iter()
            .enumerate()
            .map(|(quark, path)| (path.clone(), quark as u32))
            .collect();
        Ok(registry)
    }
}

impl QuarkResolver for AttributeRegistry {
    fn quark_for(&mut self, path: &str) -> u32 {
        if let Some(&quark) = self.by_path.get(path) {
            return quark;
        }
        let quark = self.paths.len() as u32;
        self.paths.push(path.to_string());
        self.by_path.insert(path.to_string(), quark);
        debug!(quark, path, "registered attribute");
        quark
    }

    fn path_of(&self, quark: u32) -> Option<&str> {
        self.paths.get(quark as usize).map(String::as_str)
    }
}

/// Turns attribute changes into closed intervals.
///
/// An interval is emitted when an attribute's value changes: it spans from
/// the previous change up to one unit before the new one. `finish` flushes
/// the last open value of every attribute.
pub struct StateTracker<'a> {
    pipeline: &'a HistoryPipeline,
    current: HashMap<u32, (i64, StateValue)>,
}

impl<'a> StateTracker<'a> {
    pub fn new(pipeline: &'a HistoryPipeline) -> Self {
        Self {
            pipeline,
            current: HashMap::new(),
        }
    }

    /// Apply one change of `quark` at `timestamp`
    pub fn apply(&mut self, quark: u32, timestamp: i64, value: StateValue) -> SourceResult<()> {
        match self.current.get(&quark) {
            Some((since, _)) if timestamp < *since => {
                warn!(quark, timestamp, since, "out-of-order event dropped");
                return Ok(());
            }
            Some((_, previous)) if *previous == value => {
                // Same value, the open interval just keeps running
                return Ok(());
            }
            Some(&(since, _)) if timestamp > since => {
                if let Some((_, previous)) = self.current.insert(quark, (timestamp, value)) {
                    self.pipeline
                        .insert_past_state(since, timestamp - 1, quark, previous)?;
                }
            }
            // First sighting, or a re-change at the same timestamp: nothing
            // closed yet, the new value simply takes over
            _ => {
                self.current.insert(quark, (timestamp, value));
            }
        }
        Ok(())
    }

    /// Close every still-open value at `end_time` and return how many
    /// intervals were flushed
    pub fn finish(&mut self, end_time: i64) -> SourceResult<usize> {
        let mut flushed = 0;
        for (quark, (since, value)) in self.current.drain() {
            if since > end_time {
                warn!(quark, since, end_time, "open state starts past the end, dropped");
                continue;
            }
            self.pipeline
                .insert_past_state(since, end_time, quark, value)?;
            flushed += 1;
        }
        Ok(flushed)
    }
}

/// Line-based event source: `timestamp|attribute/path|value` per line.
///
/// Values parse as `null`, then integer, then float, anything else is a
/// string. Blank lines and lines starting with `#` are skipped.
pub struct TextEventSource {
    path: PathBuf,
    reader: BufReader<File>,
    start_time: i64,
    line: u64,
}

impl TextEventSource {
    pub fn open<P: AsRef<Path>>(path: P) -> SourceResult<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = BufReader::new(File::open(&path)?);
        let mut source = Self {
            path,
            reader,
            start_time: 0,
            line: 0,
        };

        // The first event pins the history start
        match source.next_event()? {
            Some(event) => source.start_time = event.timestamp,
            None => {
                return Err(SourceError::Parse {
                    line: source.line,
                    reason: "input contains no events".into(),
                })
            }
        }
        source.reset()?;
        Ok(source)
    }

    fn parse_line(&self, text: &str) -> SourceResult<StateEvent> {
        let parse_err = |reason: &str| SourceError::Parse {
            line: self.line,
            reason: reason.to_string(),
        };

        let mut fields = text.splitn(3, '|');
        let timestamp = fields
            .next()
            .ok_or_else(|| parse_err("missing timestamp"))?
            .trim()
            .parse::<i64>()
            .map_err(|_| parse_err("timestamp is not an integer"))?;
        let path = fields
            .next()
            .ok_or_else(|| parse_err("missing attribute path"))?
            .trim();
        if path.is_empty() {
            return Err(parse_err("empty attribute path"));
        }
        let raw = fields
            .next()
            .ok_or_else(|| parse_err("missing value field"))?
            .trim();

        let value = if raw.eq_ignore_ascii_case("null") {
            StateValue::Null
        } else if let Ok(n) = raw.parse::<i64>() {
            StateValue::Long(n)
        } else if let Ok(f) = raw.parse::<f64>() {
            StateValue::Double(f)
        } else {
            StateValue::Str(raw.to_string())
        };

        Ok(StateEvent {
            timestamp,
            path: path.to_string(),
            value,
        })
    }
}

impl EventSource for TextEventSource {
    fn start_time(&self) -> i64 {
        self.start_time
    }

    fn next_event(&mut self) -> SourceResult<Option<StateEvent>> {
        loop {
            let mut text = String::new();
            if self.reader.read_line(&mut text)? == 0 {
                return Ok(None);
            }
            self.line += 1;

            let trimmed = text.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            return self.parse_line(trimmed).map(Some);
        }
    }

    fn reset(&mut self) -> SourceResult<()> {
        self.reader.seek(SeekFrom::Start(0))?;
        self.line = 0;
        Ok(())
    }
}

impl std::fmt::Debug for TextEventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextEventSource")
            .field("path", &self.path)
            .field("start_time", &self.start_time)
            .finish()
    }
}
