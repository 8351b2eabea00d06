//! # Structured Event Log
//!
//! Append-only text log consumed by the experiment harness. One line per
//! event, flushed immediately so the file parses even after the process
//! is killed mid-run:
//!
//! ```text
//! timestamp_ms,EVENT,msg_type,msg_id
//! ```
//!
//! `SEND` is recorded for every datagram the node transmits; `RECEIVE`
//! only for a GOSSIP observed for the first time. The file is named
//! `node_<port>.log` after the actual bound port.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::identity::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Send,
    Receive,
}

impl Event {
    pub fn as_str(self) -> &'static str {
        match self {
            Event::Send => "SEND",
            Event::Receive => "RECEIVE",
        }
    }
}

#[derive(Debug)]
pub struct EventLog {
    file: File,
    path: PathBuf,
}

impl EventLog {
    /// Create (truncating) `node_<port>.log` under `dir`.
    pub fn create(dir: &Path, port: u16) -> io::Result<Self> {
        let path = dir.join(format!("node_{port}.log"));
        let file = File::create(&path)?;
        Ok(Self { file, path })
    }

    /// Append one event line and flush. Write errors are swallowed; the
    /// log is observability, not protocol state.
    pub fn record(&mut self, event: Event, msg_type: &str, msg_id: &str) {
        let _ = writeln!(
            self.file,
            "{},{},{},{}",
            now_ms(),
            event.as_str(),
            msg_type,
            msg_id
        );
        let _ = self.file.flush();
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_carry_four_comma_separated_fields() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = EventLog::create(dir.path(), 7777).unwrap();
        assert!(log.path().ends_with("node_7777.log"));

        log.record(Event::Send, "HELLO", "HELLO_n1");
        log.record(Event::Receive, "GOSSIP", "n1_17");

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Vec<&str> = lines[0].split(',').collect();
        assert_eq!(first.len(), 4);
        assert!(first[0].parse::<u64>().is_ok());
        assert_eq!(&first[1..], &["SEND", "HELLO", "HELLO_n1"]);

        let second: Vec<&str> = lines[1].split(',').collect();
        assert_eq!(&second[1..], &["RECEIVE", "GOSSIP", "n1_17"]);
    }
}
