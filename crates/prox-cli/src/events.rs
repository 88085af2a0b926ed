//! JSON-lines contact event input.
//!
//! One event per line, e.g. `{"type":"contact_begin","a":1,"b":2}`.
//! Blank lines and `#` comments are skipped; malformed lines are logged and
//! skipped so one bad record never stops a session.

use std::fs;
use std::io::BufRead;
use std::path::Path;

use anyhow::{Context, Result};
use prox_link::ContactEvent;
use tokio::sync::mpsc;

/// Parse one line. `None` for blanks, comments and malformed input.
pub fn parse_line(line: &str) -> Option<ContactEvent> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(ev) => Some(ev),
        Err(e) => {
            tracing::warn!("skipping malformed event {line:?}: {e}");
            None
        }
    }
}

/// Read a whole scenario file.
pub fn read_script(path: &Path) -> Result<Vec<ContactEvent>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(content.lines().filter_map(parse_line).collect())
}

/// Forward stdin events on a plain thread until EOF or until the receiver
/// is gone. Dropping `tx` at EOF is what ends the session.
pub fn spawn_stdin_reader(tx: mpsc::Sender<ContactEvent>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    tracing::warn!("stdin read failed: {e}");
                    break;
                }
            };
            if let Some(ev) = parse_line(&line)
                && tx.blocking_send(ev).is_err()
            {
                break;
            }
        }
        tracing::debug!("stdin closed");
    })
}
