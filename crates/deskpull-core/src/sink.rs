use std::fs;
use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::models::Ticket;
use crate::traits::TicketSink;

/// Writes each ticket as one JSON line to
/// `<root>/<YYYY>/<MM>/<DD>_<HHMMSS>_<label>.txt`, placed by creation time
/// in UTC.
#[derive(Debug, Clone)]
pub struct FileSink {
    root: PathBuf,
}

impl FileSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

/// Target file of `ticket` under `root`.
pub fn output_path(root: &Path, ticket: &Ticket) -> PathBuf {
    let at = ticket.placement_time();
    let label: String = ticket
        .label()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    root.join(at.format("%Y").to_string())
        .join(at.format("%m").to_string())
        .join(format!("{}_{label}.txt", at.format("%d_%H%M%S")))
}

impl TicketSink for FileSink {
    fn write(&self, ticket: &Ticket) -> Result<PathBuf, AppError> {
        let path = output_path(&self.root, ticket);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut line = serde_json::to_string(ticket)?;
        line.push('\n');
        fs::write(&path, line)?;
        Ok(path)
    }
}
