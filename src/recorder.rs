//! Event recording: console output and NDJSON persistence.
//!
//! Failures here are contained — a print or write error is logged and the
//! capture path carries on.

use crate::event::EventRecord;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::error;

/// Raw bodies are truncated to this many characters on the console.
const RAW_PRINT_LIMIT: usize = 500;

/// Prints captured events to the console and appends them to an NDJSON
/// file when a save path is configured.
pub struct Recorder {
    save_path: Option<PathBuf>,
    pretty: bool,
    quiet: bool,
    write_lock: Mutex<()>,
}

impl Recorder {
    pub fn new(save_path: Option<PathBuf>, pretty: bool, quiet: bool) -> Self {
        Recorder {
            save_path,
            pretty,
            quiet,
            write_lock: Mutex::new(()),
        }
    }

    /// Print (unless quiet) and persist (if configured) one event.
    pub async fn record(&self, event: &EventRecord) {
        if !self.quiet {
            print_event(event, self.pretty);
        }
        if let Some(path) = &self.save_path {
            if let Err(e) = self.append(path, event).await {
                error!(error = %e, path = %path.display(), "failed to save event");
            }
        }
    }

    async fn append(&self, path: &Path, event: &EventRecord) -> std::io::Result<()> {
        let line = serde_json::to_string(event).map_err(std::io::Error::other)?;
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

fn print_event(event: &EventRecord, pretty: bool) {
    println!("\n{}", "=".repeat(60));
    println!("[{}] {} {}", event.timestamp, event.method, event.path);
    println!("IP: {}", event.ip);

    if !event.query.is_empty() {
        let pairs: Vec<String> = event
            .query
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        println!("Query: {}", pairs.join("&"));
    }

    if !event.headers.is_empty() {
        println!("Headers:");
        for (name, value) in &event.headers {
            println!("  {name}: {value}");
        }
    }

    if let Some(json) = &event.json {
        println!("JSON Body:");
        let rendered = if pretty {
            serde_json::to_string_pretty(json)
        } else {
            serde_json::to_string(json)
        };
        match rendered {
            Ok(body) => println!("  {body}"),
            Err(e) => error!(error = %e, "failed to render JSON body"),
        }
    } else if !event.raw.is_empty() {
        let preview: String = event.raw.chars().take(RAW_PRINT_LIMIT).collect();
        println!("Raw Body: {preview}");
    }

    println!("{}", "=".repeat(60));
}
