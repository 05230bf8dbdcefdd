//! Audit log: an append-only record of every model exchange.
//!
//! Each entry is one text block:
//!
//! ```text
//! # <Header> at <timestamp>
//!
//! <body>
//! ```
//!
//! Entries are written with a single `write_all` on a file opened in append
//! mode, so concurrent gateways sharing a log never interleave partial blocks.

use chrono::{DateTime, Local};
use sleuth_core::provider::{ProviderRequest, Usage};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::result::{GatewayError, GatewayResponse};

/// Kind of audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditHeader {
    Request,
    Response,
    Error,
    Cancelled,
    CacheUsage,
}

impl std::fmt::Display for AuditHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditHeader::Request => "Request",
            AuditHeader::Response => "Response",
            AuditHeader::Error => "Error",
            AuditHeader::Cancelled => "Cancelled",
            AuditHeader::CacheUsage => "Cache usage",
        };
        f.write_str(s)
    }
}

/// A single audit log entry.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub timestamp: DateTime<Local>,
    pub header: AuditHeader,
    pub body: String,
}

impl AuditEntry {
    /// The block as written to disk.
    pub fn render(&self) -> String {
        format!(
            "# {} at {}\n\n{}\n",
            self.header,
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.body
        )
    }
}

/// Where audit entries go.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// Appends rendered entries to a file, creating it (and its directory) on first use.
pub struct FileSink {
    path: PathBuf,
    // Serializes writers within this process
    lock: Mutex<()>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, block: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(block.as_bytes())
    }
}

impl AuditSink for FileSink {
    fn record(&self, entry: &AuditEntry) {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Err(e) = self.append(&entry.render()) {
            // Auditing never fails a request
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to write audit log");
        }
    }
}

/// Mirrors entries into the tracing stream at trace level.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        tracing::trace!(header = %entry.header, body = %entry.body, "AUDIT");
    }
}

/// Fans entries out to its sinks.
#[derive(Default)]
pub struct AuditLogger {
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl AuditLogger {
    /// A logger that records nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Create a logger with the given sinks.
    pub fn with_sinks(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self { sinks }
    }

    /// Append to `path` and mirror to tracing.
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self::with_sinks(vec![Box::new(FileSink::new(path)), Box::new(TracingSink)])
    }

    pub fn is_enabled(&self) -> bool {
        !self.sinks.is_empty()
    }

    pub fn record(&self, header: AuditHeader, body: impl Into<String>) {
        if self.sinks.is_empty() {
            return;
        }
        let entry = AuditEntry {
            timestamp: Local::now(),
            header,
            body: body.into(),
        };
        for sink in &self.sinks {
            sink.record(&entry);
        }
    }

    pub fn request(&self, request: &ProviderRequest) {
        if self.is_enabled() {
            self.record(AuditHeader::Request, format_request(request));
        }
    }

    pub fn response(&self, response: &GatewayResponse) {
        if self.is_enabled() {
            self.record(AuditHeader::Response, format_response(response));
        }
    }

    pub fn error(&self, error: &dyn std::fmt::Display) {
        self.record(AuditHeader::Error, error.to_string());
    }

    pub fn cancelled(&self) {
        self.record(AuditHeader::Cancelled, "Request cancelled");
    }

    pub fn cache_usage(&self, usage: &Usage) {
        if let Some(cached) = usage.cached_tokens {
            self.record(
                AuditHeader::CacheUsage,
                format!(
                    "{cached} of {} prompt tokens served from cache",
                    usage.prompt_tokens
                ),
            );
        }
    }

    pub fn gateway_error(&self, error: &GatewayError) {
        self.error(error);
    }
}

/// Render a request the way a human would want to read it back.
pub fn format_request(request: &ProviderRequest) -> String {
    let mut out = format!("Model: {}\n", request.model);
    if !request.tools.is_empty() {
        let names: Vec<&str> = request.tools.iter().map(|t| t.name.as_str()).collect();
        out.push_str(&format!(
            "Tools ({:?}): {}\n",
            request.tool_choice,
            names.join(", ")
        ));
    }
    for message in &request.messages {
        out.push_str(&format!("\n## {}\n{}\n", message.role, message.content));
        for call in &message.tool_calls {
            out.push_str(&format!("-> {}({})\n", call.name, call.arguments));
        }
    }
    out
}

/// Render a response for the audit log.
pub fn format_response(response: &GatewayResponse) -> String {
    let mut out = response.text.clone();
    for call in &response.tool_calls {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("Tool call: {}({})", call.name, call.arguments));
    }
    out
}
