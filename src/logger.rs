use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::diff::diff_json;

pub(crate) type LogSink = Box<dyn Fn(&str, &str) + Send + Sync>;

pub enum MessageLogMode {
    Full,
    Diffed,
}

/// NDJSON record of upstream traffic, one object per line.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous_status: Option<Value>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            mode,
            file,
            previous_status: None,
        })
    }

    pub fn log_request(&mut self, method: &str, path: &str, body: Option<&Value>) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "method": method,
            "path": path,
            "body": body,
        });
        self.write_line(&entry);
    }

    pub fn log_command(&mut self, device_id: &str, body: &Value, acknowledged: Option<bool>) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "cmd",
            "device": device_id,
            "body": body,
            "ack": acknowledged,
        });
        self.write_line(&entry);
    }

    pub fn log_status(&mut self, status: u16, body: &Value) {
        match self.mode {
            MessageLogMode::Full => {
                let entry = json!({
                    "ts": Utc::now().to_rfc3339(),
                    "dir": "status",
                    "status": status,
                    "body": body,
                });
                self.write_line(&entry);
            }
            MessageLogMode::Diffed => {
                let entry = match self.previous_status.as_ref() {
                    None => json!({
                        "ts": Utc::now().to_rfc3339(),
                        "dir": "status",
                        "status": status,
                        "full": true,
                        "body": body,
                    }),
                    Some(prev) => {
                        let mut changes = Vec::new();
                        diff_json(prev, body, "", &mut changes);
                        let changes: Vec<Value> = changes
                            .into_iter()
                            .map(|(path, old, new)| {
                                json!({ "path": path, "old": old, "new": new })
                            })
                            .collect();
                        json!({
                            "ts": Utc::now().to_rfc3339(),
                            "dir": "status",
                            "status": status,
                            "changes": changes,
                        })
                    }
                };
                self.write_line(&entry);
                self.previous_status = Some(body.clone());
            }
        }
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}

/// Where the client reports what it is doing: `tracing`, the caller's sink,
/// and the optional traffic log. Shared by the session and the client.
pub(crate) struct Journal {
    sink: Option<LogSink>,
    traffic: Option<Mutex<MessageLogger>>,
}

impl Journal {
    pub fn new(sink: Option<LogSink>, traffic: Option<MessageLogger>) -> Self {
        Self {
            sink,
            traffic: traffic.map(Mutex::new),
        }
    }

    pub fn note(&self, subject: &str, message: &str) {
        debug!(subject, "{message}");
        if let Some(sink) = &self.sink {
            sink(subject, message);
        }
    }

    pub fn logs_traffic(&self) -> bool {
        self.traffic.is_some()
    }

    pub fn request(&self, method: &str, path: &str, body: Option<&Value>) {
        self.with_traffic(|log| log.log_request(method, path, body));
    }

    pub fn status(&self, status: u16, body: &Value) {
        self.with_traffic(|log| log.log_status(status, body));
    }

    pub fn command(&self, device_id: &str, body: &Value, acknowledged: Option<bool>) {
        self.with_traffic(|log| log.log_command(device_id, body, acknowledged));
    }

    fn with_traffic(&self, f: impl FnOnce(&mut MessageLogger)) {
        if let Some(traffic) = &self.traffic {
            match traffic.lock() {
                Ok(mut log) => f(&mut log),
                Err(_) => warn!("message log poisoned, dropping entry"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn read_lines(path: &str) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn log_request_writes_ndjson() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();
        logger.log_request("POST", "/Account/Login", None);

        let lines = read_lines(path);
        assert_eq!(lines[0]["dir"], "req");
        assert_eq!(lines[0]["method"], "POST");
        assert_eq!(lines[0]["path"], "/Account/Login");
        assert!(lines[0]["ts"].as_str().is_some());
    }

    #[test]
    fn diffed_mode_logs_full_first_then_changes() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Diffed, path).unwrap();

        logger.log_status(200, &json!({"modlets": {"count": 1}}));
        logger.log_status(200, &json!({"modlets": {"count": 2}}));
        logger.log_status(200, &json!({"modlets": {"count": 2}}));

        let lines = read_lines(path);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["full"], true);
        assert!(lines[0]["body"].is_object());
        assert_eq!(lines[1]["changes"][0]["path"], "modlets.count");
        assert_eq!(lines[1]["changes"][0]["new"], 2);
        assert_eq!(lines[2]["changes"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn full_mode_logs_html_bodies_verbatim() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();
        logger.log_status(200, &json!("<div id=\"appName\"></div>"));

        let lines = read_lines(path);
        assert_eq!(lines[0]["dir"], "status");
        assert_eq!(lines[0]["body"], "<div id=\"appName\"></div>");
    }

    #[test]
    fn log_command_captures_device_and_ack() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();
        logger.log_command("a1", &json!({"targetTemperature": "74"}), Some(true));

        let lines = read_lines(path);
        assert_eq!(lines[0]["dir"], "cmd");
        assert_eq!(lines[0]["device"], "a1");
        assert_eq!(lines[0]["ack"], true);
    }

    #[test]
    fn journal_forwards_to_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let journal = Journal::new(
            Some(Box::new(move |subject: &str, message: &str| {
                seen_clone
                    .lock()
                    .unwrap()
                    .push(format!("{subject}: {message}"));
            })),
            None,
        );
        journal.note("api", "logging in...");
        journal.request("GET", "/ignored", None);

        assert_eq!(*seen.lock().unwrap(), vec!["api: logging in...".to_string()]);
    }
}
