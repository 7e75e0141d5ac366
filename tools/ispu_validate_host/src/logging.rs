use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use serde_json::{json, Value};

pub const LOG_JSON_PATH_ENV: &str = "ISPU_HOST_LOG_JSON_PATH";

/// Console logger that mirrors every line into an optional JSON-lines file.
pub struct Logger {
    json_file: Option<File>,
}

impl Logger {
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(LOG_JSON_PATH_ENV).ok();
        Self::new(path.map(PathBuf::from))
    }

    pub fn new(path: Option<PathBuf>) -> Result<Self> {
        let json_file = match path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .with_context(|| format!("opening {}", path.display()))?;
                Some(file)
            }
            None => None,
        };
        Ok(Self { json_file })
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        println!("{}", message.as_ref());
        self.event("info", message.as_ref(), Value::Null);
    }

    pub fn warn(&mut self, message: impl AsRef<str>) {
        eprintln!("{}", message.as_ref());
        self.event("warn", message.as_ref(), Value::Null);
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        eprintln!("{}", message.as_ref());
        self.event("error", message.as_ref(), Value::Null);
    }

    /// Appends one JSON line; `data` is attached under `"data"` unless null.
    pub fn event(&mut self, level: &str, message: &str, data: Value) {
        let Some(file) = &mut self.json_file else {
            return;
        };

        let ts_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let mut entry = json!({
            "ts_ms": ts_ms,
            "level": level,
            "msg": message,
        });
        if !data.is_null() {
            entry["data"] = data;
        }

        let _ = writeln!(file, "{}", entry);
        let _ = file.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_lines_are_appended_with_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/host.jsonl");

        let mut logger = Logger::new(Some(path.clone())).unwrap();
        logger.info("ucf: packed writes=3");
        logger.event("info", "run: done", json!({ "ret": 0 }));
        drop(logger);

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["level"], "info");
        assert_eq!(lines[0]["msg"], "ucf: packed writes=3");
        assert!(lines[0].get("data").is_none());
        assert_eq!(lines[1]["data"]["ret"], 0);
    }

    #[test]
    fn without_path_nothing_is_written() {
        let mut logger = Logger::new(None).unwrap();
        logger.warn("no sink");
        assert!(logger.json_file.is_none());
    }
}
