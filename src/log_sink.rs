//! # Entity Log Sink
//!
//! Per-entity log folders consumed by the UI. Each task or job gets
//! `<dir>/<id>/` with an info file and an errors file named after the moment
//! the log was opened. The info file path is the entity's `log_path`.
//!
//! Lines are formatted `[dd/mm/YYYY HH:MM:SS] [LEVEL] message`. Error lines go
//! to both files. Every line is also pushed to the entity's live topic.

use crate::constants::{events, job_topic, task_topic};
use crate::events::EventPublisher;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LogSinkError {
    #[error("Log I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LogSinkError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type LogSinkResult<T> = Result<T, LogSinkError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Task,
    Job,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

/// Where entity logs are written and how they are removed.
pub trait LogSink: Send + Sync {
    /// Create the entity's log folder and return a writer into it.
    fn open(&self, kind: EntityKind, entity_id: Uuid) -> LogSinkResult<EntityLog>;

    /// Remove the folder holding `log_path`. Missing folders are fine.
    fn purge(&self, log_path: &str) -> LogSinkResult<()>;

    /// Remove every log folder of an entity.
    fn purge_entity(&self, kind: EntityKind, entity_id: Uuid) -> LogSinkResult<()>;

    /// Last `lines` lines of the log at `log_path`.
    fn tail(&self, log_path: &str, lines: usize) -> LogSinkResult<Vec<String>>;
}

/// An open entity log.
#[derive(Debug, Clone)]
pub struct EntityLog {
    info_path: PathBuf,
    error_path: PathBuf,
    topic: String,
    event_name: &'static str,
    publisher: Arc<EventPublisher>,
    write_lock: Arc<Mutex<()>>,
}

impl EntityLog {
    /// Path stored on the entity as its `log_path`.
    pub fn log_path(&self) -> String {
        self.info_path.to_string_lossy().into_owned()
    }

    pub fn error_path(&self) -> &Path {
        &self.error_path
    }

    pub fn info(&self, message: &str) -> LogSinkResult<()> {
        self.write(LogLevel::Info, message)
    }

    pub fn warning(&self, message: &str) -> LogSinkResult<()> {
        self.write(LogLevel::Warning, message)
    }

    pub fn error(&self, message: &str) -> LogSinkResult<()> {
        self.write(LogLevel::Error, message)
    }

    pub fn write(&self, level: LogLevel, message: &str) -> LogSinkResult<()> {
        let line = format!(
            "[{}] [{}] {}",
            Utc::now().format("%d/%m/%Y %H:%M:%S"),
            level.as_str(),
            message
        );

        {
            let _guard = self.write_lock.lock();
            append_line(&self.info_path, &line)?;
            if level == LogLevel::Error {
                append_line(&self.error_path, &line)?;
            }
        }

        self.publisher
            .publish_log_line(self.topic.clone(), self.event_name, &line);
        Ok(())
    }
}

fn append_line(path: &Path, line: &str) -> LogSinkResult<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LogSinkError::io(path, e))?;
    writeln!(file, "{line}").map_err(|e| LogSinkError::io(path, e))
}

/// Filesystem sink rooted at separate task and job directories.
#[derive(Debug, Clone)]
pub struct FileLogSink {
    tasks_dir: PathBuf,
    jobs_dir: PathBuf,
    publisher: Arc<EventPublisher>,
}

impl FileLogSink {
    pub fn new(
        tasks_dir: impl Into<PathBuf>,
        jobs_dir: impl Into<PathBuf>,
        publisher: Arc<EventPublisher>,
    ) -> Self {
        Self {
            tasks_dir: tasks_dir.into(),
            jobs_dir: jobs_dir.into(),
            publisher,
        }
    }

    fn entity_dir(&self, kind: EntityKind, entity_id: Uuid) -> PathBuf {
        match kind {
            EntityKind::Task => self.tasks_dir.join(entity_id.to_string()),
            EntityKind::Job => self.jobs_dir.join(entity_id.to_string()),
        }
    }
}

impl LogSink for FileLogSink {
    fn open(&self, kind: EntityKind, entity_id: Uuid) -> LogSinkResult<EntityLog> {
        let folder = self.entity_dir(kind, entity_id);
        fs::create_dir_all(&folder).map_err(|e| LogSinkError::io(&folder, e))?;

        let stamp = Utc::now().format("%d_%m_%Y__%H_%M");
        let info_path = folder.join(format!("info__{stamp}.log"));
        let error_path = folder.join(format!("errors__{stamp}.log"));
        // both files exist from the start so the UI can tail either
        for path in [&info_path, &error_path] {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| LogSinkError::io(path, e))?;
        }

        let (topic, event_name) = match kind {
            EntityKind::Task => (task_topic(entity_id), events::TASK_LOG_LINE),
            EntityKind::Job => (job_topic(entity_id), events::JOB_LOG_LINE),
        };

        debug!(entity_id = %entity_id, path = %info_path.display(), "Opened entity log");
        Ok(EntityLog {
            info_path,
            error_path,
            topic,
            event_name,
            publisher: Arc::clone(&self.publisher),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn purge(&self, log_path: &str) -> LogSinkResult<()> {
        let Some(folder) = Path::new(log_path).parent() else {
            return Ok(());
        };
        match fs::remove_dir_all(folder) {
            Ok(()) => {
                debug!(path = %folder.display(), "Purged log folder");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LogSinkError::io(folder, e)),
        }
    }

    fn purge_entity(&self, kind: EntityKind, entity_id: Uuid) -> LogSinkResult<()> {
        let folder = self.entity_dir(kind, entity_id);
        match fs::remove_dir_all(&folder) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LogSinkError::io(&folder, e)),
        }
    }

    fn tail(&self, log_path: &str, lines: usize) -> LogSinkResult<Vec<String>> {
        let path = Path::new(log_path);
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LogSinkError::io(path, e)),
        };

        let mut window = VecDeque::with_capacity(lines);
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| LogSinkError::io(path, e))?;
            if window.len() == lines {
                window.pop_front();
            }
            if lines > 0 {
                window.push_back(line);
            }
        }
        Ok(window.into_iter().collect())
    }
}
