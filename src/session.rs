//! Session ledger mapping tasks to assistant sessions and git branches.
//!
//! Every submitted task records one `SessionInfo`. Records are persisted
//! append-only, one JSON object per line, so the log survives restarts
//! and doubles as the durable source of truth for branch names. Ledger
//! I/O must never fail a task: persistence errors are logged and
//! swallowed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use crate::config::Config;
use crate::error::Result;
use crate::{clog, clog_error, clog_warn};

/// Information about one assistant session tied to one task submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub task_id: String,
    #[serde(default)]
    pub branch_name: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub url: Option<String>,
}

impl SessionInfo {
    pub fn new(
        session_id: &str,
        task_id: &str,
        branch_name: Option<String>,
        url: Option<String>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            task_id: task_id.to_string(),
            branch_name,
            started_at: Utc::now(),
            url,
        }
    }
}

/// Append-only session ledger with an in-memory cache.
pub struct SessionManager {
    log_file: PathBuf,
    sessions: Vec<SessionInfo>,
}

impl SessionManager {
    /// Create a manager using the default ledger location.
    pub fn new() -> Result<Self> {
        Config::ensure_dirs()?;
        Ok(Self::with_log_file(Config::sessions_path()?))
    }

    /// Create a manager writing to a specific ledger file.
    pub fn with_log_file(log_file: PathBuf) -> Self {
        Self {
            log_file,
            sessions: Vec::new(),
        }
    }

    /// Record a new session and persist it immediately.
    ///
    /// Persistence failures are logged and swallowed; bookkeeping I/O
    /// must not crash a task.
    pub fn add_session(
        &mut self,
        session_id: &str,
        task_id: &str,
        branch_name: Option<String>,
        url: Option<String>,
    ) -> SessionInfo {
        let session = SessionInfo::new(session_id, task_id, branch_name, url);
        self.sessions.push(session.clone());
        self.persist_session(&session);

        clog!("Added session {} for task {}", session_id, task_id);
        if let Some(branch) = &session.branch_name {
            clog!("  Branch: {}", branch);
        }

        session
    }

    /// Update a recorded session in place and re-append the new record.
    pub fn update_session(
        &mut self,
        session_id: &str,
        branch_name: Option<String>,
        url: Option<String>,
    ) -> Option<SessionInfo> {
        let session = self
            .sessions
            .iter_mut()
            .find(|s| s.session_id == session_id)?;

        if branch_name.is_some() {
            session.branch_name = branch_name;
        }
        if url.is_some() {
            session.url = url;
        }
        let updated = session.clone();
        self.persist_session(&updated);
        Some(updated)
    }

    /// Get a session by id from the in-memory cache.
    pub fn get_session(&self, session_id: &str) -> Option<&SessionInfo> {
        self.sessions.iter().find(|s| s.session_id == session_id)
    }

    /// All sessions recorded for a task.
    pub fn get_sessions_for_task(&self, task_id: &str) -> Vec<&SessionInfo> {
        self.sessions
            .iter()
            .filter(|s| s.task_id == task_id)
            .collect()
    }

    /// All sessions currently in memory.
    pub fn sessions(&self) -> &[SessionInfo] {
        &self.sessions
    }

    /// Every branch name ever recorded, in-memory union the full log.
    ///
    /// The log is the durable source of truth across restarts, so both
    /// sources are read and deduplicated.
    pub fn get_all_branches(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut branches = Vec::new();

        for branch in self
            .sessions
            .iter()
            .filter_map(|s| s.branch_name.clone())
            .chain(self.load_branches_from_log())
        {
            if seen.insert(branch.clone()) {
                branches.push(branch);
            }
        }

        branches
    }

    /// Rebuild the in-memory cache by replaying the log.
    ///
    /// Malformed lines are skipped with a warning; a partial log never
    /// aborts the load.
    pub fn load_sessions(&mut self) {
        let raw = match std::fs::read_to_string(&self.log_file) {
            Ok(raw) => raw,
            Err(_) => return,
        };

        self.sessions.clear();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<SessionInfo>(line) {
                Ok(session) => self.sessions.push(session),
                Err(e) => clog_warn!("Failed to parse session line: {}", e),
            }
        }

        clog!("Loaded {} sessions from log", self.sessions.len());
    }

    fn persist_session(&self, session: &SessionInfo) {
        let result = (|| -> Result<()> {
            if let Some(parent) = self.log_file.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_file)?;
            writeln!(file, "{}", serde_json::to_string(session)?)?;
            Ok(())
        })();

        if let Err(e) = result {
            clog_error!("Failed to persist session {}: {}", session.session_id, e);
        }
    }

    fn load_branches_from_log(&self) -> Vec<String> {
        let raw = match std::fs::read_to_string(&self.log_file) {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };

        raw.lines()
            .filter_map(|line| serde_json::from_str::<SessionInfo>(line.trim()).ok())
            .filter_map(|s| s.branch_name)
            .collect()
    }
}
