//! Task file loading.
//!
//! Task files are YAML: a `tasks` list plus an optional `config` mapping
//! whose `default_repository` is applied to any task without an explicit
//! repository. All validation failures are fatal at load time; nothing is
//! silently repaired.
//!
//! ```yaml
//! config:
//!   default_repository: "acme/widgets"
//! tasks:
//!   - id: "AUTH-001"
//!     name: "Add auth tests"
//!     prompt: "Create unit tests for authentication"
//!     expected_deliverable: "test_auth with full coverage"
//!     priority: high
//!     dependencies: []
//! ```

use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::LazyLock;

use crate::core::{Task, TaskList};
use crate::error::{Error, Result};

static REPOSITORY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w-]+/[\w-]+$").unwrap());

/// Check an `owner/repo` repository reference.
pub fn is_valid_repository(repo: &str) -> bool {
    REPOSITORY_RE.is_match(repo)
}

#[derive(Debug, Deserialize)]
struct TaskFile {
    #[serde(default)]
    config: Option<FileConfig>,
    tasks: Vec<Task>,
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    #[serde(default)]
    default_repository: Option<String>,
}

/// Load and validate a task list from a YAML file.
pub fn load_from_path(path: &Path) -> Result<TaskList> {
    if !path.exists() {
        return Err(Error::TaskLoad(format!(
            "task file not found: {}",
            path.display()
        )));
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::TaskLoad(format!("failed to read {}: {}", path.display(), e)))?;
    load_from_str(&raw)
}

/// Load and validate a task list from YAML text.
pub fn load_from_str(raw: &str) -> Result<TaskList> {
    let file: TaskFile = serde_yaml::from_str(raw)
        .map_err(|e| Error::TaskLoad(format!("invalid task file: {}", e)))?;

    if file.tasks.is_empty() {
        return Err(Error::TaskLoad("task list is empty".to_string()));
    }

    let default_repository = match file.config.and_then(|c| c.default_repository) {
        Some(repo) => {
            if !is_valid_repository(&repo) {
                return Err(Error::TaskLoad(format!(
                    "config.default_repository must be in owner/repo format, got: {}",
                    repo
                )));
            }
            Some(repo)
        }
        None => None,
    };

    let mut tasks = file.tasks;
    for task in &mut tasks {
        match &task.repository {
            Some(repo) => {
                if !is_valid_repository(repo) {
                    return Err(Error::TaskLoad(format!(
                        "task {} repository must be in owner/repo format, got: {}",
                        task.id, repo
                    )));
                }
            }
            None => task.repository = default_repository.clone(),
        }
    }

    TaskList::new(tasks).map_err(|e| Error::TaskLoad(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = r#"
tasks:
  - id: "AUTH-001"
    name: "Add auth tests"
    prompt: "Create unit tests for authentication"
    expected_deliverable: "test_auth with full coverage"
    priority: high
"#;

    #[test]
    fn test_load_basic_file() {
        let list = load_from_str(BASIC).unwrap();
        assert_eq!(list.len(), 1);
        let task = list.get_task("AUTH-001").unwrap();
        assert_eq!(task.name, "Add auth tests");
        assert_eq!(task.priority, crate::core::Priority::High);
        assert!(task.repository.is_none());
    }

    #[test]
    fn test_default_repository_applied() {
        let yaml = r#"
config:
  default_repository: "acme/widgets"
tasks:
  - id: "a"
    name: "A"
    prompt: "p"
    expected_deliverable: "d"
  - id: "b"
    name: "B"
    prompt: "p"
    expected_deliverable: "d"
    repository: "other/repo"
"#;
        let list = load_from_str(yaml).unwrap();
        assert_eq!(
            list.get_task("a").unwrap().repository.as_deref(),
            Some("acme/widgets")
        );
        // Explicit repository wins over the default
        assert_eq!(
            list.get_task("b").unwrap().repository.as_deref(),
            Some("other/repo")
        );
    }

    #[test]
    fn test_invalid_default_repository_rejected() {
        let yaml = r#"
config:
  default_repository: "not a repo"
tasks:
  - id: "a"
    name: "A"
    prompt: "p"
    expected_deliverable: "d"
"#;
        let err = load_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("owner/repo"));
    }

    #[test]
    fn test_invalid_task_repository_rejected() {
        let yaml = r#"
tasks:
  - id: "a"
    name: "A"
    prompt: "p"
    expected_deliverable: "d"
    repository: "justonepart"
"#;
        let err = load_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("owner/repo"));
    }

    #[test]
    fn test_empty_task_list_rejected() {
        let err = load_from_str("tasks: []\n").unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_malformed_yaml_rejected() {
        let err = load_from_str("tasks: [unclosed").unwrap_err();
        assert!(err.to_string().contains("invalid task file"));
    }

    #[test]
    fn test_missing_tasks_key_rejected() {
        assert!(load_from_str("config: {}\n").is_err());
    }

    #[test]
    fn test_dependencies_and_retry_policy_parsed() {
        let yaml = r#"
tasks:
  - id: "a"
    name: "A"
    prompt: "p"
    expected_deliverable: "d"
  - id: "b"
    name: "B"
    prompt: "p"
    expected_deliverable: "d"
    dependencies: ["a"]
    retry_policy:
      max_attempts: 5
      initial_delay: 2.0
    pr_strategy: patient
"#;
        let list = load_from_str(yaml).unwrap();
        let b = list.get_task("b").unwrap();
        assert_eq!(b.dependencies, vec!["a"]);
        assert_eq!(b.retry_policy.max_attempts, 5);
        assert_eq!(b.retry_policy.initial_delay, 2.0);
        // Unspecified policy fields keep their defaults
        assert_eq!(b.retry_policy.backoff_factor, 2.0);
        assert_eq!(b.pr_strategy, crate::core::PrStrategy::Patient);
    }

    #[test]
    fn test_duplicate_ids_rejected_at_load() {
        let yaml = r#"
tasks:
  - id: "a"
    name: "A"
    prompt: "p"
    expected_deliverable: "d"
  - id: "a"
    name: "A again"
    prompt: "p"
    expected_deliverable: "d"
"#;
        let err = load_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_cycle_rejected_at_load() {
        let yaml = r#"
tasks:
  - id: "a"
    name: "A"
    prompt: "p"
    expected_deliverable: "d"
    dependencies: ["b"]
  - id: "b"
    name: "B"
    prompt: "p"
    expected_deliverable: "d"
    dependencies: ["a"]
"#;
        let err = load_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("circular dependency"));
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let err = load_from_path(Path::new("/nonexistent/tasks.yaml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_load_from_path_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.yaml");
        std::fs::write(&path, BASIC).unwrap();
        let list = load_from_path(&path).unwrap();
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_is_valid_repository() {
        assert!(is_valid_repository("owner/repo"));
        assert!(is_valid_repository("own-er/re_po"));
        assert!(!is_valid_repository("owner"));
        assert!(!is_valid_repository("owner/repo/extra"));
        assert!(!is_valid_repository("owner repo"));
    }
}
