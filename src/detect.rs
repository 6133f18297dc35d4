//! Completion detection for assistant sessions.
//!
//! Decides, from a page snapshot, whether a task's remote work is done.
//! Two signals in priority order:
//!
//! 1. **Primary**: a "Create PR" control is present and enabled. The most
//!    reliable affordance, but it can be slow to render.
//! 2. **Secondary**: a `claude/<slug>` branch name is extractable from
//!    the page text AND at least one completion keyword co-occurs. This
//!    catches sessions where the button has not rendered yet. It is a
//!    heuristic with no confirmed false-positive rate, so the keyword
//!    list is configuration, not a constant contract.
//!
//! Anything else means the session is still running and the caller must
//! poll again.
//!
//! ## Example
//!
//! ```
//! use conductor::detect::{extract_branch_name, CompletionDetector};
//! use conductor::browser::Snapshot;
//!
//! let detector = CompletionDetector::default();
//! let snapshot = Snapshot::from_text("Pushed to branch claude/fix-auth-123");
//! assert!(detector.is_complete(&snapshot));
//!
//! let branch = extract_branch_name("Working on: claude/fix-auth-123");
//! assert_eq!(branch.as_deref(), Some("claude/fix-auth-123"));
//! ```

use regex::Regex;
use std::sync::LazyLock;

use crate::browser::{ElementKind, PageElement, Snapshot};

/// Branch patterns, tried in order; first match wins.
static BRANCH_BARE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"claude/[\w-]+").unwrap());

static BRANCH_LABELED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Branch:\s*(claude/[\w-]+)").unwrap());

static BRANCH_WORKING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Working on:\s*(claude/[\w-]+)").unwrap());

/// Default keyword set for the secondary completion signal.
pub const DEFAULT_COMPLETION_KEYWORDS: &[&str] = &[
    "pushed to branch",
    "pull request",
    "committed",
    "merged",
];

/// Extract a git branch name from snapshot text.
///
/// Searches, in order, for a bare `claude/<slug>`, then `Branch: <slug>`,
/// then `Working on: <slug>`; the first pattern that matches wins.
pub fn extract_branch_name(text: &str) -> Option<String> {
    if let Some(m) = BRANCH_BARE_RE.find(text) {
        return Some(m.as_str().to_string());
    }
    if let Some(caps) = BRANCH_LABELED_RE.captures(text) {
        return Some(caps[1].to_string());
    }
    if let Some(caps) = BRANCH_WORKING_RE.captures(text) {
        return Some(caps[1].to_string());
    }
    None
}

/// Check whether an enabled "Create PR" control is present.
///
/// A disabled control means the session is still working, regardless of
/// what the surrounding text claims.
pub fn is_create_pr_enabled(elements: &[PageElement]) -> bool {
    elements.iter().any(|element| match element.kind {
        ElementKind::Button => {
            element.text.to_lowercase().contains("create pr") && !element.disabled
        }
        _ => is_create_pr_enabled(&element.children),
    })
}

/// Completion decision policy with a configurable keyword set.
#[derive(Debug, Clone)]
pub struct CompletionDetector {
    keywords: Vec<String>,
}

impl Default for CompletionDetector {
    fn default() -> Self {
        Self {
            keywords: DEFAULT_COMPLETION_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
        }
    }
}

impl CompletionDetector {
    /// Detector with a custom keyword set for the secondary signal.
    pub fn with_keywords(keywords: Vec<String>) -> Self {
        Self { keywords }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Decide whether the session's work is done.
    pub fn is_complete(&self, snapshot: &Snapshot) -> bool {
        // Primary: enabled Create PR control
        if is_create_pr_enabled(&snapshot.elements) {
            return true;
        }
        // A disabled Create PR control overrides the keyword fallback:
        // the UI is explicit that work is still in flight.
        if has_create_pr_button(&snapshot.elements) {
            return false;
        }

        // Secondary: branch name plus a completion keyword
        if extract_branch_name(&snapshot.text).is_some() {
            let lower = snapshot.text.to_lowercase();
            if self.keywords.iter().any(|k| lower.contains(k.as_str())) {
                return true;
            }
        }

        false
    }
}

fn has_create_pr_button(elements: &[PageElement]) -> bool {
    elements.iter().any(|element| match element.kind {
        ElementKind::Button => element.text.to_lowercase().contains("create pr"),
        _ => has_create_pr_button(&element.children),
    })
}
