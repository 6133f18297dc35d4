//! Manual authentication flow.
//!
//! The assistant UI has no API login; a human signs in through the
//! launched browser while we poll snapshots for logged-in markers. The
//! flow either confirms authentication within the timeout or reports a
//! timeout; both are surfaced to the orchestrator, where an
//! unauthenticated run is fatal.

use std::time::Duration;

use crate::browser::{ElementKind, PageElement, SharedBrowser, Snapshot};
use crate::clog;
use crate::error::{Error, Result};

/// Authentication flow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    NotStarted,
    WaitingForUser,
    Authenticated,
    TimedOut,
    Failed,
}

impl std::fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthStatus::NotStarted => write!(f, "not started"),
            AuthStatus::WaitingForUser => write!(f, "waiting for user"),
            AuthStatus::Authenticated => write!(f, "authenticated"),
            AuthStatus::TimedOut => write!(f, "timed out"),
            AuthStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Check a snapshot for markers of a signed-in session.
///
/// A logged-in page shows the prompt composer (a message textbox) or a
/// new-session control; the logged-out page shows neither.
pub fn is_logged_in(snapshot: &Snapshot) -> bool {
    fn scan(elements: &[PageElement]) -> bool {
        elements.iter().any(|e| match e.kind {
            ElementKind::Textbox => true,
            ElementKind::Button => e.text.to_lowercase().contains("new session"),
            _ => scan(&e.children),
        })
    }
    scan(&snapshot.elements)
}

/// Drives the manual login wait.
pub struct AuthFlow {
    browser: SharedBrowser,
    timeout: Duration,
    check_interval: Duration,
    status: AuthStatus,
}

impl AuthFlow {
    pub fn new(browser: SharedBrowser, timeout: Duration, check_interval: Duration) -> Self {
        Self {
            browser,
            timeout,
            check_interval,
            status: AuthStatus::NotStarted,
        }
    }

    pub fn status(&self) -> AuthStatus {
        self.status
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == AuthStatus::Authenticated
    }

    /// Navigate to the assistant and poll until login is detected.
    ///
    /// Returns the final status. Transport failures mark the flow failed
    /// and propagate as `Error::Auth`.
    pub async fn start(&mut self, base_url: &str) -> Result<AuthStatus> {
        clog!("Starting authentication flow at {}", base_url);

        let result = self.run(base_url).await;
        match result {
            Ok(status) => {
                self.status = status;
                Ok(status)
            }
            Err(e) => {
                self.status = AuthStatus::Failed;
                Err(Error::Auth(e.to_string()))
            }
        }
    }

    async fn run(&mut self, base_url: &str) -> Result<AuthStatus> {
        self.browser.navigate(base_url).await?;
        self.status = AuthStatus::WaitingForUser;

        let deadline = tokio::time::Instant::now() + self.timeout;
        while tokio::time::Instant::now() < deadline {
            match self.browser.snapshot_current().await {
                Ok(snapshot) => {
                    if is_logged_in(&snapshot) {
                        clog!("Authentication confirmed");
                        return Ok(AuthStatus::Authenticated);
                    }
                }
                Err(e) => {
                    // The page may be mid-load; keep polling until timeout
                    crate::log::debug(&format!("auth snapshot failed: {}", e));
                }
            }
            tokio::time::sleep(self.check_interval).await;
        }

        clog!("Authentication timed out after {:?}", self.timeout);
        Ok(AuthStatus::TimedOut)
    }
}
