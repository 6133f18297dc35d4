//! Startup diagnostics.
//!
//! Exercises the connect -> launch -> navigate -> snapshot sequence once,
//! before a real run, so transport problems surface as a readable report
//! instead of a failed first task. Checks run in order; a failed
//! prerequisite skips the checks that depend on it. Cleanup always runs.

use std::sync::Arc;

use crate::browser::{Browser, Connector};
use crate::clog_warn;
use crate::notify::{Event, Notifier, Severity};

const TEST_URL: &str = "https://www.google.com";

/// Outcome of one diagnostic check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Fail,
    Warning,
    Skipped,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Warning => "WARN",
            CheckStatus::Skipped => "SKIP",
        }
    }
}

/// One diagnostic check result.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.to_string(),
        }
    }
}

/// Runs the diagnostic sequence.
pub struct Doctor {
    connector: Arc<dyn Connector>,
    notifier: Arc<dyn Notifier>,
    headless: bool,
    results: Vec<CheckResult>,
}

impl Doctor {
    pub fn new(connector: Arc<dyn Connector>, notifier: Arc<dyn Notifier>, headless: bool) -> Self {
        Self {
            connector,
            notifier,
            headless,
            results: Vec::new(),
        }
    }

    pub fn results(&self) -> &[CheckResult] {
        &self.results
    }

    /// Whether every non-skipped check passed.
    pub fn all_passed(&self) -> bool {
        !self.results.iter().any(|r| r.status == CheckStatus::Fail)
    }

    /// Run all checks in order, reporting through the notifier.
    ///
    /// Returns `true` if no check failed.
    pub async fn run_all_checks(&mut self) -> bool {
        self.results.clear();

        let browser = self.check_connection().await;
        let launched = match &browser {
            Some(b) => self.check_launch(b.as_ref()).await,
            None => {
                self.record("Browser Launch", CheckStatus::Skipped, "connection unavailable");
                false
            }
        };

        if let (Some(b), true) = (&browser, launched) {
            self.check_navigation(b.as_ref()).await;
            self.check_snapshot(b.as_ref()).await;
        } else {
            self.record("Navigation", CheckStatus::Skipped, "browser not launched");
            self.record("Snapshot Probe", CheckStatus::Skipped, "browser not launched");
        }

        if let Some(b) = &browser {
            if let Err(e) = b.close().await {
                clog_warn!("doctor cleanup: error closing browser: {}", e);
            }
        }

        let passed = self.all_passed();
        self.notifier.notify(Event::Message {
            severity: if passed { Severity::Info } else { Severity::Error },
            text: if passed {
                "All diagnostic checks passed".to_string()
            } else {
                "Some diagnostic checks failed".to_string()
            },
        });
        passed
    }

    async fn check_connection(&mut self) -> Option<Arc<dyn Browser>> {
        match self.connector.connect().await {
            Ok(browser) => {
                self.record("Connection", CheckStatus::Pass, "transport connected");
                Some(browser)
            }
            Err(e) => {
                self.record("Connection", CheckStatus::Fail, &e.to_string());
                None
            }
        }
    }

    async fn check_launch(&mut self, browser: &dyn Browser) -> bool {
        match browser.launch(self.headless).await {
            Ok(()) => {
                let mode = if self.headless { "headless" } else { "headed" };
                self.record(
                    "Browser Launch",
                    CheckStatus::Pass,
                    &format!("launched in {} mode", mode),
                );
                true
            }
            Err(e) => {
                self.record("Browser Launch", CheckStatus::Fail, &e.to_string());
                false
            }
        }
    }

    async fn check_navigation(&mut self, browser: &dyn Browser) {
        if let Err(e) = browser.navigate(TEST_URL).await {
            self.record("Navigation", CheckStatus::Fail, &e.to_string());
            return;
        }

        // Verify the navigation actually happened, not just that the
        // command was accepted
        match browser.get_current_url().await {
            Ok(url) if url.contains("google") => {
                self.record("Navigation", CheckStatus::Pass, &format!("confirmed at {}", url));
            }
            Ok(url) => {
                self.record(
                    "Navigation",
                    CheckStatus::Warning,
                    &format!("navigation sent but landed at {}", url),
                );
            }
            Err(e) => {
                self.record(
                    "Navigation",
                    CheckStatus::Warning,
                    &format!("navigation sent but could not verify URL: {}", e),
                );
            }
        }
    }

    async fn check_snapshot(&mut self, browser: &dyn Browser) {
        match browser.snapshot().await {
            Ok(snapshot) if !snapshot.elements.is_empty() || !snapshot.text.is_empty() => {
                self.record(
                    "Snapshot Probe",
                    CheckStatus::Pass,
                    &format!("{} top-level elements", snapshot.elements.len()),
                );
            }
            Ok(_) => {
                self.record("Snapshot Probe", CheckStatus::Warning, "snapshot came back empty");
            }
            Err(e) => {
                self.record("Snapshot Probe", CheckStatus::Fail, &e.to_string());
            }
        }
    }

    fn record(&mut self, name: &str, status: CheckStatus, message: &str) {
        self.notifier.notify(Event::Message {
            severity: match status {
                CheckStatus::Fail => Severity::Error,
                CheckStatus::Warning => Severity::Warning,
                _ => Severity::Info,
            },
            text: format!("{}: {} ({})", name, status.as_str(), message),
        });
        self.results.push(CheckResult::new(name, status, message));
    }
}
