//! Browser capability boundary.
//!
//! The orchestrator drives an assistant web UI through an opaque
//! browser-transport layer (navigate, click, fill, snapshot, tab
//! management). This module defines that boundary as the [`Browser`]
//! trait, the tagged [`PageElement`] record the transport's snapshot
//! parser produces, description-based element resolution, and
//! [`SharedBrowser`] — the `(connection, active_tab)` resource whose
//! single lock serializes every tab-switch-plus-action pair across
//! concurrently running tasks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::Result;

/// Kind tag for an accessibility-tree element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Button,
    Textbox,
    MenuItem,
    Link,
    Dialog,
    Text,
}

/// One element from an accessibility-tree snapshot.
///
/// Produced by the (excluded) transport-side parser; consumed by the
/// element resolver and the completion detector through exhaustive
/// matching rather than ad hoc key lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageElement {
    pub kind: ElementKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub text: String,
    /// Element ref used by the transport to target actions (e.g. "e226").
    #[serde(default)]
    pub ref_id: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// Nested elements (menu items, dialog contents).
    #[serde(default)]
    pub children: Vec<PageElement>,
}

impl PageElement {
    pub fn new(kind: ElementKind, name: &str, text: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            text: text.to_string(),
            ref_id: None,
            disabled: false,
            attributes: HashMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_ref(mut self, ref_id: &str) -> Self {
        self.ref_id = Some(ref_id.to_string());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

/// A page snapshot: the element tree plus its flattened text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub elements: Vec<PageElement>,
    #[serde(default)]
    pub text: String,
}

impl Snapshot {
    pub fn from_text(text: &str) -> Self {
        Self {
            elements: Vec::new(),
            text: text.to_string(),
        }
    }
}

/// The browser transport capability.
///
/// All operations are asynchronous and may fail with a generic browser
/// error. Element targeting is by human-readable description resolved
/// against the latest snapshot, not raw CSS selectors; implementations
/// share the resolution policy in [`resolve_element`].
#[async_trait]
pub trait Browser: Send + Sync {
    async fn launch(&self, headless: bool) -> Result<()>;
    async fn navigate(&self, url: &str) -> Result<()>;
    /// Open a new tab, optionally at a URL, returning its index.
    async fn create_tab(&self, url: Option<&str>) -> Result<usize>;
    async fn switch_tab(&self, index: usize) -> Result<()>;
    async fn click(&self, description: &str) -> Result<()>;
    async fn fill(&self, description: &str, text: &str) -> Result<()>;
    async fn get_current_url(&self) -> Result<String>;
    async fn get_text(&self, scope: &str) -> Result<String>;
    async fn screenshot(&self) -> Result<Vec<u8>>;
    async fn snapshot(&self) -> Result<Snapshot>;
    async fn close(&self) -> Result<()>;
}

/// Produces browser connections for the pool.
///
/// The transport behind this is out of scope; the orchestrator only
/// needs "give me another connection or a connection error".
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Browser>>;
}

/// Resolve a human-readable description to an element ref.
///
/// Matching is substring-based on element kind plus name/text, mirroring
/// how the assistant UI labels its controls. Disabled submit controls are
/// not resolvable; clicking them would silently do nothing.
pub fn resolve_element<'a>(elements: &'a [PageElement], description: &str) -> Option<&'a str> {
    let description = description.to_lowercase();
    search_elements(elements, &description)
}

fn search_elements<'a>(elements: &'a [PageElement], description: &str) -> Option<&'a str> {
    for element in elements {
        let name = element.name.to_lowercase();
        let text = element.text.to_lowercase();

        let matched = if description.contains("submit") && description.contains("button") {
            element.kind == ElementKind::Button && name.contains("submit") && !element.disabled
        } else if description.contains("select repository") {
            element.kind == ElementKind::Button && text.contains("select repository")
        } else if description.contains("repository") && description.contains("option") {
            // Format: "<repo> <owner> repository option"
            let parts: Vec<&str> = description
                .trim_end_matches("repository option")
                .split_whitespace()
                .collect();
            match parts.first() {
                Some(repo) => {
                    element.kind == ElementKind::MenuItem
                        && text.contains(repo)
                        && parts.get(1).map(|owner| text.contains(owner)).unwrap_or(true)
                }
                None => false,
            }
        } else if description.contains("message")
            && (description.contains("input") || description.contains("textbox"))
        {
            element.kind == ElementKind::Textbox
        } else if description.contains("not now") {
            element.kind == ElementKind::Button && text.contains("not now")
        } else if description.contains("create pr") {
            element.kind == ElementKind::Button && text.contains("create pr")
        } else if description.contains("button") {
            let wanted = description.replace("button", "");
            let wanted = wanted.trim();
            element.kind == ElementKind::Button
                && (text.contains(wanted) || name.contains(wanted))
        } else {
            false
        };

        if matched {
            if let Some(ref_id) = element.ref_id.as_deref() {
                return Some(ref_id);
            }
        }

        if let Some(found) = search_elements(&element.children, description) {
            return Some(found);
        }
    }

    None
}

/// One browser connection shared by concurrently running tasks.
///
/// The underlying transport exposes a single active tab, so two tasks
/// racing to switch tabs would corrupt each other's targets. Every
/// active-tab-dependent operation here takes the lock, switches to the
/// caller's tab, performs exactly one action, and releases — the lock is
/// never held across a poll wait or a backoff sleep.
#[derive(Clone)]
pub struct SharedBrowser {
    browser: Arc<dyn Browser>,
    active_tab: Arc<Mutex<Option<usize>>>,
}

impl SharedBrowser {
    pub fn new(browser: Arc<dyn Browser>) -> Self {
        Self {
            browser,
            active_tab: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn launch(&self, headless: bool) -> Result<()> {
        self.browser.launch(headless).await
    }

    pub async fn close(&self) -> Result<()> {
        self.browser.close().await
    }

    /// Navigate whatever tab is currently active. Used before any task
    /// tabs exist (auth, diagnostics).
    pub async fn navigate(&self, url: &str) -> Result<()> {
        let _guard = self.active_tab.lock().await;
        self.browser.navigate(url).await
    }

    /// Snapshot the currently active tab, wherever it points.
    pub async fn snapshot_current(&self) -> Result<Snapshot> {
        let _guard = self.active_tab.lock().await;
        self.browser.snapshot().await
    }

    /// Open a new tab and make it the active one.
    pub async fn create_tab(&self, url: Option<&str>) -> Result<usize> {
        let mut active = self.active_tab.lock().await;
        let index = self.browser.create_tab(url).await?;
        self.browser.switch_tab(index).await?;
        *active = Some(index);
        Ok(index)
    }

    pub async fn click_on(&self, tab: usize, description: &str) -> Result<()> {
        let mut active = self.active_tab.lock().await;
        self.ensure_tab(&mut *active, tab).await?;
        self.browser.click(description).await
    }

    pub async fn fill_on(&self, tab: usize, description: &str, text: &str) -> Result<()> {
        let mut active = self.active_tab.lock().await;
        self.ensure_tab(&mut *active, tab).await?;
        self.browser.fill(description, text).await
    }

    pub async fn url_on(&self, tab: usize) -> Result<String> {
        let mut active = self.active_tab.lock().await;
        self.ensure_tab(&mut *active, tab).await?;
        self.browser.get_current_url().await
    }

    pub async fn text_on(&self, tab: usize, scope: &str) -> Result<String> {
        let mut active = self.active_tab.lock().await;
        self.ensure_tab(&mut *active, tab).await?;
        self.browser.get_text(scope).await
    }

    pub async fn snapshot_on(&self, tab: usize) -> Result<Snapshot> {
        let mut active = self.active_tab.lock().await;
        self.ensure_tab(&mut *active, tab).await?;
        self.browser.snapshot().await
    }

    async fn ensure_tab(&self, active: &mut Option<usize>, tab: usize) -> Result<()> {
        if *active != Some(tab) {
            self.browser.switch_tab(tab).await?;
            *active = Some(tab);
        }
        Ok(())
    }
}
