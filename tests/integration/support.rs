//! Scripted browser transport for end-to-end orchestrator tests.
//!
//! Each connection gets its own tab space; the script and the event log
//! are shared across connections so a test can assert cross-task
//! ordering no matter which connection served which task.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use conductor::browser::{Browser, Connector, ElementKind, PageElement, Snapshot};
use conductor::error::{Error, Result};
use conductor::notify::{Event, Notifier};

/// What the scripted transport should do per task.
#[derive(Debug, Default)]
pub struct Script {
    /// Task id -> number of prompt submissions that fail before one works.
    pub fail_submit_attempts: HashMap<String, u32>,
    /// Tasks whose pages never show a completion signal.
    pub never_complete: HashSet<String>,
    /// Whether repository-selection clicks fail.
    pub fail_repository_clicks: bool,
    /// Whether the auth page ever shows logged-in markers.
    pub never_authenticate: bool,
}

impl Script {
    pub fn always_failing(task_id: &str) -> Self {
        let mut script = Script::default();
        script.fail_submit_attempts.insert(task_id.to_string(), u32::MAX);
        script
    }
}

struct TabState {
    current: usize,
    next_tab: usize,
    tab_task: HashMap<usize, String>,
    submit_counts: HashMap<String, u32>,
    completed: HashSet<String>,
}

/// One scripted browser connection.
pub struct ScriptedBrowser {
    script: Arc<Script>,
    events: Arc<Mutex<Vec<String>>>,
    state: Mutex<TabState>,
}

impl ScriptedBrowser {
    fn new(script: Arc<Script>, events: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            script,
            events,
            state: Mutex::new(TabState {
                current: 0,
                next_tab: 1,
                tab_task: HashMap::new(),
                submit_counts: HashMap::new(),
                completed: HashSet::new(),
            }),
        }
    }

    fn push_event(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn parse_task_id(prompt: &str) -> Option<String> {
        let rest = prompt.strip_prefix("[Task ID: ")?;
        Some(rest.split(']').next()?.to_string())
    }

    fn logged_in_page() -> Snapshot {
        Snapshot {
            elements: vec![PageElement::new(
                ElementKind::Textbox,
                "What do you want to do?",
                "",
            )
            .with_ref("e1")],
            text: "Start a new session".to_string(),
        }
    }

    fn logged_out_page() -> Snapshot {
        Snapshot {
            elements: vec![PageElement::new(ElementKind::Button, "Log in", "Log in").with_ref("e1")],
            text: "Welcome back".to_string(),
        }
    }

    fn working_page(task_id: &str) -> Snapshot {
        Snapshot {
            elements: vec![
                PageElement::new(ElementKind::Button, "Create PR", "Create PR")
                    .with_ref("e2")
                    .disabled(),
            ],
            text: format!("Working on: claude/{}", task_id),
        }
    }

    fn completed_page(task_id: &str) -> Snapshot {
        Snapshot {
            elements: vec![
                PageElement::new(ElementKind::Button, "Create PR", "Create PR").with_ref("e2"),
            ],
            text: format!("Pushed to branch claude/{}", task_id),
        }
    }
}

#[async_trait]
impl Browser for ScriptedBrowser {
    async fn launch(&self, _headless: bool) -> Result<()> {
        Ok(())
    }

    async fn navigate(&self, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn create_tab(&self, _url: Option<&str>) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        let index = state.next_tab;
        state.next_tab += 1;
        Ok(index)
    }

    async fn switch_tab(&self, index: usize) -> Result<()> {
        self.state.lock().unwrap().current = index;
        Ok(())
    }

    async fn click(&self, description: &str) -> Result<()> {
        let lower = description.to_lowercase();
        if lower.contains("not now") {
            return Err(Error::ElementNotFound(description.to_string()));
        }
        if lower.contains("repository") {
            self.push_event(format!("repo-click:{}", description));
            if self.script.fail_repository_clicks {
                return Err(Error::Browser("repository menu did not open".to_string()));
            }
            return Ok(());
        }
        Ok(())
    }

    async fn fill(&self, description: &str, text: &str) -> Result<()> {
        if !description.to_lowercase().contains("message") {
            return Ok(());
        }
        let task_id = Self::parse_task_id(text)
            .ok_or_else(|| Error::Browser(format!("unexpected prompt: {}", text)))?;

        let mut state = self.state.lock().unwrap();
        let count = state.submit_counts.entry(task_id.clone()).or_insert(0);
        *count += 1;
        let failing = self
            .script
            .fail_submit_attempts
            .get(&task_id)
            .copied()
            .unwrap_or(0);
        if *count <= failing {
            drop(state);
            self.push_event(format!("fail-submit:{}", task_id));
            return Err(Error::ElementNotFound("Message input textbox".to_string()));
        }

        let current = state.current;
        state.tab_task.insert(current, task_id.clone());
        drop(state);
        self.push_event(format!("submit:{}", task_id));
        Ok(())
    }

    async fn get_current_url(&self) -> Result<String> {
        let state = self.state.lock().unwrap();
        match state.tab_task.get(&state.current) {
            Some(task_id) => Ok(format!("https://claude.ai/code/sess-{}?src=test", task_id)),
            None => Ok("https://claude.ai/code".to_string()),
        }
    }

    async fn get_text(&self, _scope: &str) -> Result<String> {
        let state = self.state.lock().unwrap();
        match state.tab_task.get(&state.current) {
            Some(task_id) => Ok(format!("Pushed to branch claude/{}", task_id)),
            None => Ok(String::new()),
        }
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn snapshot(&self) -> Result<Snapshot> {
        let mut state = self.state.lock().unwrap();
        let Some(task_id) = state.tab_task.get(&state.current).cloned() else {
            return Ok(if self.script.never_authenticate {
                Self::logged_out_page()
            } else {
                Self::logged_in_page()
            });
        };

        if self.script.never_complete.contains(&task_id) {
            return Ok(Self::working_page(&task_id));
        }

        if state.completed.insert(task_id.clone()) {
            drop(state);
            self.push_event(format!("complete:{}", task_id));
        }
        Ok(Self::completed_page(&task_id))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Connector producing scripted connections; the first `ok_connects`
/// calls succeed, the rest fail.
pub struct ScriptedConnector {
    script: Arc<Script>,
    events: Arc<Mutex<Vec<String>>>,
    ok_connects: usize,
    calls: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new(script: Script, ok_connects: usize) -> Self {
        Self {
            script: Arc::new(script),
            events: Arc::new(Mutex::new(Vec::new())),
            ok_connects,
            calls: AtomicUsize::new(0),
        }
    }

    /// Shared event log across every connection this connector produced.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Index of the first event matching the predicate.
    pub fn event_position(&self, needle: &str) -> Option<usize> {
        self.events().iter().position(|e| e == needle)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<Arc<dyn Browser>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.ok_connects {
            Ok(Arc::new(ScriptedBrowser::new(
                Arc::clone(&self.script),
                Arc::clone(&self.events),
            )))
        } else {
            Err(Error::Connection("transport unreachable".to_string()))
        }
    }
}

/// Notifier recording every event for assertions.
pub struct CollectingNotifier {
    pub events: Mutex<Vec<Event>>,
}

impl CollectingNotifier {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}
