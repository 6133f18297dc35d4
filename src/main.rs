use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};

use conductor::browser::{Browser, Connector};
use conductor::config::Config;
use conductor::core::TaskStatus;
use conductor::notify::{Event, Notifier, Severity};
use conductor::orchestration::{Doctor, Orchestrator, OrchestratorConfig};
use conductor::session::SessionManager;
use conductor::{Error, Result};

/// Conductor - drives a web coding assistant through queued tasks
#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    CONDUCTOR_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.conductor/conductor.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Execute a task file against the assistant
    Run {
        /// Path to the YAML task file
        task_file: PathBuf,

        /// Maximum concurrent tasks (overrides config, 1-10)
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Run the browser headless
        #[arg(long)]
        headless: bool,
    },

    /// Validate a task file without executing it
    Validate {
        /// Path to the YAML task file
        task_file: PathBuf,
    },

    /// Run connectivity and browser diagnostics
    Doctor {
        /// Run the browser headless
        #[arg(long)]
        headless: bool,
    },

    /// List every branch recorded in the session ledger
    Branches,
}

/// Notifier printing run progress to the terminal.
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, event: Event) {
        match event {
            Event::RunStarted { total_tasks, max_parallel } => {
                println!("Running {} tasks (max {} parallel)", total_tasks, max_parallel);
            }
            Event::ConnectionReady { slot, requested } => {
                println!("  browser {}/{} connected", slot + 1, requested);
            }
            Event::ConnectionFailed { slot, error } => {
                eprintln!("  browser {} unavailable: {}", slot + 1, error);
            }
            Event::Authenticated => println!("Authenticated"),
            Event::WaveStarted { wave, task_ids } => {
                println!("Wave {}: {}", wave, task_ids.join(", "));
            }
            Event::TaskStarted { task_id, attempt } => {
                if attempt == 0 {
                    println!("  -> {}", task_id);
                } else {
                    println!("  -> {} (attempt {})", task_id, attempt + 1);
                }
            }
            Event::TaskRetrying { task_id, delay_secs, error, .. } => {
                eprintln!("  {} failed ({}), retrying in {:.1}s", task_id, error, delay_secs);
            }
            Event::TaskFinished { task_id, status, branch_name } => match status {
                TaskStatus::Completed => {
                    let branch = branch_name.unwrap_or_default();
                    println!("  [done] {} ({})", task_id, branch);
                }
                TaskStatus::Failed => eprintln!("  [fail] {}", task_id),
                TaskStatus::Skipped => println!("  [skip] {}", task_id),
                _ => {}
            },
            Event::TaskIndeterminate { task_id, waited_secs } => {
                eprintln!(
                    "  {} completion unknown after {}s; retry policy decides",
                    task_id, waited_secs
                );
            }
            Event::RunCancelled => eprintln!("Interrupted; finishing in-flight tasks"),
            Event::RunSummary { completed, failed, skipped, branches } => {
                println!("\nSummary");
                println!("  Completed: {}", completed);
                println!("  Failed:    {}", failed);
                println!("  Skipped:   {}", skipped);
                if !branches.is_empty() {
                    println!("  Branches:");
                    for branch in branches {
                        println!("    {}", branch);
                    }
                }
            }
            Event::Message { severity, text } => match severity {
                Severity::Info => println!("{}", text),
                Severity::Warning => eprintln!("warning: {}", text),
                Severity::Error => eprintln!("error: {}", text),
            },
        }
    }
}

/// Connector for builds without a bundled browser transport.
///
/// The transport is provided by the environment (an MCP browser server);
/// when none is configured this connector reports that clearly and the
/// orchestrator's zero-connections path turns it into a fatal error.
struct UnavailableConnector {
    server_url: String,
}

#[async_trait]
impl Connector for UnavailableConnector {
    async fn connect(&self) -> Result<Arc<dyn Browser>> {
        Err(Error::Connection(format!(
            "no browser transport available for {}; configure connection.server_url to a reachable transport",
            self.server_url
        )))
    }
}

fn build_connector(config: &Config) -> Arc<dyn Connector> {
    Arc::new(UnavailableConnector {
        server_url: config.connection.server_url.clone(),
    })
}

fn main() {
    let cli = Cli::parse();
    conductor::log::init_with_debug(cli.debug);

    let exit_code = match run_command(cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            2
        }
    };
    std::process::exit(exit_code);
}

fn run_command(command: Command) -> Result<i32> {
    match command {
        Command::Validate { task_file } => {
            let list = conductor::loader::load_from_path(&task_file)?;
            println!("{} tasks OK", list.len());
            // Print in dependency order so the file reads as a schedule
            for task in list.topological_order()? {
                let deps = if task.dependencies.is_empty() {
                    String::new()
                } else {
                    format!(" (after {})", task.dependencies.join(", "))
                };
                println!("  {} - {}{}", task.id, task.name, deps);
            }
            Ok(0)
        }

        Command::Branches => {
            let mut sessions = SessionManager::new()?;
            sessions.load_sessions();
            let branches = sessions.get_all_branches();
            if branches.is_empty() {
                println!("No branches recorded");
            } else {
                for branch in branches {
                    println!("{}", branch);
                }
            }
            Ok(0)
        }

        Command::Run {
            task_file,
            max_parallel,
            headless,
        } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run_tasks(task_file, max_parallel, headless))
        }

        Command::Doctor { headless } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run_doctor(headless))
        }
    }
}

async fn run_tasks(
    task_file: PathBuf,
    max_parallel: Option<usize>,
    headless: bool,
) -> Result<i32> {
    let mut config = Config::load()?;
    if let Some(parallel) = max_parallel {
        config.execution.max_parallel = parallel;
    }
    if headless {
        config.auth.headless = true;
    }
    config.validate()?;

    let mut task_list = conductor::loader::load_from_path(&task_file)?;
    // The config-file default repository fills any remaining gaps
    if let Some(default_repo) = &config.default_repository {
        let ids: Vec<String> = task_list
            .tasks()
            .iter()
            .filter(|t| t.repository.is_none())
            .map(|t| t.id.clone())
            .collect();
        for id in ids {
            if let Some(task) = task_list.get_task_mut(&id) {
                task.repository = Some(default_repo.clone());
            }
        }
    }

    let connector = build_connector(&config);
    let sessions = SessionManager::new()?;
    let orchestrator_config = OrchestratorConfig::from_config(&config);

    let mut orchestrator = Orchestrator::new(
        task_list,
        connector,
        sessions,
        Arc::new(ConsoleNotifier),
        orchestrator_config,
    );

    // Ctrl-C stops the scheduler from issuing new work; in-flight
    // attempts drain on their own
    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let summary = orchestrator.run().await?;
    Ok(if summary.is_success() { 0 } else { 1 })
}

async fn run_doctor(headless: bool) -> Result<i32> {
    let config = Config::load()?;
    let connector = build_connector(&config);

    let mut doctor = Doctor::new(connector, Arc::new(ConsoleNotifier), headless);
    let passed = doctor.run_all_checks().await;

    println!("\nDiagnostics");
    for result in doctor.results() {
        println!("  [{}] {} - {}", result.status.as_str(), result.name, result.message);
    }

    Ok(if passed { 0 } else { 1 })
}
