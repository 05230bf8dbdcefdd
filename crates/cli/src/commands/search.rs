//! `sleuth search`: run one search session against the project.

use anyhow::{bail, Context};
use sleuth_agent::{AgentLoop, ContextFragment, Outcome, SessionOutcome, StaticContext};
use sleuth_config::AppConfig;
use sleuth_core::event::{DomainEvent, EventBus};
use sleuth_core::CancelFlag;
use sleuth_gateway::{RequestGateway, TokenCallback};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

pub struct SearchArgs {
    pub query: String,
    pub context: Vec<PathBuf>,
    pub root: Option<PathBuf>,
    pub quiet: bool,
    pub json: bool,
}

pub async fn run(args: SearchArgs) -> anyhow::Result<ExitCode> {
    let mut config = AppConfig::load().context("Failed to load config")?;
    if let Some(root) = &args.root {
        config.project.root = root.clone();
    }
    if !config.project.root.is_dir() {
        bail!("Project root {} is not a directory", config.project.root.display());
    }
    if !config.has_api_key() && config.provider != "ollama" {
        bail!(
            "No API key configured. Set SLEUTH_API_KEY or add api_key to {}",
            AppConfig::config_dir().join("config.toml").display()
        );
    }

    let fragments = load_context(&args.context)?;

    let provider = sleuth_providers::build_from_config(&config);
    let events = Arc::new(EventBus::default());
    let cancel = CancelFlag::new();
    let mut gateway = RequestGateway::from_config(provider, &config)
        .with_events(Arc::clone(&events))
        .with_cancel(cancel.clone());
    if !args.quiet && !args.json {
        let echo: TokenCallback = Arc::new(|token: &str| {
            let mut err = std::io::stderr().lock();
            let _ = err.write_all(token.as_bytes());
            let _ = err.flush();
        });
        gateway = gateway.with_token_callback(echo);
        tokio::spawn(print_progress(events.subscribe()));
    }

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            interrupt.cancel();
        }
    });

    let tools = Arc::new(sleuth_tools::default_registry(&config.project.root));
    debug!(
        root = %config.project.root.display(),
        tools = ?tools.names(),
        context_files = fragments.len(),
        "Search configured"
    );
    let mut agent = AgentLoop::new(gateway, config.model.profile(), tools, &config.agent)
        .with_summary_model(config.summary_profile());
    if !fragments.is_empty() {
        agent = agent.with_context(Arc::new(StaticContext::new(fragments)));
    }

    let session = agent.run(&args.query).await;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&session).context("Failed to render outcome")?
        );
    } else {
        print_outcome(&session);
    }
    Ok(ExitCode::from(exit_status(&session.outcome)))
}

fn load_context(paths: &[PathBuf]) -> anyhow::Result<Vec<ContextFragment>> {
    paths
        .iter()
        .map(|path| {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read context file {}", path.display()))?;
            Ok(ContextFragment::new(path.display().to_string(), text))
        })
        .collect()
}

async fn print_progress(mut rx: tokio::sync::broadcast::Receiver<Arc<DomainEvent>>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Some(line) = describe(&event) {
                    eprintln!("{line}");
                }
            }
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
}

/// The progress line for an event, if it deserves one.
fn describe(event: &DomainEvent) -> Option<String> {
    match event {
        DomainEvent::SystemOutput { message, .. } => Some(message.clone()),
        DomainEvent::RetryScheduled {
            attempt,
            max_attempts,
            backoff_secs,
            reason,
            ..
        } => Some(format!(
            "Request failed ({reason}); retrying in {backoff_secs}s [{attempt}/{max_attempts}]"
        )),
        DomainEvent::StepStarted {
            sequence, label, ..
        } => Some(format!("[{sequence}] {label}")),
        DomainEvent::ToolExecuted {
            tool_name,
            success: false,
            ..
        } => Some(format!("    {tool_name} found nothing")),
        DomainEvent::SummarizationStarted {
            tool_name,
            approx_tokens,
            ..
        } => Some(format!("    Summarizing {tool_name} result (~{approx_tokens} tokens)")),
        DomainEvent::BeastModeEngaged { .. } => {
            Some("Token budget nearly spent; asking for a final answer".into())
        }
        DomainEvent::ToolExecuted { .. } | DomainEvent::ResponseGenerated { .. } => None,
    }
}

fn print_outcome(session: &SessionOutcome) {
    eprintln!();
    match &session.outcome {
        Outcome::Answer {
            explanation,
            identifiers,
        } => {
            println!("{explanation}");
            if !identifiers.is_empty() {
                println!("\nRelevant code:");
                for id in identifiers {
                    println!("  - {id}");
                }
            }
        }
        Outcome::Aborted { explanation } => println!("Search aborted: {explanation}"),
        Outcome::BudgetExhausted { reason } => println!("Search stopped: {reason}"),
        Outcome::Failed { reason } => println!("Search failed: {reason}"),
        Outcome::Cancelled => println!("Search cancelled"),
    }
    eprintln!(
        "\n{} steps, {} prompt + {} completion tokens",
        session.steps, session.usage.prompt_tokens, session.usage.completion_tokens
    );
}

fn exit_status(outcome: &Outcome) -> u8 {
    match outcome {
        Outcome::Answer { .. } | Outcome::Aborted { .. } => 0,
        Outcome::Cancelled => 130,
        Outcome::BudgetExhausted { .. } | Outcome::Failed { .. } => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn progress_lines() {
        let step = DomainEvent::StepStarted {
            sequence: 3,
            tool_name: "searchSubstrings".into(),
            label: "Searching for substrings".into(),
            timestamp: Utc::now(),
        };
        assert_eq!(describe(&step).as_deref(), Some("[3] Searching for substrings"));

        let retry = DomainEvent::RetryScheduled {
            attempt: 2,
            max_attempts: 8,
            backoff_secs: 2,
            reason: "rate limited".into(),
            timestamp: Utc::now(),
        };
        assert_eq!(
            describe(&retry).as_deref(),
            Some("Request failed (rate limited); retrying in 2s [2/8]")
        );

        let quiet = DomainEvent::ResponseGenerated {
            model: "m".into(),
            tokens_used: 10,
            timestamp: Utc::now(),
        };
        assert!(describe(&quiet).is_none());
    }

    #[test]
    fn only_empty_tool_runs_are_reported() {
        let ok = DomainEvent::ToolExecuted {
            tool_name: "searchFilenames".into(),
            success: true,
            duration_ms: 3,
            timestamp: Utc::now(),
        };
        assert!(describe(&ok).is_none());
        let empty = DomainEvent::ToolExecuted {
            tool_name: "searchFilenames".into(),
            success: false,
            duration_ms: 3,
            timestamp: Utc::now(),
        };
        assert_eq!(describe(&empty).as_deref(), Some("    searchFilenames found nothing"));
    }

    #[test]
    fn exit_statuses() {
        assert_eq!(
            exit_status(&Outcome::Aborted {
                explanation: "x".into()
            }),
            0
        );
        assert_eq!(exit_status(&Outcome::Cancelled), 130);
        assert_eq!(exit_status(&Outcome::Failed { reason: "x".into() }), 1);
    }

    #[test]
    fn context_files_become_fragments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "the cache lives in store.rs").unwrap();
        let fragments = load_context(&[path.clone()]).unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].text, "the cache lives in store.rs");

        let missing = load_context(&[dir.path().join("missing.md")]);
        assert!(missing.is_err());
    }
}
