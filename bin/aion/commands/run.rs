//! Run command - submit a prompt and follow it to its result

use crate::style::*;
use aion::{AionError, ClientConfig, EngineEvent, EngineState, Section, TaskOutcome, TaskRequest};
use anyhow::{anyhow, bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

pub async fn run(
    config: ClientConfig,
    agent: Option<String>,
    priority: Option<u32>,
    prompt: String,
) -> Result<()> {
    let (client, session) = super::restored(config).await?;
    super::require(Section::Tasks, &session)?;

    let listing = client.agents.fetch().await;
    if let Some(error) = &listing.error {
        bail!("Could not load agents, try again: {}", error);
    }
    if !listing.can_submit() {
        bail!("No agents available");
    }
    let agent = match agent.as_deref() {
        Some(wanted) => listing
            .find(wanted)
            .ok_or_else(|| anyhow!("Unknown agent '{}'. See `aion agents`.", wanted))?,
        None => listing
            .agents
            .first()
            .ok_or_else(|| anyhow!("No agents available"))?,
    };

    print_header("Task");
    print_key_value("Agent", &format!("{} ({})", agent.name, agent.id));
    if !client.config.push_enabled {
        print_info("Live updates disabled, polling for the result");
    }

    let mut request = TaskRequest::new(&agent.id, &prompt);
    if let Some(priority) = priority {
        request = request.with_priority(priority);
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("  {spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("Submitting...");

    let mut events = client.engine.subscribe();
    let handle = match client.engine.submit_with(request).await {
        Ok(handle) => handle,
        Err(e) => {
            spinner.finish_and_clear();
            client.shutdown();
            return Err(e.into());
        }
    };
    print_key_value("Task", handle.task_id());

    let progress = spinner.clone();
    let watcher = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::StateChanged { to, .. }) if to == EngineState::AwaitingResult => {
                    progress.set_message("Waiting for result...");
                }
                Ok(EngineEvent::OutputUpdated { output, .. }) => {
                    progress.set_message(format!("Receiving output ({} chars)", output.len()));
                }
                Ok(EngineEvent::Settled { .. }) | Err(RecvError::Closed) => break,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
            }
        }
    });

    let result = tokio::select! {
        result = handle.wait() => result,
        _ = tokio::signal::ctrl_c() => Err(AionError::Cancelled),
    };
    watcher.abort();
    spinner.finish_and_clear();
    client.shutdown();

    let snapshot = client.engine.snapshot();
    match result {
        Ok(TaskOutcome::Completed { output, metrics }) => {
            print_key_value_colored("Status", "completed", state_color(snapshot.state));
            print_section("Output");
            println!();
            for line in output.lines() {
                println!("  {}", line);
            }
            if let Some(metrics) = metrics {
                print_metrics(&metrics);
            }
            println!();
            Ok(())
        }
        Ok(TaskOutcome::Failed { message }) | Err(AionError::BackendTerminal(message)) => {
            print_key_value_colored("Status", "failed", state_color(EngineState::Failed));
            bail!("Task failed: {}", message)
        }
        Err(AionError::Cancelled) => {
            print_warning("Cancelled");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
