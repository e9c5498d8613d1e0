mod arg_parser;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;

use arg_parser::{ArgParser, Format, SubCommand};
use jobkit::config::Paths;
use jobkit::logfile::LogStore;
use jobkit::types::{OutputFormat, PromptSpec, ShellSpec};
use jobkit::workflow::{WorkflowSequencer, WorkflowStep};
use jobkit::JobRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = ArgParser::parse();
    let paths = match args.root.clone() {
        Some(root) => Paths::at(root)?,
        None => Paths::from_env()?,
    };
    let store = LogStore::new(paths.outputs.clone());
    let registry = JobRegistry::spawn_with_model_cli(store.clone(), args.model_cli.clone(), 64);

    match args.sub_command {
        SubCommand::Prompt {
            model,
            prompt,
            system,
            temperature,
            max_tokens,
            format,
            wait,
            timeout,
        } => {
            let spec = PromptSpec {
                model,
                prompt,
                system_prompt: system,
                temperature,
                max_tokens,
                output_format: match format {
                    Format::Text => OutputFormat::Text,
                    Format::Json => OutputFormat::Json,
                },
            };
            let submission = registry.submit_prompt(spec).await?;
            if wait {
                let report = registry
                    .wait(submission.job_id, timeout.map(Duration::from_secs))
                    .await;
                print_json(&report)?;
            } else {
                print_json(&submission)?;
            }
        }
        SubCommand::Shell {
            command,
            wait,
            timeout,
        } => {
            let submission = registry.submit_shell(ShellSpec { command }).await?;
            if wait {
                let report = registry
                    .wait(submission.job_id, timeout.map(Duration::from_secs))
                    .await;
                print_json(&report)?;
            } else {
                print_json(&submission)?;
            }
        }
        SubCommand::Status { job_id } => {
            print_json(&registry.status(job_id).await)?;
        }
        SubCommand::Cancel { job_id } => {
            print_json(&registry.cancel(job_id).await)?;
        }
        SubCommand::List => {
            print_json(&registry.list().await)?;
        }
        SubCommand::Workflow { file, detach } => {
            let steps: Vec<WorkflowStep> =
                serde_json::from_str(&tokio::fs::read_to_string(&file).await?)?;
            let sequencer =
                WorkflowSequencer::with_model_cli(registry.clone(), store, args.model_cli.clone());
            let receipt = sequencer.run(steps, !detach).await;
            print_json(&receipt)?;
            // a detached run still has to outlive this process; the receipt
            // and the log path are already printed, so just see it through
            sequencer.join_all().await;
        }
        SubCommand::Models => {
            print_json(&jobkit::models::list_models(&args.model_cli).await?)?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
