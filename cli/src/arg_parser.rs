use clap::{ArgEnum, Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// Manage asynchronous model-inference and shell jobs
#[derive(Debug, Parser)]
pub struct ArgParser {
    /// Base directory for job logs, scripts, and workflows
    #[clap(long = "root", env = "JOBKIT_ROOT")]
    pub root: Option<PathBuf>,
    /// Inference CLI invoked for prompt jobs
    #[clap(long = "model-cli", default_value = "ollama")]
    pub model_cli: String,
    /// The sub-command to use
    #[clap(subcommand)]
    pub sub_command: SubCommand,
}

#[derive(Clone, Debug, Subcommand)]
pub enum SubCommand {
    /// run a model prompt as a background job
    Prompt {
        #[clap(long)]
        /// name of the model to run
        model: String,

        #[clap(long)]
        /// the prompt text
        prompt: String,

        #[clap(long)]
        /// optional system prompt
        system: Option<String>,

        #[clap(long, default_value_t = 0.7)]
        /// sampling temperature
        temperature: f32,

        #[clap(long)]
        /// cap on generated tokens
        max_tokens: Option<u32>,

        #[clap(long, arg_enum, default_value = "text")]
        /// requested output format
        format: Format,

        #[clap(long)]
        /// wait for completion instead of printing the job id
        wait: bool,

        #[clap(long)]
        /// wait timeout in seconds
        timeout: Option<u64>,
    },
    /// run a shell command as a background job
    Shell {
        /// the command line, run via sh -c
        command: String,

        #[clap(long)]
        /// wait for completion instead of printing the job id
        wait: bool,

        #[clap(long)]
        /// wait timeout in seconds
        timeout: Option<u64>,
    },
    /// get a job's status and output
    Status {
        /// Uuid v4 string
        job_id: Uuid,
    },
    /// cancel a running job
    Cancel {
        /// Uuid v4 string
        job_id: Uuid,
    },
    /// list running and completed jobs
    List,
    /// run a workflow from a JSON file of steps
    Workflow {
        /// path to the JSON step list
        file: PathBuf,

        #[clap(long)]
        /// print the receipt as soon as the run starts
        detach: bool,
    },
    /// list locally installed models
    Models,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ArgEnum)]
pub enum Format {
    /// free-form text
    Text,
    /// constrained JSON output
    Json,
}
