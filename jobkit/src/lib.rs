//! Asynchronous job management over local model-inference and shell
//! processes.
//!
//! Submitting a job spawns the underlying process, streams its output into
//! an append-only log file, and returns a job id immediately. The
//! [`JobRegistry`] handle answers status, cancel, and list queries for any
//! number of concurrent jobs; [`workflow::WorkflowSequencer`] chains job
//! operations into ordered, logged pipelines.

mod actors;
mod events;

pub mod config;
pub mod errors;
pub mod logfile;
pub mod models;
pub mod normalize;
pub mod types;
pub mod workflow;

pub use actors::registry::{JobRegistryHandle as JobRegistry, DEFAULT_MODEL_CLI};

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::logfile::{LogStore, CANCELLED_MARKER};
    use crate::types::{JobState, PromptSpec, ShellSpec};
    use crate::JobRegistry;

    fn registry(dir: &std::path::Path) -> JobRegistry {
        JobRegistry::spawn(LogStore::new(dir.to_path_buf()), 16)
    }

    fn prompt_spec(prompt: &str) -> PromptSpec {
        PromptSpec {
            model: "tinyllama".into(),
            prompt: prompt.into(),
            system_prompt: None,
            temperature: 0.7,
            max_tokens: None,
            output_format: Default::default(),
        }
    }

    /// Stand-in for the inference CLI: swallows stdin, emits download noise
    /// and a streamed JSON response on stdout.
    fn fake_model_cli(dir: &std::path::Path) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-ollama");
        std::fs::write(
            &path,
            "#!/bin/sh\n\
             cat > /dev/null\n\
             echo 'pulling manifest'\n\
             echo '{\"response\":\"Hel\"}'\n\
             echo '{\"response\":\"lo \"}'\n\
             echo '{\"response\":\"World\"}'\n\
             echo '{\"done\":true}'\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn shell_job_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let submission = registry
            .submit_shell(ShellSpec {
                command: "echo hello".into(),
            })
            .await
            .unwrap();

        let report = registry.wait(submission.job_id, None).await;
        assert_eq!(report.state, JobState::Complete);
        assert_eq!(report.exit_code, Some(0));
        assert!(report.content.unwrap().contains("hello"));

        // second poll has only the log file left; same answer
        let again = registry.status(submission.job_id).await;
        assert_eq!(again.state, JobState::Complete);
        assert_eq!(again.exit_code, Some(0));
    }

    #[tokio::test]
    async fn failing_shell_job_reports_error_with_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let submission = registry
            .submit_shell(ShellSpec {
                command: "exit 3".into(),
            })
            .await
            .unwrap();

        let report = registry.wait(submission.job_id, None).await;
        assert_eq!(report.state, JobState::Error);
        assert_eq!(report.exit_code, Some(3));
        assert!(report.message.unwrap().contains("3"));
    }

    #[tokio::test]
    async fn terminal_status_is_stable_across_polls() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let submission = registry
            .submit_shell(ShellSpec {
                command: "exit 3".into(),
            })
            .await
            .unwrap();

        let first = registry.wait(submission.job_id, None).await;
        assert_eq!(first.state, JobState::Error);
        assert_eq!(first.exit_code, Some(3));

        // the handle is evicted after the first observation; later polls
        // derive the same state and exit code from the log alone
        for _ in 0..3 {
            let again = registry.status(submission.job_id).await;
            assert_eq!(again.state, JobState::Error);
            assert_eq!(again.exit_code, Some(3));
        }
    }

    #[tokio::test]
    async fn unknown_job_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let report = registry.status(uuid::Uuid::new_v4()).await;
        assert_eq!(report.state, JobState::NotFound);
    }

    #[tokio::test]
    async fn prompt_job_reassembles_streamed_response() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path().to_path_buf());
        let registry = JobRegistry::spawn_with_model_cli(store, fake_model_cli(dir.path()), 16);

        let submission = registry.submit_prompt(prompt_spec("say hello")).await.unwrap();
        let report = registry.wait(submission.job_id, None).await;

        assert_eq!(report.state, JobState::Complete);
        let content = report.content.unwrap();
        assert!(content.ends_with("Hello World"));
        assert!(!content.contains("pulling"));
    }

    #[tokio::test]
    async fn unspawnable_model_cli_is_a_submit_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path().to_path_buf());
        let registry = JobRegistry::spawn_with_model_cli(store, "/nonexistent/model-cli", 16);

        let result = registry.submit_prompt(prompt_spec("hi")).await;
        assert!(matches!(result, Err(crate::errors::Error::Spawn(_))));
    }

    #[tokio::test]
    async fn list_separates_running_from_completed() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        let long = registry
            .submit_shell(ShellSpec {
                command: "sleep 5".into(),
            })
            .await
            .unwrap();
        let short = registry
            .submit_shell(ShellSpec {
                command: "echo done".into(),
            })
            .await
            .unwrap();
        registry.wait(short.job_id, None).await;

        let listing = registry.list().await;
        assert!(listing.running.contains(&long.job_id));
        assert!(!listing.running.contains(&short.job_id));
        let completed_ids: Vec<_> = listing.completed.iter().map(|j| j.job_id.clone()).collect();
        assert!(completed_ids.contains(&short.job_id.to_string()));
        assert!(!completed_ids.contains(&long.job_id.to_string()));

        registry.cancel(long.job_id).await;
    }

    #[tokio::test]
    async fn list_seals_terminal_state_for_evicted_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let submission = registry
            .submit_shell(ShellSpec {
                command: "exit 7".into(),
            })
            .await
            .unwrap();

        // let the child die without any status poll observing it
        tokio::time::sleep(Duration::from_millis(500)).await;
        let listing = registry.list().await;
        assert!(!listing.running.contains(&submission.job_id));

        let report = registry.status(submission.job_id).await;
        assert_eq!(report.state, JobState::Error);
        assert_eq!(report.exit_code, Some(7));
    }

    #[tokio::test]
    async fn cancel_terminates_and_marks_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let submission = registry
            .submit_shell(ShellSpec {
                command: "sleep 30".into(),
            })
            .await
            .unwrap();

        let outcome = registry.cancel(submission.job_id).await;
        assert!(matches!(
            outcome,
            crate::types::CancelOutcome::Cancelled { .. }
        ));

        let report = registry.wait(submission.job_id, None).await;
        assert_eq!(report.state, JobState::Cancelled);
        let raw = tokio::fs::read_to_string(&submission.log_path).await.unwrap();
        assert!(raw.contains(CANCELLED_MARKER));
    }

    #[tokio::test]
    async fn cancel_of_a_term_trapping_child_settles_on_one_state() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        // the child swallows SIGTERM and exits 0, so death looks like a
        // normal exit rather than a signal kill
        let submission = registry
            .submit_shell(ShellSpec {
                command: "trap 'exit 0' TERM; while true; do sleep 0.1; done".into(),
            })
            .await
            .unwrap();

        let outcome = registry.cancel(submission.job_id).await;
        assert!(matches!(
            outcome,
            crate::types::CancelOutcome::Cancelled { .. }
        ));

        // the marker is on disk before cancel resolves; every poll agrees
        for _ in 0..3 {
            let report = registry.status(submission.job_id).await;
            assert_eq!(report.state, JobState::Cancelled);
        }
    }

    #[tokio::test]
    async fn cancel_after_completion_reports_already_complete() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let submission = registry
            .submit_shell(ShellSpec {
                command: "true".into(),
            })
            .await
            .unwrap();
        registry.wait(submission.job_id, None).await;

        let outcome = registry.cancel(submission.job_id).await;
        assert!(matches!(
            outcome,
            crate::types::CancelOutcome::AlreadyComplete { .. }
        ));
    }

    #[tokio::test]
    async fn cancel_of_unknown_job_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let outcome = registry.cancel(uuid::Uuid::new_v4()).await;
        assert!(matches!(outcome, crate::types::CancelOutcome::NotFound { .. }));
    }

    #[tokio::test]
    async fn wait_timeout_leaves_the_job_running() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let submission = registry
            .submit_shell(ShellSpec {
                command: "sleep 5".into(),
            })
            .await
            .unwrap();

        let report = registry
            .wait(submission.job_id, Some(Duration::from_millis(100)))
            .await;
        assert_eq!(report.state, JobState::Timeout);

        let report = registry.status(submission.job_id).await;
        assert_eq!(report.state, JobState::Running);

        registry.cancel(submission.job_id).await;
    }
}
