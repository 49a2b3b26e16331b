// Agent runner backed by an external command

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::{AgentResult, AgentRunner};
use crate::config::AgentConfig;
use crate::models::WorkUnit;
use crate::utils::chunk_state_dir;

/// Invocation kind, exported to the agent as `VE_MODE`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    Phase,
    Commit,
    Resume,
}

impl AgentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentMode::Phase => "phase",
            AgentMode::Commit => "commit",
            AgentMode::Resume => "resume",
        }
    }
}

/// Runs `command args...` in the worktree. The agent reports its result as a JSON
/// object on the last non-empty line of stdout.
pub struct CommandAgentRunner {
    command: String,
    args: Vec<String>,
    project_path: PathBuf,
}

impl CommandAgentRunner {
    pub fn new(config: &AgentConfig, project_path: &Path) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            project_path: project_path.to_path_buf(),
        }
    }

    fn log_path(&self, unit: &WorkUnit, mode: AgentMode) -> PathBuf {
        chunk_state_dir(&self.project_path, &unit.chunk)
            .join("log")
            .join(format!("{}-{}.log", unit.phase.as_str().to_lowercase(), mode.as_str()))
    }

    fn append_log(&self, path: &Path, header: &str, stdout: &[u8], stderr: &[u8]) {
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            writeln!(file, "=== {} ===", header)?;
            file.write_all(stdout)?;
            if !stderr.is_empty() {
                writeln!(file, "--- stderr ---")?;
                file.write_all(stderr)?;
            }
            writeln!(file)?;
            Ok(())
        };
        if let Err(e) = write() {
            log::warn!("[Agent] Failed to write agent log {:?}: {}", path, e);
        }
    }

    async fn invoke(
        &self,
        mode: AgentMode,
        session_id: Option<&str>,
        unit: &WorkUnit,
        worktree: &Path,
    ) -> AgentResult {
        if self.command.trim().is_empty() {
            return AgentResult::failed("No agent command configured (agent.command)");
        }

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .current_dir(worktree)
            .env("VE_CHUNK", &unit.chunk)
            .env("VE_PHASE", unit.phase.as_str())
            .env("VE_MODE", mode.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(session_id) = session_id {
            cmd.env("VE_SESSION_ID", session_id);
        }

        log::info!(
            "[Agent] Running {} for {} ({} phase) in {:?}",
            mode.as_str(),
            unit.chunk,
            unit.phase,
            worktree
        );

        let output = match cmd.output().await {
            Ok(output) => output,
            Err(e) => {
                return AgentResult::failed(format!(
                    "Failed to start agent '{}': {}",
                    self.command, e
                ))
            }
        };

        let header = format!(
            "{} {} {} exit={:?} at {}",
            unit.chunk,
            unit.phase,
            mode.as_str(),
            output.status.code(),
            chrono::Utc::now().to_rfc3339()
        );
        self.append_log(&self.log_path(unit, mode), &header, &output.stdout, &output.stderr);

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed = parse_agent_output(&stdout);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
            let mut result = AgentResult::failed(format!(
                "Agent exited with {}{}",
                output.status,
                if tail.is_empty() {
                    String::new()
                } else {
                    format!(": {}", tail.trim())
                }
            ));
            result.session_id = parsed.ok().and_then(|r| r.session_id);
            return result;
        }

        parsed.unwrap_or_else(AgentResult::failed)
    }
}

/// Parse the last non-empty stdout line as an `AgentResult`.
pub fn parse_agent_output(stdout: &str) -> Result<AgentResult, String> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| "Agent produced no output".to_string())?;

    serde_json::from_str(line).map_err(|e| format!("Unparsable agent result '{}': {}", line, e))
}

#[async_trait]
impl AgentRunner for CommandAgentRunner {
    async fn run_phase(&self, unit: &WorkUnit, worktree: &Path) -> AgentResult {
        self.invoke(AgentMode::Phase, unit.session_id.as_deref(), unit, worktree)
            .await
    }

    async fn run_commit(&self, unit: &WorkUnit, worktree: &Path) -> AgentResult {
        self.invoke(AgentMode::Commit, unit.session_id.as_deref(), unit, worktree)
            .await
    }

    async fn resume_for_active_status(
        &self,
        session_id: &str,
        unit: &WorkUnit,
        worktree: &Path,
    ) -> AgentResult {
        self.invoke(AgentMode::Resume, Some(session_id), unit, worktree)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentOutcome;
    use tempfile::TempDir;

    #[test]
    fn test_parse_agent_output() {
        let out = "thinking...\n{\"status\":\"completed\",\"session_id\":\"x\"}\n\n";
        assert_eq!(
            parse_agent_output(out).unwrap(),
            AgentResult::completed(Some("x".to_string()))
        );
        assert!(parse_agent_output("").is_err());
        assert!(parse_agent_output("all done!\n").is_err());
    }

    #[cfg(unix)]
    fn runner(temp_dir: &TempDir, script: &str) -> CommandAgentRunner {
        let config = AgentConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        };
        CommandAgentRunner::new(&config, temp_dir.path())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_environment_and_log() {
        let temp_dir = TempDir::new().unwrap();
        let script = r#"echo "working"; echo "{\"status\":\"suspended\",\"question\":\"$VE_CHUNK/$VE_PHASE/$VE_MODE/$VE_SESSION_ID\"}""#;
        let runner = runner(&temp_dir, script);
        let mut unit = WorkUnit::new("envchunk");
        unit.session_id = Some("sess".to_string());

        let result = runner.run_phase(&unit, temp_dir.path()).await;
        assert_eq!(
            result.outcome,
            AgentOutcome::Suspended {
                question: "envchunk/GOAL/phase/sess".to_string()
            }
        );

        let log = std::fs::read_to_string(
            chunk_state_dir(temp_dir.path(), "envchunk").join("log/goal-phase.log"),
        )
        .unwrap();
        assert!(log.contains("working"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resume_mode() {
        let temp_dir = TempDir::new().unwrap();
        let script = r#"echo "{\"status\":\"completed\",\"session_id\":\"$VE_MODE-$VE_SESSION_ID\"}""#;
        let runner = runner(&temp_dir, script);
        let unit = WorkUnit::new("r");

        let result = runner
            .resume_for_active_status("abc", &unit, temp_dir.path())
            .await;
        assert_eq!(result, AgentResult::completed(Some("resume-abc".to_string())));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let temp_dir = TempDir::new().unwrap();
        let runner = runner(&temp_dir, "echo 'bad things' >&2; exit 3");
        let result = runner.run_phase(&WorkUnit::new("f"), temp_dir.path()).await;
        match result.outcome {
            AgentOutcome::Failed { error } => assert!(error.contains("bad things")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_garbage_output_fails() {
        let temp_dir = TempDir::new().unwrap();
        let runner = runner(&temp_dir, "echo done");
        let result = runner.run_commit(&WorkUnit::new("g"), temp_dir.path()).await;
        assert!(matches!(result.outcome, AgentOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_missing_command() {
        let temp_dir = TempDir::new().unwrap();
        let runner = CommandAgentRunner::new(&AgentConfig::default(), temp_dir.path());
        let result = runner.run_phase(&WorkUnit::new("m"), temp_dir.path()).await;
        assert!(matches!(result.outcome, AgentOutcome::Failed { .. }));
    }
}
