//! External-process stage.
//!
//! The argv template supports `{query}` and `{count}`. The child is killed
//! when the stage future is dropped, so an expired deadline never leaves a
//! collector running in the background.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::StageError;
use crate::stage::{Stage, StageParams, StageReport};

/// Characters of child output kept in the stage detail.
const DETAIL_TAIL_CHARS: usize = 400;

pub struct CommandStage {
    name: String,
    argv: Vec<String>,
}

impl CommandStage {
    pub fn new(name: &str, argv: Vec<String>) -> Result<Self, StageError> {
        if argv.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(StageError::Config(format!(
                "stage '{}' has an empty command",
                name
            )));
        }
        Ok(Self {
            name: name.to_string(),
            argv,
        })
    }

    /// argv with placeholders filled in for one invocation.
    pub fn render(&self, params: &StageParams) -> Vec<String> {
        let count = params.target_count.to_string();
        self.argv
            .iter()
            .map(|arg| arg.replace("{query}", &params.query).replace("{count}", &count))
            .collect()
    }
}

/// Last non-empty characters of a process stream.
fn tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    let skip = trimmed.chars().count().saturating_sub(DETAIL_TAIL_CHARS);
    trimmed.chars().skip(skip).collect()
}

#[async_trait]
impl Stage for CommandStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, params: &StageParams) -> Result<StageReport, StageError> {
        let argv = self.render(params);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| StageError::Config("empty command".to_string()))?;

        info!(stage = %self.name, program = %program, query = %params.query, "Spawning stage command");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| StageError::Spawn(format!("{}: {}", program, e)))?;

        debug!(
            stage = %self.name,
            status = ?output.status.code(),
            stdout_bytes = output.stdout.len(),
            "Stage command exited"
        );

        if output.status.success() {
            Ok(StageReport::new(tail(&output.stdout)))
        } else {
            let stderr = tail(&output.stderr);
            Err(StageError::ExitStatus {
                code: output.status.code(),
                detail: if stderr.is_empty() {
                    tail(&output.stdout)
                } else {
                    stderr
                },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperrank_core::cancel::CancelFlag;

    fn params(query: &str) -> StageParams {
        StageParams {
            iteration: 0,
            query: query.to_string(),
            target_count: 100,
            cancel: CancelFlag::new(),
        }
    }

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_render_placeholders() {
        let stage = CommandStage::new(
            "collect",
            argv(&["python3", "collector.py", "--query", "{query}", "--count", "{count}"]),
        )
        .unwrap();
        assert_eq!(
            stage.render(&params("graph neural networks")),
            argv(&["python3", "collector.py", "--query", "graph neural networks", "--count", "100"])
        );
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(CommandStage::new("collect", vec![]).is_err());
        assert!(CommandStage::new("collect", argv(&[" "])).is_err());
    }

    #[test]
    fn test_tail_keeps_end() {
        let long = "x".repeat(DETAIL_TAIL_CHARS) + "END";
        let t = tail(long.as_bytes());
        assert!(t.ends_with("END"));
        assert_eq!(t.chars().count(), DETAIL_TAIL_CHARS);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_command() {
        let stage = CommandStage::new("collect", argv(&["sh", "-c", "echo collected {count}"])).unwrap();
        let report = stage.run(&params("q")).await.unwrap();
        assert_eq!(report.detail, "collected 100");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command() {
        let stage = CommandStage::new("collect", argv(&["sh", "-c", "echo boom >&2; exit 3"])).unwrap();
        let err = stage.run(&params("q")).await.unwrap_err();
        match err {
            StageError::ExitStatus { code, detail } => {
                assert_eq!(code, Some(3));
                assert_eq!(detail, "boom");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program() {
        let stage = CommandStage::new("collect", argv(&["/nonexistent/paperrank-collector"])).unwrap();
        assert!(matches!(
            stage.run(&params("q")).await,
            Err(StageError::Spawn(_))
        ));
    }
}
