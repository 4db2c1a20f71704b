use std::{path::Path, process::Stdio};

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::{error::Error, logger};

/// 外部コマンドの標準出力
///
/// JSON としてパースできればその値、できなければ文字列のまま
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutput {
    Json(Value),
    Text(String),
}

impl CommandOutput {
    pub fn smart_parse(stdout: String) -> Self {
        match serde_json::from_str(&stdout) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(stdout),
        }
    }

    pub fn into_string(self) -> String {
        match self {
            Self::Json(value) => value.to_string(),
            Self::Text(text) => text,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: String,
    debug: bool,
}

impl CommandRunner {
    pub fn new(program: impl Into<String>, debug: bool) -> Self {
        Self {
            program: program.into(),
            debug,
        }
    }

    pub async fn run(&self, args: &[&str], cwd: &Path) -> Result<CommandOutput, Error> {
        let command_line = std::iter::once(self.program.as_str())
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");

        if self.debug {
            logger!(debug, "$ {}", command_line);
        }

        let output = Command::new(&self.program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: command_line,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(CommandOutput::smart_parse(
            String::from_utf8_lossy(&output.stdout).into_owned(),
        ))
    }
}

#[async_trait]
pub trait KustomizeBuild: Send + Sync {
    /// `kustomize build .` を `workdir` で実行して出力を返す
    async fn build(&self, workdir: &Path) -> Result<String, Error>;
}

#[derive(Debug, Clone)]
pub struct KustomizeCommand {
    runner: CommandRunner,
}

impl KustomizeCommand {
    pub fn new(program: impl Into<String>, debug: bool) -> Self {
        Self {
            runner: CommandRunner::new(program, debug),
        }
    }
}

#[async_trait]
impl KustomizeBuild for KustomizeCommand {
    async fn build(&self, workdir: &Path) -> Result<String, Error> {
        let output = self.runner.run(&["build", "."], workdir).await?;

        Ok(output.into_string())
    }
}
