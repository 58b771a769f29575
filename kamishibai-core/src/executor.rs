use std::ffi::OsStr;
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;

/// Seam for every external process the pipeline spawns (ffmpeg, edge-tts,
/// aws, npx). Tests substitute a recording double.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> std::io::Result<Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<Output> {
        command.kill_on_drop(true).output().await
    }
}

/// Renders a command as a single shell-like string for logs and errors.
pub fn describe(command: &Command) -> String {
    let std_command = command.as_std();
    let mut parts = vec![std_command.get_program().to_string_lossy().into_owned()];
    parts.extend(std_command.get_args().map(OsStr::to_string_lossy).map(|arg| arg.into_owned()));
    parts.join(" ")
}

pub fn stderr_tail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let trimmed = stderr.trim();
    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() > 500 {
        chars[chars.len() - 500..].iter().collect()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_joins_program_and_args() {
        let mut command = Command::new("ffmpeg");
        command.arg("-y").arg("-i").arg("in.wav");
        assert_eq!(describe(&command), "ffmpeg -y -i in.wav");
    }
}
