use std::path::Path;

use tokio::process::Command;

use crate::error::{HaxigonError, Result};

/// Runs the configured fetch collaborator as
/// `<program> <args...> <source> <destination>`.
///
/// The collaborator is expected to refuse a non-empty destination, so callers
/// must clear it first.
pub async fn fetch(fetch_command: &[String], source: &Path, destination: &Path) -> Result<()> {
    let (program, args) = fetch_command
        .split_first()
        .ok_or_else(|| HaxigonError::Fetch("fetch command is empty".into()))?;

    let output = Command::new(program)
        .args(args)
        .arg(source)
        .arg(destination)
        .output()
        .await
        .map_err(|e| HaxigonError::Fetch(format!("failed to run {program}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(HaxigonError::Fetch(format!(
            "{} failed (exit {}): {}",
            fetch_command.join(" "),
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn copy_command() -> Vec<String> {
        vec!["cp".to_string(), "-R".to_string()]
    }

    #[tokio::test]
    async fn fetch_populates_destination() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("repo");
        std::fs::create_dir(&source).unwrap();
        std::fs::write(source.join("main"), "#!/bin/sh\n").unwrap();

        let destination = dir.path().join("bin");
        fetch(&copy_command(), &source, &destination).await.unwrap();
        assert!(destination.join("main").exists());
    }

    #[tokio::test]
    async fn missing_source_is_a_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("bin");
        let result = fetch(&copy_command(), &dir.path().join("missing"), &destination).await;
        assert!(matches!(result, Err(HaxigonError::Fetch(_))));
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn unknown_program_is_a_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let command = vec!["haxigon-no-such-program".to_string()];
        let result = fetch(&command, dir.path(), &dir.path().join("bin")).await;
        assert!(matches!(result, Err(HaxigonError::Fetch(_))));
    }
}
