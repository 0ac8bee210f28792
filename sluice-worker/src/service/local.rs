//! Local builder
//!
//! Runs the builder as a child process on this machine instead of
//! triggering the remote pipeline. Output lines stream to the session as
//! they are written; there is no deploy stage.

use sluice_core::domain::request::DEFAULT_REQUEST_TYPE;
use sluice_core::domain::session::SessionId;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context;
use crate::error::StageError;
use crate::hub::SessionOutput;

pub struct LocalBuilder {
    program: String,
    entry: String,
    dir: PathBuf,
}

impl LocalBuilder {
    pub fn new(settings: &context::LocalBuilder) -> Self {
        Self::with_program("node", settings)
    }

    /// Uses another interpreter for the entry script
    pub fn with_program(program: impl Into<String>, settings: &context::LocalBuilder) -> Self {
        Self {
            program: program.into(),
            entry: settings.entry.clone(),
            dir: settings.dir.clone(),
        }
    }

    /// Runs the builder to completion
    ///
    /// # Errors
    /// [`StageError::LocalBuild`] if the process cannot be spawned or exits
    /// unsuccessfully, [`StageError::Cancelled`] if the session is cancelled
    /// (the child is killed).
    pub async fn run(
        &self,
        session: &SessionId,
        output: &SessionOutput,
        cancel: &CancellationToken,
    ) -> Result<(), StageError> {
        info!(
            "Spawning local builder {} {} in {} for session {}",
            self.program,
            self.entry,
            self.dir.display(),
            session
        );

        let mut child = Command::new(&self.program)
            .arg(&self.entry)
            .current_dir(&self.dir)
            .env("SESSION_ID", session.as_str())
            .env("REQUEST_TYPE", DEFAULT_REQUEST_TYPE)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StageError::LocalBuild(format!("failed to start: {}", e)))?;

        let mut forwarders = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            forwarders.push(forward(stdout, "BUILDER STDOUT", output.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.push(forward(stderr, "BUILDER STDERR", output.clone()));
        }

        let status = tokio::select! {
            status = child.wait() => status
                .map_err(|e| StageError::LocalBuild(format!("failed to wait: {}", e)))?,
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill local builder for session {}: {}", session, e);
                }
                return Err(StageError::Cancelled);
            }
        };

        // pipes close at exit, so the forwarders finish on their own
        for forwarder in forwarders {
            if let Err(e) = forwarder.await {
                warn!("Builder output forwarder failed: {}", e);
            }
        }

        let code = status
            .code()
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        info!("Local builder for session {} exited with code {}", session, code);
        output.send(format!("Builder exited with code {}", code));

        if status.success() {
            Ok(())
        } else {
            Err(StageError::LocalBuild(format!("exited with code {}", code)))
        }
    }
}

fn forward<R>(stream: R, prefix: &'static str, output: SessionOutput) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => output.send(format!("{}: {}", prefix, line)),
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read builder output: {}", e);
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::SubscriberHub;
    use uuid::Uuid;

    /// Writes a shell script into a fresh directory
    fn script(body: &str) -> context::LocalBuilder {
        let dir = std::env::temp_dir().join(format!("sluice-local-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("build.sh"), body).unwrap();
        context::LocalBuilder {
            dir,
            entry: "build.sh".to_string(),
        }
    }

    fn collect(rx: &mut tokio::sync::mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(line) = rx.try_recv() {
            out.push(line);
        }
        out
    }

    #[tokio::test]
    async fn test_streams_output_and_succeeds() {
        let settings = script("echo \"building $SESSION_ID $REQUEST_TYPE\"\necho warn >&2\nexit 0\n");
        let hub = SubscriberHub::new();
        let session = SessionId::parse("s1").unwrap();
        let (_, mut rx) = hub.subscribe(&session);
        let output = SessionOutput::new(hub, session.clone());

        LocalBuilder::with_program("sh", &settings)
            .run(&session, &output, &CancellationToken::new())
            .await
            .unwrap();

        let lines = collect(&mut rx);
        assert!(lines.contains(&"BUILDER STDOUT: building s1 new".to_string()));
        assert!(lines.contains(&"BUILDER STDERR: warn".to_string()));
        assert_eq!(lines.last().unwrap(), "Builder exited with code 0");
        let _ = std::fs::remove_dir_all(&settings.dir);
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let settings = script("exit 3\n");
        let hub = SubscriberHub::new();
        let session = SessionId::parse("s1").unwrap();
        let (_, mut rx) = hub.subscribe(&session);
        let output = SessionOutput::new(hub, session.clone());

        let err = LocalBuilder::with_program("sh", &settings)
            .run(&session, &output, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "local builder exited with code 3");
        assert_eq!(collect(&mut rx), vec!["Builder exited with code 3"]);
        let _ = std::fs::remove_dir_all(&settings.dir);
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_start() {
        let settings = context::LocalBuilder {
            dir: std::env::temp_dir(),
            entry: "index.js".to_string(),
        };
        let hub = SubscriberHub::new();
        let session = SessionId::parse("s1").unwrap();
        let output = SessionOutput::new(hub, session.clone());

        let err = LocalBuilder::with_program("sluice-no-such-interpreter", &settings)
            .run(&session, &output, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::LocalBuild(_)));
    }
}
