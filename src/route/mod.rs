use std::io;
use std::process::{ExitStatus, Stdio};

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::cancel::CancellationToken;
use crate::sink::LogSink;

/// Command used to trace the route. The host name is appended as the last
/// argument.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TraceCommand {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for TraceCommand {
    fn default() -> Self {
        let program = if cfg!(windows) { "tracert" } else { "traceroute" };
        Self {
            program: program.to_string(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOutcome {
    Completed,
    /// The tool exited unsuccessfully; `None` when it was killed by a signal.
    Failed { code: Option<i32> },
    SpawnFailed,
    Cancelled,
}

/// Runs the OS route tracing tool and passes its output through to the sink.
#[derive(Debug, Clone, Default)]
pub struct RouteTracer {
    command: TraceCommand,
}

impl RouteTracer {
    pub fn new(command: TraceCommand) -> Self {
        Self { command }
    }

    /// Traces the route to `host`, writing the section heading, every line
    /// the tool prints and, if needed, one closing status line.
    ///
    /// Cancellation kills the child process. Only sink failures are returned
    /// as errors; everything the tool does is reported in the sink.
    pub async fn trace(
        &self,
        host: &str,
        sink: &mut dyn LogSink,
        cancel: &CancellationToken,
    ) -> io::Result<TraceOutcome> {
        sink.write_line(&format!("Running traceroute to {host}..."))?;

        if cancel.is_cancelled() {
            sink.write_line("Traceroute cancelled.")?;
            return Ok(TraceOutcome::Cancelled);
        }

        let mut child = match self.spawn(host) {
            Ok(child) => child,
            Err(e) => {
                log::warn!("failed to start {}: {e}", self.command.program);
                sink.write_line(&format!("Could not execute traceroute: {e}"))?;
                return Ok(TraceOutcome::SpawnFailed);
            }
        };
        log::debug!("started {} (pid {:?})", self.command.program, child.id());

        let code = match self.pump(&mut child, sink, cancel).await? {
            Finished::Exited(status) if status.success() => return Ok(TraceOutcome::Completed),
            Finished::Exited(status) => status.code(),
            Finished::Lost => None,
            Finished::Cancelled => {
                kill(&mut child).await;
                sink.write_line("Traceroute cancelled.")?;
                return Ok(TraceOutcome::Cancelled);
            }
        };

        let shown = code.map_or_else(|| "unknown".to_string(), |c| c.to_string());
        sink.write_line(&format!(
            "Traceroute finished with code {shown}. The tool might be missing or the network is blocked."
        ))?;
        Ok(TraceOutcome::Failed { code })
    }

    fn spawn(&self, host: &str) -> io::Result<Child> {
        Command::new(&self.command.program)
            .args(&self.command.args)
            .arg(host)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }

    /// Copies stdout and stderr lines into the sink until the child exits or
    /// cancellation is observed.
    async fn pump(
        &self,
        child: &mut Child,
        sink: &mut dyn LogSink,
        cancel: &CancellationToken,
    ) -> io::Result<Finished> {
        let mut stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
        let mut stderr = child.stderr.take().map(|s| BufReader::new(s).lines());

        while stdout.is_some() || stderr.is_some() {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Finished::Cancelled),
                line = next_line(&mut stdout), if stdout.is_some() => line,
                line = next_line(&mut stderr), if stderr.is_some() => line,
            };

            if let Some(line) = line {
                sink.write_line(&line)?;
            }
            if cancel.is_cancelled() {
                return Ok(Finished::Cancelled);
            }
        }

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Finished::Cancelled),
            status = child.wait() => status,
        };
        match status {
            Ok(status) => Ok(Finished::Exited(status)),
            Err(e) => {
                log::warn!("failed to wait for {}: {e}", self.command.program);
                Ok(Finished::Lost)
            }
        }
    }
}

enum Finished {
    Exited(ExitStatus),
    /// The exit status could not be collected.
    Lost,
    Cancelled,
}

type Lines<R> = Option<tokio::io::Lines<BufReader<R>>>;

/// Reads the next line, closing the stream (setting it to `None`) on EOF or
/// read error.
async fn next_line<R>(stream: &mut Lines<R>) -> Option<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let lines = stream.as_mut()?;
    match lines.next_line().await {
        Ok(Some(line)) => Some(line),
        Ok(None) => {
            *stream = None;
            None
        }
        Err(e) => {
            log::debug!("route tracer output closed: {e}");
            *stream = None;
            None
        }
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        log::warn!("failed to kill route tracer: {e}");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use std::time::Duration;

    fn shell(script: &str) -> RouteTracer {
        RouteTracer::new(TraceCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        })
    }

    #[tokio::test]
    async fn test_passes_output_through() {
        let tracer = shell("echo \" 1  gateway\"; echo \" 2  $0\"");
        let mut sink = MemorySink::default();

        let outcome = tracer
            .trace("example.com", &mut sink, &CancellationToken::new())
            .await
            .expect("sink write");

        assert_eq!(outcome, TraceOutcome::Completed);
        assert_eq!(
            sink.lines(),
            vec![
                "Running traceroute to example.com...".to_string(),
                " 1  gateway".to_string(),
                " 2  example.com".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_merges_stderr() {
        let tracer = shell("echo 'traceroute: unknown host' >&2");
        let mut sink = MemorySink::default();

        tracer
            .trace("example.com", &mut sink, &CancellationToken::new())
            .await
            .expect("sink write");

        assert!(sink.contains("traceroute: unknown host"));
    }

    #[tokio::test]
    async fn test_reports_exit_code_verbatim() {
        let tracer = shell("exit 2");
        let mut sink = MemorySink::default();

        let outcome = tracer
            .trace("example.com", &mut sink, &CancellationToken::new())
            .await
            .expect("sink write");

        assert_eq!(outcome, TraceOutcome::Failed { code: Some(2) });
        assert!(sink.contains(
            "Traceroute finished with code 2. The tool might be missing or the network is blocked."
        ));
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let tracer = RouteTracer::new(TraceCommand {
            program: "/nonexistent/traceroute".to_string(),
            args: Vec::new(),
        });
        let mut sink = MemorySink::default();

        let outcome = tracer
            .trace("example.com", &mut sink, &CancellationToken::new())
            .await
            .expect("sink write");

        assert_eq!(outcome, TraceOutcome::SpawnFailed);
        assert!(sink.contains("Could not execute traceroute: "));
    }

    #[tokio::test]
    async fn test_cancel_kills_running_tool() {
        let tracer = shell("echo ' 1  gateway'; sleep 30; echo ' 2  never'");
        let sink = MemorySink::default();
        let cancel = CancellationToken::new();

        let task = {
            let mut sink = sink.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { tracer.trace("example.com", &mut sink, &cancel).await })
        };

        for _ in 0..100 {
            if sink.contains("1  gateway") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("trace did not stop")
            .expect("task panicked")
            .expect("sink write");

        assert_eq!(outcome, TraceOutcome::Cancelled);
        assert_eq!(sink.lines().last().map(String::as_str), Some("Traceroute cancelled."));
        assert!(!sink.contains("never"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_spawns_nothing() {
        let tracer = shell("echo should-not-run");
        let mut sink = MemorySink::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = tracer.trace("example.com", &mut sink, &cancel).await.expect("sink write");

        assert_eq!(outcome, TraceOutcome::Cancelled);
        assert!(!sink.contains("should-not-run"));
    }

    #[test]
    fn test_default_command_matches_platform() {
        assert_eq!(TraceCommand::default().program, "traceroute");
    }
}
