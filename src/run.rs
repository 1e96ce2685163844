use std::io;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};

use crate::cancel::CancellationToken;
use crate::endpoint::Endpoint;
use crate::http_probe::prelude::*;
use crate::route::{RouteTracer, TraceOutcome};
use crate::sink::LogSink;

/// What one diagnostic run produced.
#[derive(Debug)]
pub struct RunReport {
    pub trace: TraceOutcome,
    pub probe: ProbeResult,
}

impl RunReport {
    pub fn is_cancelled(&self) -> bool {
        self.trace == TraceOutcome::Cancelled || self.probe.is_cancelled()
    }
}

/// Drives a diagnostic run: the route trace followed by the connection probe.
///
/// Runs are serialized. Each run gets its own cancellation token, so a cancel
/// requested while no run is pending never carries over into the next one.
pub struct Diagnostics {
    tracer: RouteTracer,
    probe: ConnectionProbe,
    /// Tokens of runs that were started and have not finished yet.
    pending: Mutex<Vec<CancellationToken>>,
    run_lock: tokio::sync::Mutex<()>,
}

impl Diagnostics {
    pub fn new(tracer: RouteTracer, probe: ConnectionProbe) -> Self {
        Self {
            tracer,
            probe,
            pending: Mutex::new(Vec::new()),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn probe(&self) -> &ConnectionProbe {
        &self.probe
    }

    /// Cancels the active run and any run waiting behind it. A running route
    /// tracer is killed; a probe that has not started yet is skipped.
    pub fn request_cancel(&self) {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        log::info!("cancellation requested ({} pending runs)", pending.len());
        for token in pending.iter() {
            token.cancel();
        }
    }

    /// Registers a new run and returns its token. Cancel requests made from
    /// this point on reach the run, even before it starts executing.
    pub fn begin_run(&self) -> CancellationToken {
        let token = CancellationToken::new();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(token.clone());
        token
    }

    pub async fn run(&self, endpoint: &Endpoint, sink: &mut dyn LogSink) -> io::Result<RunReport> {
        let cancel = self.begin_run();
        self.run_with(endpoint, sink, cancel).await
    }

    /// Executes a run registered with [`Diagnostics::begin_run`].
    pub async fn run_with(
        &self,
        endpoint: &Endpoint,
        sink: &mut dyn LogSink,
        cancel: CancellationToken,
    ) -> io::Result<RunReport> {
        let _registered = Registered {
            diagnostics: self,
            token: cancel.clone(),
        };
        let _guard = self.run_lock.lock().await;

        let started = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        sink.write_line(&format!(
            "Tracing endpoint: {} (started {started})",
            endpoint.raw()
        ))?;

        let trace = self.tracer.trace(endpoint.host(), sink, &cancel).await?;
        log::debug!("route trace to {} ended: {trace:?}", endpoint.host());

        let probe = self.probe.run(endpoint, sink, &cancel).await?;

        Ok(RunReport { trace, probe })
    }

    fn finish_run(&self, token: &CancellationToken) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|pending| !pending.same_as(token));
    }
}

/// Unregisters a run's token when the run ends, however it ends.
struct Registered<'a> {
    diagnostics: &'a Diagnostics,
    token: CancellationToken,
}

impl Drop for Registered<'_> {
    fn drop(&mut self) {
        self.diagnostics.finish_run(&self.token);
    }
}
