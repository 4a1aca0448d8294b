//! Async capture runtime.
//!
//! Three loops share one [`SessionManager`]:
//!
//! | loop   | default | effect |
//! |--------|---------|--------|
//! | poll   | 2 s     | applies the command snapshot, uploads stopped stages |
//! | sample | 100 ms  | appends one sample to every active session |
//! | status | 1 s     | logs a [`SessionStatus`], no state change |
//!
//! The manager lock is never held across a network call, so sampling keeps
//! its cadence while an upload is in flight.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use gazetrack_core::{
    CommandKind, Error, GazeSample, GazeSource, ProcessedStops, Result, SessionManager,
    SessionStatus, StopJob, now_ms,
};

use crate::ClientConfig;
use crate::channel::ControlChannel;

/// Result of handling one stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// All three tables were uploaded; the stage is marked processed.
    Uploaded { stage_id: u64, files: usize },
    /// An upload failed in transit; the session waits for the next
    /// redelivered stop.
    Parked { stage_id: u64 },
    /// The server refused an upload. Retrying cannot help, so the stage is
    /// marked processed and its samples are dropped.
    Rejected { stage_id: u64 },
    /// A drained stage whose final upload failed. Nothing is retried.
    Lost { stage_id: u64 },
}

impl StopOutcome {
    pub fn stage_id(&self) -> u64 {
        match self {
            Self::Uploaded { stage_id, .. }
            | Self::Parked { stage_id }
            | Self::Rejected { stage_id }
            | Self::Lost { stage_id } => *stage_id,
        }
    }
}

pub struct CaptureRuntime<C: ControlChannel> {
    channel: C,
    manager: Arc<Mutex<SessionManager>>,
    config: ClientConfig,
}

fn lock(manager: &Mutex<SessionManager>) -> MutexGuard<'_, SessionManager> {
    manager.lock().unwrap_or_else(PoisonError::into_inner)
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

impl<C: ControlChannel> CaptureRuntime<C> {
    /// Build a runtime for `config.token`. Loads the processed-stop ledger
    /// from `config.state_file` when one is set.
    pub fn new(channel: C, config: ClientConfig) -> Result<Self> {
        if config.token.trim().is_empty() {
            return Err(Error::bad_request("a test token is required"));
        }
        for (name, period) in [
            ("poll", config.poll_interval),
            ("sample", config.sample_interval),
            ("status", config.status_interval),
        ] {
            if period.is_zero() {
                return Err(Error::bad_request(format!("{name} interval must be non-zero")));
            }
        }
        let ledger = match &config.state_file {
            Some(path) => ProcessedStops::load(path, &config.token)?,
            None => ProcessedStops::in_memory(&config.token),
        };
        if !ledger.is_empty() {
            log::info!("{} processed stop(s) restored", ledger.len());
        }
        let manager = SessionManager::with_ledger(&config.token, config.profile.clone(), ledger);
        Ok(Self {
            channel,
            manager: Arc::new(Mutex::new(manager)),
            config,
        })
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        lock(&self.manager).status()
    }

    /// Append one sample to every active session.
    pub fn record(&self, sample: GazeSample) -> usize {
        lock(&self.manager).append_sample(sample)
    }

    // -----------------------------------------------------------------------
    // Poll
    // -----------------------------------------------------------------------

    /// Fetch the command snapshot once and handle every stop it releases.
    pub async fn poll_once(&self) -> Result<Vec<StopOutcome>> {
        let commands = self.channel.poll_commands(&self.config.token).await?;
        let jobs = lock(&self.manager).apply_commands(&commands, now_ms());
        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in jobs {
            outcomes.push(self.handle_stop(job).await);
        }
        Ok(outcomes)
    }

    async fn handle_stop(&self, job: StopJob) -> StopOutcome {
        let stage_id = job.stage_id();
        match self.upload(&job).await {
            Ok(files) => {
                if let Err(e) = lock(&self.manager).complete_stop(stage_id) {
                    log::warn!("stage {stage_id}: processed-stop ledger not saved: {e}");
                }
                self.ack(stage_id, "uploaded").await;
                StopOutcome::Uploaded { stage_id, files }
            }
            Err(e) if job.synthesized => {
                log::error!("stage {stage_id}: final upload failed, artifacts dropped: {e}");
                StopOutcome::Lost { stage_id }
            }
            Err(e) if !e.is_transient() => {
                log::error!("stage {stage_id}: upload rejected, artifacts dropped: {e}");
                if let Err(e) = lock(&self.manager).complete_stop(stage_id) {
                    log::warn!("stage {stage_id}: processed-stop ledger not saved: {e}");
                }
                self.ack(stage_id, "upload_rejected").await;
                StopOutcome::Rejected { stage_id }
            }
            Err(e) => {
                log::warn!("stage {stage_id}: upload failed: {e}");
                lock(&self.manager).park(job);
                self.ack(stage_id, "upload_failed").await;
                StopOutcome::Parked { stage_id }
            }
        }
    }

    /// Build, write and upload the three tables. Scratch files are removed
    /// when this returns, on every path.
    async fn upload(&self, job: &StopJob) -> Result<usize> {
        let artifacts = job.session.build_artifacts(&self.config.profile);
        log::info!(
            "stage {}: {} sample(s), {} fixation(s)",
            job.stage_id(),
            job.session.buffer.len(),
            artifacts.fixations.len()
        );
        let scratch = artifacts.write_scratch(self.config.scratch_dir.as_deref())?;
        for file in &scratch {
            let bytes = file.read()?;
            let info = self
                .channel
                .upload_artifact(&self.config.token, job.stage_id(), &file.file_name, bytes)
                .await?;
            log::debug!("uploaded {} ({} bytes)", info.filename, info.size);
        }
        Ok(scratch.len())
    }

    async fn ack(&self, stage_id: u64, status: &str) {
        if let Err(e) = self
            .channel
            .webhook_ack(&self.config.token, stage_id, CommandKind::Stop, status)
            .await
        {
            log::debug!("stage {stage_id}: ack '{status}' not delivered: {e}");
        }
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Synthesize a stop for every active or parked session, upload it and
    /// tell the server the stage is over. Best effort.
    pub async fn drain(&self) -> Vec<StopOutcome> {
        let jobs = lock(&self.manager).drain();
        if !jobs.is_empty() {
            log::info!("draining {} session(s)", jobs.len());
        }
        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in jobs {
            let stage_id = job.stage_id();
            let outcome = self.handle_stop(job).await;
            match self.channel.stop_stage(&self.config.token, stage_id).await {
                Ok(_) => log::info!("stage {stage_id}: stop sent"),
                Err(Error::BadRequest(msg)) => log::debug!("stage {stage_id}: {msg}"),
                Err(e) => log::warn!("stage {stage_id}: stop not delivered: {e}"),
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    // -----------------------------------------------------------------------
    // Loops
    // -----------------------------------------------------------------------

    /// Run the poll, sample and status loops until `shutdown` resolves, then
    /// drain. Returns the status after draining.
    pub async fn run<S, F>(&self, source: S, shutdown: F) -> SessionStatus
    where
        S: GazeSource + 'static,
        F: Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        log::info!(
            "capturing for {} from {} source, polling every {:?}",
            gazetrack_core::lifecycle::token_prefix(&self.config.token),
            source.name(),
            self.config.poll_interval
        );

        let sampler = tokio::spawn(sample_loop(
            self.manager.clone(),
            source,
            self.config.sample_interval,
            stop_rx.clone(),
        ));
        let reporter = tokio::spawn(status_loop(
            self.manager.clone(),
            self.config.status_interval,
            stop_rx,
        ));

        let mut poll = ticker(self.config.poll_interval);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = poll.tick() => {
                    if let Err(e) = self.poll_once().await {
                        log::warn!("poll failed: {e}");
                    }
                }
            }
        }

        let _ = stop_tx.send(true);
        for handle in [sampler, reporter] {
            if let Err(e) = handle.await {
                log::error!("capture task failed: {e}");
            }
        }
        self.drain().await;
        self.status()
    }
}

async fn sample_loop<S: GazeSource>(
    manager: Arc<Mutex<SessionManager>>,
    mut source: S,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut tick = ticker(period);
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = tick.tick() => {
                if let Some(sample) = source.next_sample(now_ms()) {
                    lock(&manager).append_sample(sample);
                }
            }
        }
    }
}

async fn status_loop(
    manager: Arc<Mutex<SessionManager>>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut tick = ticker(period);
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = tick.tick() => {
                let status = lock(&manager).status();
                if status.active_stages.is_empty() {
                    log::debug!("idle, {} stop(s) processed", status.processed_stops);
                } else {
                    log::info!(
                        "active stages {:?}, {} sample(s) buffered, {} parked",
                        status.active_stages,
                        status.total_samples,
                        status.parked_uploads
                    );
                }
            }
        }
    }
}
