//! Driver actor — the tokio task that owns the [`Simulation`].
//!
//! Commands arrive on an mpsc channel with a oneshot reply. After every
//! command and every clock step the task publishes an immutable
//! [`SimulationView`] on a watch channel, so readers never wait on the
//! timeline.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use zoneshift_core::{as_millis, ClockConfig, RunState, ScaleRejected};

use crate::simulation::{Simulation, SimulationView};

const COMMAND_BUFFER: usize = 64;

/// Errors returned by [`ClusterHandle`] calls.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("simulation driver is not running")]
    Closed,

    #[error(transparent)]
    Rejected(#[from] ScaleRejected),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// A command for the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Pause,
    Resume,
    Reset,
    ScaleOut,
    ScaleIn,
    Retry,
}

struct Request {
    command: Command,
    reply: oneshot::Sender<Result<(), ScaleRejected>>,
}

/// Cloneable handle to the driver task.
#[derive(Clone)]
pub struct ClusterHandle {
    commands: mpsc::Sender<Request>,
    views: watch::Receiver<Arc<SimulationView>>,
}

impl ClusterHandle {
    /// Send a command and wait for the driver to apply it.
    pub async fn send(&self, command: Command) -> EngineResult<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Request { command, reply })
            .await
            .map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)??;
        Ok(())
    }

    pub async fn start(&self) -> EngineResult<()> {
        self.send(Command::Start).await
    }

    pub async fn pause(&self) -> EngineResult<()> {
        self.send(Command::Pause).await
    }

    pub async fn resume(&self) -> EngineResult<()> {
        self.send(Command::Resume).await
    }

    pub async fn reset(&self) -> EngineResult<()> {
        self.send(Command::Reset).await
    }

    pub async fn scale_out(&self) -> EngineResult<()> {
        self.send(Command::ScaleOut).await
    }

    pub async fn scale_in(&self) -> EngineResult<()> {
        self.send(Command::ScaleIn).await
    }

    pub async fn retry(&self) -> EngineResult<()> {
        self.send(Command::Retry).await
    }

    /// The latest published view.
    pub fn view(&self) -> Arc<SimulationView> {
        self.views.borrow().clone()
    }

    /// A receiver notified on every publish.
    pub fn subscribe(&self) -> watch::Receiver<Arc<SimulationView>> {
        self.views.clone()
    }
}

/// Spawn the driver task.
///
/// Every `clock.resolution` of wall time the simulation advances by
/// `resolution × speed` of logical time. The task exits when `shutdown`
/// flips to `true`, its sender is dropped, or every handle is dropped.
pub fn spawn(
    sim: Simulation,
    clock: ClockConfig,
    shutdown: watch::Receiver<bool>,
) -> (ClusterHandle, JoinHandle<()>) {
    let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
    let (publisher, views) = watch::channel(sim.view());
    let task = tokio::spawn(drive(sim, clock, rx, publisher, shutdown));
    (ClusterHandle { commands, views }, task)
}

async fn drive(
    mut sim: Simulation,
    clock: ClockConfig,
    mut commands: mpsc::Receiver<Request>,
    publisher: watch::Sender<Arc<SimulationView>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let step = logical_step(&clock);
    let mut interval = tokio::time::interval(clock.resolution);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        resolution_ms = as_millis(clock.resolution),
        speed = clock.speed,
        "simulation driver started"
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if sim.run_state() == RunState::Running {
                    sim.advance(step);
                    publisher.send_replace(sim.view());
                }
            }
            request = commands.recv() => {
                let Some(Request { command, reply }) = request else {
                    info!("all handles dropped, simulation driver stopping");
                    break;
                };
                let result = apply(&mut sim, command);
                debug!(?command, ok = result.is_ok(), "command applied");
                publisher.send_replace(sim.view());
                let _ = reply.send(result);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("simulation driver shutting down");
                    break;
                }
            }
        }
    }
}

fn apply(sim: &mut Simulation, command: Command) -> Result<(), ScaleRejected> {
    match command {
        Command::Start => sim.start(),
        Command::Pause => sim.pause(),
        Command::Resume => sim.resume(),
        Command::Reset => sim.reset(),
        Command::ScaleOut => return sim.force_scale_out(),
        Command::ScaleIn => return sim.force_scale_in(),
        Command::Retry => return sim.retry(),
    }
    Ok(())
}

/// Logical time covered by one wall-clock `resolution`. Falls back to real
/// time for speeds `SimConfig::validate` rejects.
pub fn logical_step(clock: &ClockConfig) -> Duration {
    Duration::try_from_secs_f64(clock.resolution.as_secs_f64() * clock.speed).unwrap_or(clock.resolution)
}
