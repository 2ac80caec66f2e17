//! Programmatic control surface over a running simulation.

use std::sync::{MutexGuard, PoisonError};

use beaconsim_core::{
    ConfigPatch, ControlCommand, DeviceDirective, EmitRecord, ParamSpec, SimulationConfig, Tick,
    World,
};
use crossfire::TrySendError;
use serde::Serialize;
use thiserror::Error;

use crate::SharedWorld;
use crate::command::CommandSender;

/// Snapshot of configuration state returned to external clients.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSnapshot {
    pub tick: u64,
    pub config: SimulationConfig,
}

/// Errors produced by the control surface.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("failed to lock world state")]
    Lock,
    #[error("non-finite value for {0}")]
    NonFinite(&'static str),
    #[error("command queue is full; retry later")]
    CommandQueueFull,
    #[error("command queue has been closed")]
    CommandQueueClosed,
}

impl From<PoisonError<MutexGuard<'_, World>>> for ControlError {
    fn from(_: PoisonError<MutexGuard<'_, World>>) -> Self {
        ControlError::Lock
    }
}

/// Shared handle used by control surfaces to inspect and steer the world.
///
/// Reads lock the shared world directly; mutations go through the command
/// bus so they land between ticks on the simulation thread.
#[derive(Clone)]
pub struct ControlHandle {
    shared_world: SharedWorld,
    commands: CommandSender,
}

impl ControlHandle {
    pub fn new(shared_world: SharedWorld, commands: CommandSender) -> Self {
        Self {
            shared_world,
            commands,
        }
    }

    fn lock_world(&self) -> Result<MutexGuard<'_, World>, ControlError> {
        self.shared_world.lock().map_err(|err| err.into())
    }

    /// Retrieve the current configuration snapshot.
    pub fn snapshot(&self) -> Result<ConfigSnapshot, ControlError> {
        let world = self.lock_world()?;
        Ok(ConfigSnapshot {
            tick: world.tick().0,
            config: world.config().clone(),
        })
    }

    /// Bounds metadata for every runtime-tunable parameter.
    #[must_use]
    pub fn param_specs(&self) -> [ParamSpec; 8] {
        SimulationConfig::param_specs()
    }

    /// Tail of recent emission records, newest last.
    pub fn recent_emissions(&self, limit: usize) -> Result<Vec<EmitRecord>, ControlError> {
        let world = self.lock_world()?;
        let records: Vec<EmitRecord> = world.history().cloned().collect();
        let skip = records.len().saturating_sub(limit);
        Ok(records.into_iter().skip(skip).collect())
    }

    /// Current tick of the running world.
    pub fn tick(&self) -> Result<Tick, ControlError> {
        Ok(self.lock_world()?.tick())
    }

    /// Submit a partial configuration update. Values are clamped to their
    /// declared bounds when applied; only non-finite numbers are rejected.
    pub fn apply_patch(&self, patch: ConfigPatch) -> Result<(), ControlError> {
        patch.ensure_finite().map_err(ControlError::NonFinite)?;
        if patch.is_empty() {
            return Ok(());
        }
        self.enqueue(ControlCommand::UpdateConfig(patch))
    }

    /// Submit a full fleet re-seed.
    pub fn reset(&self) -> Result<(), ControlError> {
        self.enqueue(ControlCommand::Reset)
    }

    /// Relay a remote-behavior directive toward one scanner.
    pub fn configure_device(
        &self,
        scanner: impl Into<String>,
        directive: DeviceDirective,
    ) -> Result<(), ControlError> {
        self.enqueue(ControlCommand::ConfigureDevice {
            scanner: scanner.into(),
            directive,
        })
    }

    fn enqueue(&self, command: ControlCommand) -> Result<(), ControlError> {
        match self.commands.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ControlError::CommandQueueFull),
            Err(TrySendError::Disconnected(_)) => Err(ControlError::CommandQueueClosed),
        }
    }
}
