//! Bounded command bus between control surfaces and the simulation loop.
//!
//! Control surfaces enqueue; only the owning simulation thread drains, at the
//! top of every tick, which keeps the world single-writer.

use crossfire::mpmc;
use crossfire::{MAsyncTx, MRx, TryRecvError, detect_backoff_cfg};
use beaconsim_core::{ControlCommand, World, apply_control_command};
use tracing::debug;

pub type CommandSender = MAsyncTx<ControlCommand>;
pub type CommandReceiver = MRx<ControlCommand>;

pub fn create_command_bus(capacity: usize) -> (CommandSender, CommandReceiver) {
    detect_backoff_cfg();
    mpmc::bounded_tx_async_rx_blocking(capacity)
}

/// Apply every queued control command to the world.
pub fn drain_pending_commands(receiver: &CommandReceiver, world: &mut World) {
    loop {
        match receiver.try_recv() {
            Ok(command) => {
                debug!(?command, "applying control command");
                apply_control_command(world, command);
            }
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => break,
        }
    }
}
