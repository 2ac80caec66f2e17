//! Shared application plumbing for beaconsim control surfaces.

use std::sync::{Arc, Mutex};

use beaconsim_core::World;

pub type SharedWorld = Arc<Mutex<World>>;

pub mod command;
pub mod control;

pub use control::{ConfigSnapshot, ControlError, ControlHandle};
