//! Core types and simulation pipeline shared across the beaconsim workspace.
//!
//! The crate is deliberately free of I/O: the world hands finished telemetry
//! reports to a [`TelemetrySink`] and relays device directives to a
//! [`DeviceConfigurator`], both of which are implemented elsewhere.

use rand::{Rng, SeedableRng, rngs::SmallRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// High level simulation clock (ticks processed since boot).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Axis-aligned 2D vector used for positions, velocities, and steering forces.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    /// Construct a new vector.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean length.
    #[must_use]
    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    /// Euclidean length.
    #[must_use]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        (self - other).length()
    }

    /// Uniformly scale the vector.
    #[must_use]
    pub fn scaled(self, factor: f32) -> Self {
        Self::new(self.x * factor, self.y * factor)
    }

    /// Rescale to the requested magnitude; the zero vector stays zero.
    #[must_use]
    pub fn normalized_to(self, magnitude: f32) -> Self {
        let len = self.length();
        if len <= f32::EPSILON {
            return Self::ZERO;
        }
        self.scaled(magnitude / len)
    }

    /// Clamp the magnitude to `max` without changing direction.
    #[must_use]
    pub fn clamp_length(self, max: f32) -> Self {
        let len_sq = self.length_squared();
        if len_sq <= max * max {
            return self;
        }
        self.normalized_to(max)
    }
}

impl std::ops::Add for Vec2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Fixed-position signal source. Immutable after world construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Beacon {
    pub id: String,
    pub name: String,
    pub position: Vec2,
}

impl Beacon {
    /// Construct a beacon with a derived `beacon-{name}` identifier.
    #[must_use]
    pub fn at_corner(name: &str, x: f32, y: f32) -> Self {
        Self {
            id: format!("beacon-{name}"),
            name: name.to_string(),
            position: Vec2::new(x, y),
        }
    }
}

/// The four fixed beacons, inset from the world corners by `beacon_margin`.
#[must_use]
pub fn corner_beacons(config: &SimulationConfig) -> Vec<Beacon> {
    let margin = config.beacon_margin;
    let width = config.world_width;
    let height = config.world_height;
    vec![
        Beacon::at_corner("NW", margin, margin),
        Beacon::at_corner("NE", width - margin, margin),
        Beacon::at_corner("SW", margin, height - margin),
        Beacon::at_corner("SE", width - margin, height - margin),
    ]
}

/// Alphabetic scanner suffix: 0 -> A, 25 -> Z, 26 -> AA, and so on.
fn scanner_suffix(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(char::from(b'A' + (index % 26) as u8));
        index /= 26;
        if index == 0 {
            break;
        }
        index -= 1;
    }
    letters.iter().rev().collect()
}

/// Canonical scanner name for a spawn index.
#[must_use]
pub fn scanner_name(index: usize) -> String {
    format!("scanner-{}", scanner_suffix(index))
}

/// Simulated mobile device: flocks through the world and periodically reports
/// per-beacon signal readings.
///
/// Behavioural parameters are per-agent copies refreshed from the config on
/// every [`World::apply_config`], so an update reaches all live scanners at
/// once while the force pass only reads agent state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scanner {
    pub name: String,
    pub position: Vec2,
    pub velocity: Vec2,
    pub max_speed: f32,
    pub max_force: f32,
    pub perception_radius: f32,
    pub movement_since_emit: f32,
}

impl Scanner {
    /// Spawn a scanner with a randomized in-bounds position and velocity.
    pub fn spawn(name: String, config: &SimulationConfig, rng: &mut SmallRng) -> Self {
        let half = config.scanner_size * 0.5;
        let position = Vec2::new(
            rng.random_range(half..=config.world_width - half),
            rng.random_range(half..=config.world_height - half),
        );
        let speed = config.initial_speed;
        let velocity = Vec2::new(
            rng.random_range(-speed..=speed),
            rng.random_range(-speed..=speed),
        );
        Self {
            name,
            position,
            velocity,
            max_speed: config.max_speed,
            max_force: config.max_force,
            perception_radius: config.perception_radius,
            movement_since_emit: 0.0,
        }
    }

    fn refresh_params(&mut self, config: &SimulationConfig) {
        self.max_speed = config.max_speed;
        self.max_force = config.max_force;
        self.perception_radius = config.perception_radius;
    }
}

/// Declared range metadata for one runtime-tunable parameter.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl ParamSpec {
    const fn new(name: &'static str, min: f64, max: f64, step: f64) -> Self {
        Self {
            name,
            min,
            max,
            step,
        }
    }

    /// Clamp a proposed value into the declared `[min, max]` range.
    #[must_use]
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// When a (re)seeded fleet schedules its first emissions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StaggerPolicy {
    /// Every scanner's first emission lands on the same tick.
    #[default]
    Burst,
    /// Each scanner's first emission is delayed by a seeded-random offset in
    /// `[0, interval)` so reports do not arrive in a burst.
    Staggered,
}

/// Static and runtime-tunable configuration for a simulation world.
///
/// The tunable fields carry declared bounds (see the associated `ParamSpec`
/// constants); out-of-range runtime updates are clamped, never rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationConfig {
    /// Width of the world in world units.
    pub world_width: f32,
    /// Height of the world in world units.
    pub world_height: f32,
    /// Inset of the four corner beacons from the world edges.
    pub beacon_margin: f32,
    /// Edge length of the square scanner body; half of it keeps clear of walls.
    pub scanner_size: f32,
    /// Number of live scanners; changing it re-seeds the whole fleet.
    pub scanner_count: usize,
    /// Magnitude bound for each randomized initial velocity component.
    pub initial_speed: f32,
    /// Velocity magnitude cap enforced after every integration step.
    pub max_speed: f32,
    /// Magnitude cap for each steering contribution.
    pub max_force: f32,
    /// Neighborhood radius for alignment and cohesion.
    pub perception_radius: f32,
    pub separation_weight: f32,
    pub alignment_weight: f32,
    pub cohesion_weight: f32,
    /// Telemetry cadence; converted to whole ticks via `tick_rate_hz`.
    pub emit_interval_ms: u64,
    /// Physics tick frequency used to convert wall-clock cadences.
    pub tick_rate_hz: u32,
    /// First-emission policy applied when the fleet is (re)seeded.
    pub stagger: StaggerPolicy,
    /// Signal value reported at the clamped minimum distance.
    pub rssi_at_min_dist: f32,
    /// Signal value reported at half the world diagonal and beyond.
    pub rssi_at_effective_max_dist: f32,
    /// Optional RNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
    /// Maximum number of recent emission records retained in-memory.
    pub history_capacity: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            world_width: 800.0,
            world_height: 600.0,
            beacon_margin: 30.0,
            scanner_size: 15.0,
            scanner_count: 10,
            initial_speed: 1.0,
            max_speed: 0.1,
            max_force: 0.2,
            perception_radius: 50.0,
            separation_weight: 1.5,
            alignment_weight: 1.0,
            cohesion_weight: 1.0,
            emit_interval_ms: 5_000,
            tick_rate_hz: 60,
            stagger: StaggerPolicy::Burst,
            rssi_at_min_dist: -30.0,
            rssi_at_effective_max_dist: -90.0,
            rng_seed: None,
            history_capacity: 256,
        }
    }
}

impl SimulationConfig {
    pub const SCANNER_COUNT: ParamSpec = ParamSpec::new("scanner_count", 1.0, 50.0, 1.0);
    pub const MAX_SPEED: ParamSpec = ParamSpec::new("max_speed", 0.1, 5.0, 0.1);
    pub const MAX_FORCE: ParamSpec = ParamSpec::new("max_force", 0.01, 1.0, 0.01);
    pub const PERCEPTION_RADIUS: ParamSpec = ParamSpec::new("perception_radius", 10.0, 200.0, 5.0);
    pub const SEPARATION_WEIGHT: ParamSpec = ParamSpec::new("separation_weight", 0.1, 5.0, 0.1);
    pub const ALIGNMENT_WEIGHT: ParamSpec = ParamSpec::new("alignment_weight", 0.1, 5.0, 0.1);
    pub const COHESION_WEIGHT: ParamSpec = ParamSpec::new("cohesion_weight", 0.1, 5.0, 0.1);
    pub const EMIT_INTERVAL_MS: ParamSpec =
        ParamSpec::new("emit_interval_ms", 500.0, 60_000.0, 500.0);

    /// Bounds metadata for every runtime-tunable parameter, in patch order.
    #[must_use]
    pub const fn param_specs() -> [ParamSpec; 8] {
        [
            Self::SCANNER_COUNT,
            Self::MAX_SPEED,
            Self::MAX_FORCE,
            Self::PERCEPTION_RADIUS,
            Self::SEPARATION_WEIGHT,
            Self::ALIGNMENT_WEIGHT,
            Self::COHESION_WEIGHT,
            Self::EMIT_INTERVAL_MS,
        ]
    }

    /// Validates the structural (non-tunable) fields.
    fn validate(&self) -> Result<(), WorldError> {
        if !(self.world_width.is_finite() && self.world_height.is_finite()) {
            return Err(WorldError::InvalidConfig("world dimensions must be finite"));
        }
        if self.world_width <= 0.0 || self.world_height <= 0.0 {
            return Err(WorldError::InvalidConfig(
                "world dimensions must be positive",
            ));
        }
        if self.scanner_size <= 0.0
            || self.scanner_size >= self.world_width
            || self.scanner_size >= self.world_height
        {
            return Err(WorldError::InvalidConfig(
                "scanner_size must be positive and smaller than both world dimensions",
            ));
        }
        if self.beacon_margin < 0.0
            || self.beacon_margin * 2.0 > self.world_width
            || self.beacon_margin * 2.0 > self.world_height
        {
            return Err(WorldError::InvalidConfig(
                "beacon_margin must fit inside the world",
            ));
        }
        if self.initial_speed < 0.0 {
            return Err(WorldError::InvalidConfig(
                "initial_speed must be non-negative",
            ));
        }
        if self.tick_rate_hz == 0 {
            return Err(WorldError::InvalidConfig("tick_rate_hz must be non-zero"));
        }
        if self.emit_interval_ms == 0 {
            return Err(WorldError::InvalidConfig(
                "emit_interval_ms must be non-zero",
            ));
        }
        if self.rssi_at_effective_max_dist > self.rssi_at_min_dist {
            return Err(WorldError::InvalidConfig(
                "signal must not increase with distance",
            ));
        }
        if self.history_capacity == 0 {
            return Err(WorldError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        Ok(())
    }

    /// Clamp every tunable field into its declared bounds.
    pub fn sanitize(&mut self) {
        self.scanner_count = Self::SCANNER_COUNT.clamp(self.scanner_count as f64) as usize;
        self.max_speed = Self::MAX_SPEED.clamp(f64::from(self.max_speed)) as f32;
        self.max_force = Self::MAX_FORCE.clamp(f64::from(self.max_force)) as f32;
        self.perception_radius =
            Self::PERCEPTION_RADIUS.clamp(f64::from(self.perception_radius)) as f32;
        self.separation_weight =
            Self::SEPARATION_WEIGHT.clamp(f64::from(self.separation_weight)) as f32;
        self.alignment_weight =
            Self::ALIGNMENT_WEIGHT.clamp(f64::from(self.alignment_weight)) as f32;
        self.cohesion_weight = Self::COHESION_WEIGHT.clamp(f64::from(self.cohesion_weight)) as f32;
        self.emit_interval_ms = Self::EMIT_INTERVAL_MS.clamp(self.emit_interval_ms as f64) as u64;
    }

    /// Telemetry cadence expressed in whole ticks, never less than one.
    #[must_use]
    pub fn emit_interval_ticks(&self) -> u64 {
        let ticks =
            (self.emit_interval_ms as f64 * f64::from(self.tick_rate_hz) / 1_000.0).round() as u64;
        ticks.max(1)
    }

    /// Returns the configured RNG, seeding from entropy when no seed is set.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::seed_from_u64(rand::random()),
        }
    }
}

/// Partial configuration update; absent fields are left untouched.
///
/// Every provided value is clamped to its declared bounds when applied, so a
/// control surface never has to reject an out-of-range number.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConfigPatch {
    pub scanner_count: Option<usize>,
    pub max_speed: Option<f32>,
    pub max_force: Option<f32>,
    pub perception_radius: Option<f32>,
    pub separation_weight: Option<f32>,
    pub alignment_weight: Option<f32>,
    pub cohesion_weight: Option<f32>,
    pub emit_interval_ms: Option<u64>,
    pub stagger: Option<StaggerPolicy>,
}

impl ConfigPatch {
    /// Returns true when the patch carries no updates at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Reject NaN and infinite values up front; clamping handles the rest.
    pub fn ensure_finite(&self) -> Result<(), &'static str> {
        let floats = [
            ("max_speed", self.max_speed),
            ("max_force", self.max_force),
            ("perception_radius", self.perception_radius),
            ("separation_weight", self.separation_weight),
            ("alignment_weight", self.alignment_weight),
            ("cohesion_weight", self.cohesion_weight),
        ];
        for (name, value) in floats {
            if let Some(value) = value {
                if !value.is_finite() {
                    return Err(name);
                }
            }
        }
        Ok(())
    }

    fn apply_to(&self, config: &mut SimulationConfig) -> ConfigDelta {
        let mut delta = ConfigDelta::default();
        if let Some(count) = self.scanner_count {
            let clamped = SimulationConfig::SCANNER_COUNT.clamp(count as f64) as usize;
            if clamped != config.scanner_count {
                config.scanner_count = clamped;
                delta.count_changed = true;
            }
        }
        if let Some(value) = self.max_speed {
            config.max_speed = SimulationConfig::MAX_SPEED.clamp(f64::from(value)) as f32;
        }
        if let Some(value) = self.max_force {
            config.max_force = SimulationConfig::MAX_FORCE.clamp(f64::from(value)) as f32;
        }
        if let Some(value) = self.perception_radius {
            config.perception_radius =
                SimulationConfig::PERCEPTION_RADIUS.clamp(f64::from(value)) as f32;
        }
        if let Some(value) = self.separation_weight {
            config.separation_weight =
                SimulationConfig::SEPARATION_WEIGHT.clamp(f64::from(value)) as f32;
        }
        if let Some(value) = self.alignment_weight {
            config.alignment_weight =
                SimulationConfig::ALIGNMENT_WEIGHT.clamp(f64::from(value)) as f32;
        }
        if let Some(value) = self.cohesion_weight {
            config.cohesion_weight =
                SimulationConfig::COHESION_WEIGHT.clamp(f64::from(value)) as f32;
        }
        if let Some(value) = self.emit_interval_ms {
            let clamped = SimulationConfig::EMIT_INTERVAL_MS.clamp(value as f64) as u64;
            if clamped != config.emit_interval_ms {
                config.emit_interval_ms = clamped;
                delta.cadence_changed = true;
            }
        }
        if let Some(policy) = self.stagger {
            if policy != config.stagger {
                config.stagger = policy;
                delta.cadence_changed = true;
            }
        }
        delta
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ConfigDelta {
    count_changed: bool,
    cadence_changed: bool,
}

/// Parameters for the distance-to-signal mapping.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SignalParams {
    pub world_width: f32,
    pub world_height: f32,
    pub rssi_at_min_dist: f32,
    pub rssi_at_effective_max_dist: f32,
}

impl SignalParams {
    #[must_use]
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            world_width: config.world_width,
            world_height: config.world_height,
            rssi_at_min_dist: config.rssi_at_min_dist,
            rssi_at_effective_max_dist: config.rssi_at_effective_max_dist,
        }
    }
}

/// Pure distance-to-signal mapping.
///
/// Distances clamp into `[1, diagonal/2]` before a linear interpolation from
/// `[0, diagonal/2]` onto `[rssi_at_min_dist, rssi_at_effective_max_dist]`,
/// rounded to the nearest integer. The low-end clamp makes `signal(0)` equal
/// `signal(1)`; the cap keeps far agents from dropping below the floor.
#[must_use]
pub fn signal_strength(distance: f32, params: &SignalParams) -> i32 {
    let half_diagonal = params.world_width.hypot(params.world_height) * 0.5;
    let effective = distance.clamp(1.0, half_diagonal);
    let t = effective / half_diagonal;
    let rssi =
        params.rssi_at_min_dist + (params.rssi_at_effective_max_dist - params.rssi_at_min_dist) * t;
    rssi.round() as i32
}

/// Seek primitive shared by cohesion (and usable standalone): steer toward a
/// target at full speed, with the correction clamped to `max_force`.
#[must_use]
pub fn seek(scanner: &Scanner, target: Vec2) -> Vec2 {
    let desired = (target - scanner.position).normalized_to(scanner.max_speed);
    if desired == Vec2::ZERO {
        return Vec2::ZERO;
    }
    (desired - scanner.velocity).clamp_length(scanner.max_force)
}

/// Separation: steer away from neighbors closer than `desired_separation`,
/// weighting closer neighbors more heavily. Zero-distance pairs are skipped.
#[must_use]
pub fn separation(scanners: &[Scanner], idx: usize, desired_separation: f32) -> Vec2 {
    let this = &scanners[idx];
    let mut steer = Vec2::ZERO;
    let mut count = 0u32;
    for (other_idx, other) in scanners.iter().enumerate() {
        if other_idx == idx {
            continue;
        }
        let d = this.position.distance(other.position);
        if d > 0.0 && d < desired_separation {
            let away = (this.position - other.position).normalized_to(1.0);
            steer = steer + away.scaled(1.0 / d);
            count += 1;
        }
    }
    if count == 0 {
        return Vec2::ZERO;
    }
    steer = steer.scaled(1.0 / count as f32);
    if steer.length_squared() <= f32::EPSILON {
        return Vec2::ZERO;
    }
    (steer.normalized_to(this.max_speed) - this.velocity).clamp_length(this.max_force)
}

/// Alignment: steer toward the average heading of neighbors within the
/// perception radius.
#[must_use]
pub fn alignment(scanners: &[Scanner], idx: usize) -> Vec2 {
    let this = &scanners[idx];
    let mut sum = Vec2::ZERO;
    let mut count = 0u32;
    for (other_idx, other) in scanners.iter().enumerate() {
        if other_idx == idx {
            continue;
        }
        let d = this.position.distance(other.position);
        if d > 0.0 && d < this.perception_radius {
            sum = sum + other.velocity;
            count += 1;
        }
    }
    if count == 0 {
        return Vec2::ZERO;
    }
    let average = sum.scaled(1.0 / count as f32);
    let desired = average.normalized_to(this.max_speed);
    if desired == Vec2::ZERO {
        return Vec2::ZERO;
    }
    (desired - this.velocity).clamp_length(this.max_force)
}

/// Cohesion: steer toward the centroid of neighbors within the perception
/// radius, via [`seek`].
#[must_use]
pub fn cohesion(scanners: &[Scanner], idx: usize) -> Vec2 {
    let this = &scanners[idx];
    let mut sum = Vec2::ZERO;
    let mut count = 0u32;
    for (other_idx, other) in scanners.iter().enumerate() {
        if other_idx == idx {
            continue;
        }
        let d = this.position.distance(other.position);
        if d > 0.0 && d < this.perception_radius {
            sum = sum + other.position;
            count += 1;
        }
    }
    if count == 0 {
        return Vec2::ZERO;
    }
    seek(this, sum.scaled(1.0 / count as f32))
}

/// Weighted sum of the three steering behaviors for one scanner.
#[must_use]
pub fn combined_steering(scanners: &[Scanner], idx: usize, config: &SimulationConfig) -> Vec2 {
    let desired_separation = config.scanner_size * 2.0;
    let sep = separation(scanners, idx, desired_separation).scaled(config.separation_weight);
    let ali = alignment(scanners, idx).scaled(config.alignment_weight);
    let coh = cohesion(scanners, idx).scaled(config.cohesion_weight);
    sep + ali + coh
}

/// Advance one scanner by one tick under the summed steering force.
///
/// Velocity is magnitude-clamped after the force is applied, the position
/// advances by the new velocity, and each axis reflects elastically off the
/// world edge (clamp into range, flip that axis's velocity sign). The
/// movement accumulator grows by the distance between the pre-step position
/// and the final, post-reflection position.
pub fn integrate(scanner: &mut Scanner, force: Vec2, bounds: Vec2, half_size: f32) {
    let before = scanner.position;
    scanner.velocity = (scanner.velocity + force).clamp_length(scanner.max_speed);
    scanner.position = scanner.position + scanner.velocity;

    if scanner.position.x - half_size < 0.0 || scanner.position.x + half_size > bounds.x {
        scanner.position.x = scanner.position.x.clamp(half_size, bounds.x - half_size);
        scanner.velocity.x = -scanner.velocity.x;
    }
    if scanner.position.y - half_size < 0.0 || scanner.position.y + half_size > bounds.y {
        scanner.position.y = scanner.position.y.clamp(half_size, bounds.y - half_size);
        scanner.velocity.y = -scanner.velocity.y;
    }

    scanner.movement_since_emit += scanner.position.distance(before);
}

/// One beacon observation inside a telemetry report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BeaconReading {
    pub signal: i32,
    pub beacon_name: String,
}

/// Wire-shaped telemetry payload for a single scanner emission cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScannerReport {
    pub agent_id: String,
    /// Movement accumulated since the previous emission, rounded to two
    /// decimals at packaging time.
    pub movement: f64,
    pub beacons: BTreeMap<String, BeaconReading>,
}

/// Errors surfaced by telemetry sinks. None of them stop the simulation.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("telemetry queue is full")]
    QueueFull,
    #[error("telemetry channel is closed")]
    Closed,
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Destination for packaged telemetry reports.
///
/// Emission is lossy by design: the world logs a failure and moves on, and
/// the movement accumulator has already been reset by then.
pub trait TelemetrySink: Send {
    fn emit(&mut self, report: &ScannerReport) -> Result<(), EmitError>;
}

/// Discards every report.
#[derive(Debug, Default)]
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {
    fn emit(&mut self, _report: &ScannerReport) -> Result<(), EmitError> {
        Ok(())
    }
}

/// LED pattern directive, encoded exactly as the device firmware expects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "params")]
pub enum LedBehavior {
    Off,
    Breathing { color: String },
    HeartBeat { color: String, period: u64 },
    Cycle { color: String, delay: u64 },
}

/// Vibration pattern directive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "params")]
pub enum VibrationBehavior {
    Off,
    Constant { intensity: u8 },
    Burst { intensity: u8, frequency: u64 },
}

/// Opaque remote-behavior payload relayed to the device collaborator.
/// The core never interprets it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceDirective {
    #[serde(rename = "led_behavior", skip_serializing_if = "Option::is_none")]
    pub led: Option<LedBehavior>,
    #[serde(rename = "vibration_behavior", skip_serializing_if = "Option::is_none")]
    pub vibration: Option<VibrationBehavior>,
}

/// External device-configuration collaborator.
pub trait DeviceConfigurator: Send {
    fn configure(&mut self, scanner: &str, directive: &DeviceDirective);
}

/// Swallows every directive.
#[derive(Debug, Default)]
pub struct NullDeviceConfigurator;

impl DeviceConfigurator for NullDeviceConfigurator {
    fn configure(&mut self, _scanner: &str, _directive: &DeviceDirective) {}
}

/// Control-plane commands applied between ticks by the owning loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    UpdateConfig(ConfigPatch),
    Reset,
    ConfigureDevice {
        scanner: String,
        directive: DeviceDirective,
    },
}

/// Apply a control command to the world. Called from the single simulation
/// thread, so ordering against ticks is trivially serial.
pub fn apply_control_command(world: &mut World, command: ControlCommand) {
    match command {
        ControlCommand::UpdateConfig(patch) => world.apply_config(&patch),
        ControlCommand::Reset => world.reset(),
        ControlCommand::ConfigureDevice { scanner, directive } => {
            world.relay_device_directive(&scanner, &directive);
        }
    }
}

/// Single scheduler replacing per-agent wall-clock timers: one `(due_tick,
/// scanner_index)` entry per scanner in a min-heap, re-armed on fire. Pop
/// order is deterministic (tick, then index).
#[derive(Debug, Default)]
struct EmitSchedule {
    interval: u64,
    heap: BinaryHeap<Reverse<(u64, usize)>>,
}

impl EmitSchedule {
    fn seed(
        &mut self,
        scanner_count: usize,
        interval: u64,
        now: Tick,
        policy: StaggerPolicy,
        rng: &mut SmallRng,
    ) {
        self.interval = interval.max(1);
        self.heap.clear();
        for idx in 0..scanner_count {
            let due = match policy {
                StaggerPolicy::Burst => now.0 + self.interval,
                StaggerPolicy::Staggered => now.0 + 1 + rng.random_range(0..self.interval),
            };
            self.heap.push(Reverse((due, idx)));
        }
    }

    /// Collect every scanner due at `tick`, re-arming each at `due + interval`.
    fn due(&mut self, tick: Tick, out: &mut Vec<usize>) {
        out.clear();
        while let Some(&Reverse((due, idx))) = self.heap.peek() {
            if due > tick.0 {
                break;
            }
            self.heap.pop();
            out.push(idx);
            self.heap.push(Reverse((due + self.interval, idx)));
        }
    }
}

/// Events emitted after processing a world tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TickEvents {
    pub tick: Tick,
    /// Number of telemetry reports packaged this tick.
    pub reports_emitted: usize,
}

/// Record of one emission, retained in the bounded in-memory history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmitRecord {
    pub tick: Tick,
    pub agent_id: String,
    pub movement: f64,
}

/// Errors that can occur when constructing world state.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Owned aggregate for one simulation: beacons, scanners, clock, schedule,
/// and the external collaborators. No ambient globals; everything flows
/// through explicit methods on the single owning thread.
pub struct World {
    config: SimulationConfig,
    tick: Tick,
    rng: SmallRng,
    beacons: Vec<Beacon>,
    scanners: Vec<Scanner>,
    schedule: EmitSchedule,
    telemetry: Box<dyn TelemetrySink>,
    devices: Box<dyn DeviceConfigurator>,
    history: VecDeque<EmitRecord>,
    force_scratch: Vec<Vec2>,
    due_scratch: Vec<usize>,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("scanner_count", &self.scanners.len())
            .field("beacon_count", &self.beacons.len())
            .finish()
    }
}

impl World {
    /// Instantiate a new world with no external collaborators attached.
    pub fn new(config: SimulationConfig) -> Result<Self, WorldError> {
        Self::with_sinks(
            config,
            Box::new(NullTelemetry),
            Box::new(NullDeviceConfigurator),
        )
    }

    /// Instantiate a new world with the supplied telemetry sink and device
    /// relay. Tunable config fields are clamped into their declared bounds;
    /// structural fields must validate.
    pub fn with_sinks(
        mut config: SimulationConfig,
        telemetry: Box<dyn TelemetrySink>,
        devices: Box<dyn DeviceConfigurator>,
    ) -> Result<Self, WorldError> {
        config.validate()?;
        config.sanitize();
        let mut rng = config.seeded_rng();
        let beacons = corner_beacons(&config);
        let scanners: Vec<Scanner> = (0..config.scanner_count)
            .map(|idx| Scanner::spawn(scanner_name(idx), &config, &mut rng))
            .collect();
        let mut schedule = EmitSchedule::default();
        schedule.seed(
            scanners.len(),
            config.emit_interval_ticks(),
            Tick::zero(),
            config.stagger,
            &mut rng,
        );
        let history_capacity = config.history_capacity;
        Ok(Self {
            config,
            tick: Tick::zero(),
            rng,
            beacons,
            scanners,
            schedule,
            telemetry,
            devices,
            history: VecDeque::with_capacity(history_capacity),
            force_scratch: Vec::new(),
            due_scratch: Vec::new(),
        })
    }

    /// Execute one simulation tick: steering forces, integration, then any
    /// telemetry emissions due this tick.
    pub fn step(&mut self) -> TickEvents {
        let next_tick = self.tick.next();
        self.stage_forces();
        self.stage_integrate();
        let reports_emitted = self.stage_emit(next_tick);
        self.tick = next_tick;
        TickEvents {
            tick: next_tick,
            reports_emitted,
        }
    }

    fn stage_forces(&mut self) {
        let scanners = &self.scanners;
        let config = &self.config;
        let forces: Vec<Vec2> = (0..scanners.len())
            .into_par_iter()
            .map(|idx| combined_steering(scanners, idx, config))
            .collect();
        self.force_scratch = forces;
    }

    fn stage_integrate(&mut self) {
        let bounds = Vec2::new(self.config.world_width, self.config.world_height);
        let half_size = self.config.scanner_size * 0.5;
        for (scanner, force) in self
            .scanners
            .iter_mut()
            .zip(self.force_scratch.iter().copied())
        {
            integrate(scanner, force, bounds, half_size);
        }
    }

    fn stage_emit(&mut self, tick: Tick) -> usize {
        let mut due = std::mem::take(&mut self.due_scratch);
        self.schedule.due(tick, &mut due);
        let emitted = due.len();
        for &idx in &due {
            let report = self.package_report(idx);
            if let Err(err) = self.telemetry.emit(&report) {
                warn!(scanner = %report.agent_id, error = %err, "telemetry emission lost");
            } else {
                debug!(scanner = %report.agent_id, movement = report.movement, "telemetry emitted");
            }
            // Accounting resets once the report is packaged; delivery is lossy.
            self.scanners[idx].movement_since_emit = 0.0;
            if self.history.len() >= self.config.history_capacity {
                self.history.pop_front();
            }
            self.history.push_back(EmitRecord {
                tick,
                agent_id: report.agent_id,
                movement: report.movement,
            });
        }
        self.due_scratch = due;
        emitted
    }

    /// Package the telemetry report for one scanner against every beacon.
    fn package_report(&self, idx: usize) -> ScannerReport {
        let scanner = &self.scanners[idx];
        let params = SignalParams::from_config(&self.config);
        let mut beacons = BTreeMap::new();
        for beacon in &self.beacons {
            let distance = scanner.position.distance(beacon.position);
            beacons.insert(
                beacon.id.clone(),
                BeaconReading {
                    signal: signal_strength(distance, &params),
                    beacon_name: beacon.name.clone(),
                },
            );
        }
        ScannerReport {
            agent_id: scanner.name.clone(),
            movement: (f64::from(scanner.movement_since_emit) * 100.0).round() / 100.0,
            beacons,
        }
    }

    /// Apply a partial configuration update, clamping every provided value.
    /// A scanner-count change discards and re-seeds the whole fleet; a
    /// cadence change rebuilds the emission schedule.
    pub fn apply_config(&mut self, patch: &ConfigPatch) {
        let delta = patch.apply_to(&mut self.config);
        for scanner in &mut self.scanners {
            scanner.refresh_params(&self.config);
        }
        if delta.count_changed {
            debug!(count = self.config.scanner_count, "scanner count changed; re-seeding fleet");
            self.reseed_scanners();
        } else if delta.cadence_changed {
            self.reseed_schedule();
        }
    }

    /// Discard every scanner and spawn a fresh fleet with randomized
    /// positions, zeroed accumulators, and a rebuilt emission schedule.
    pub fn reset(&mut self) {
        self.reseed_scanners();
    }

    fn reseed_scanners(&mut self) {
        self.scanners = (0..self.config.scanner_count)
            .map(|idx| Scanner::spawn(scanner_name(idx), &self.config, &mut self.rng))
            .collect();
        self.reseed_schedule();
    }

    fn reseed_schedule(&mut self) {
        self.schedule.seed(
            self.scanners.len(),
            self.config.emit_interval_ticks(),
            self.tick,
            self.config.stagger,
            &mut self.rng,
        );
    }

    /// Relay a remote-behavior directive to the device collaborator.
    pub fn relay_device_directive(&mut self, scanner: &str, directive: &DeviceDirective) {
        self.devices.configure(scanner, directive);
    }

    /// Replace the telemetry sink.
    pub fn set_telemetry(&mut self, telemetry: Box<dyn TelemetrySink>) {
        self.telemetry = telemetry;
    }

    /// Replace the device-configuration collaborator.
    pub fn set_device_configurator(&mut self, devices: Box<dyn DeviceConfigurator>) {
        self.devices = devices;
    }

    /// Returns an immutable reference to configuration.
    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// The fixed beacon set.
    #[must_use]
    pub fn beacons(&self) -> &[Beacon] {
        &self.beacons
    }

    /// The live scanner fleet.
    #[must_use]
    pub fn scanners(&self) -> &[Scanner] {
        &self.scanners
    }

    /// Number of live scanners.
    #[must_use]
    pub fn scanner_count(&self) -> usize {
        self.scanners.len()
    }

    /// Iterate over retained emission records, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &EmitRecord> {
        self.history.iter()
    }
}
