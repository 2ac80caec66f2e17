//! HTTP uplink for beaconsim: a lossy, fire-and-forget telemetry push plus a
//! device-configuration relay.
//!
//! A single worker thread owns the blocking HTTP client; the simulation side
//! only enqueues onto a bounded channel. A full queue or a failed delivery
//! drops the payload with a warning — telemetry loss is an accepted outcome,
//! and nothing here may stall the tick loop.

use beaconsim_core::{
    DeviceConfigurator, DeviceDirective, EmitError, ScannerReport, TelemetrySink,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_QUEUE_CAPACITY: usize = 256;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// Connection settings for the uplink worker.
#[derive(Debug, Clone)]
pub struct UplinkConfig {
    /// Backend base URL, e.g. `http://127.0.0.1:5000`.
    pub base_url: String,
    /// Bounded in-process queue between the simulation and the worker.
    pub queue_capacity: usize,
    /// Per-request timeout; an expired request is a lost delivery.
    pub request_timeout: Duration,
}

impl UplinkConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Errors raised while standing up the uplink. Delivery failures are never
/// errors at this level; they are logged and dropped by the worker.
#[derive(Debug, Error)]
pub enum UplinkError {
    #[error("failed to build http client: {0}")]
    Client(String),
    #[error("failed to spawn uplink worker: {0}")]
    Worker(String),
}

enum UplinkJob {
    Telemetry(ScannerReport),
    Configure {
        scanner: String,
        directive: DeviceDirective,
    },
}

/// Owns the worker thread and hands out sink handles for the world.
///
/// Dropping the pipeline signals the worker, which finishes the request in
/// flight, drains the queue, and exits; live handles then fail fast.
pub struct UplinkPipeline {
    sender: SyncSender<UplinkJob>,
    dropped: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl UplinkPipeline {
    /// Build the HTTP client and start the worker thread.
    pub fn connect(config: UplinkConfig) -> Result<Self, UplinkError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| UplinkError::Client(err.to_string()))?;
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let (sender, receiver) = mpsc::sync_channel(config.queue_capacity.max(1));
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_shutdown = Arc::clone(&shutdown);
        let worker = thread::Builder::new()
            .name("beaconsim-uplink".to_string())
            .spawn(move || run_worker(client, base_url, receiver, worker_shutdown))
            .map_err(|err| UplinkError::Worker(err.to_string()))?;
        Ok(Self {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
            shutdown,
            worker: Some(worker),
        })
    }

    /// Telemetry sink handle for [`beaconsim_core::World::with_sinks`].
    #[must_use]
    pub fn telemetry_sink(&self) -> HttpTelemetry {
        HttpTelemetry {
            sender: self.sender.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }

    /// Device-configuration relay handle.
    #[must_use]
    pub fn device_configurator(&self) -> HttpDeviceConfigurator {
        HttpDeviceConfigurator {
            sender: self.sender.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }

    /// Number of payloads dropped because the queue was full.
    #[must_use]
    pub fn dropped_jobs(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for UplinkPipeline {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(
    client: reqwest::blocking::Client,
    base_url: String,
    receiver: Receiver<UplinkJob>,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        match receiver.recv_timeout(SHUTDOWN_POLL) {
            Ok(UplinkJob::Telemetry(report)) => {
                post_json(&client, &format!("{base_url}/data"), &report);
            }
            Ok(UplinkJob::Configure { scanner, directive }) => {
                post_json(
                    &client,
                    &format!("{base_url}/configure/{scanner}"),
                    &directive,
                );
            }
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// One POST, one outcome. Failures are logged and forgotten; there is no
/// retry and no backoff.
fn post_json<T: Serialize>(client: &reqwest::blocking::Client, url: &str, payload: &T) {
    match client.post(url).json(payload).send() {
        Ok(response) if response.status().is_success() => {
            debug!(url, "uplink delivered");
        }
        Ok(response) => {
            warn!(url, status = %response.status(), "backend rejected uplink payload");
        }
        Err(err) => {
            warn!(url, error = %err, "uplink delivery failed");
        }
    }
}

/// [`TelemetrySink`] that enqueues reports for the worker thread.
#[derive(Clone)]
pub struct HttpTelemetry {
    sender: SyncSender<UplinkJob>,
    dropped: Arc<AtomicU64>,
}

impl TelemetrySink for HttpTelemetry {
    fn emit(&mut self, report: &ScannerReport) -> Result<(), EmitError> {
        match self.sender.try_send(UplinkJob::Telemetry(report.clone())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(EmitError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(EmitError::Closed),
        }
    }
}

/// [`DeviceConfigurator`] that enqueues directives for the worker thread.
#[derive(Clone)]
pub struct HttpDeviceConfigurator {
    sender: SyncSender<UplinkJob>,
    dropped: Arc<AtomicU64>,
}

impl DeviceConfigurator for HttpDeviceConfigurator {
    fn configure(&mut self, scanner: &str, directive: &DeviceDirective) {
        let job = UplinkJob::Configure {
            scanner: scanner.to_string(),
            directive: directive.clone(),
        };
        match self.sender.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(scanner, "device directive dropped; uplink queue full");
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(scanner, "device directive dropped; uplink closed");
            }
        }
    }
}
