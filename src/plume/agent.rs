// Plume - Gas and distance telemetry publisher
//
// Copyright 2024 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::clock::{Clock, SystemTimeSource, TimeSource, Timestamp};
use crate::metrics::AgentMetrics;
use crate::network::DeviceIdentity;
use crate::sensor::{Distance, DistanceSensor, GasConcentration, GasSensor};
use crate::store::{Store, StoreError, StoreErrorKind, StorePath, FIELD_DISTANCE_CM, FIELD_PPM};
use std::fmt::{self, Formatter};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

/// Minimum amount of time between publishing values to the store.
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_millis(1000);

/// Delay after each cycle before the sensors are read again.
pub const DEFAULT_CYCLE_DELAY: Duration = Duration::from_millis(6000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentConfig {
    pub publish_interval: Duration,
    pub cycle_delay: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
            cycle_delay: DEFAULT_CYCLE_DELAY,
        }
    }
}

/// Readings from both sensors taken during a single cycle. `gas` is only missing
/// when the ADC could not be read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub gas: Option<GasConcentration>,
    pub distance: Distance,
}

/// Why a cycle did not publish its sample. Skipped samples are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    StoreNotReady,
    RateLimited,
}

impl SkipReason {
    pub fn as_label(&self) -> &'static str {
        match self {
            SkipReason::StoreNotReady => "store_not_ready",
            SkipReason::RateLimited => "rate_limited",
        }
    }
}

/// Result of writing a single field to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOutcome {
    Written,
    Failed(StoreErrorKind),
    /// There was no value to write
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Skipped(SkipReason),
    Published { ppm: FieldOutcome, distance: FieldOutcome },
}

/// Everything that happened during a single cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub sample: Sample,
    pub timestamp: Timestamp,
    pub outcome: Outcome,
}

/// Create a connected pair used to stop `Agent::run` from another thread.
pub fn shutdown_channel() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = mpsc::channel();
    (ShutdownHandle { tx }, Shutdown { rx })
}

/// Requests that the agent stop. Dropping every handle has the same effect.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Sender<()>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        // The agent may have already stopped, that's fine
        let _ = self.tx.send(());
    }
}

#[derive(Debug)]
pub struct Shutdown {
    rx: Receiver<()>,
}

impl Shutdown {
    /// Wait up to `timeout` for shutdown to be requested, returning true if it was.
    fn wait(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

/// Periodically read both sensors and publish their values to a store.
///
/// All state carried between cycles lives here: the device identity, sensors,
/// store, and the last time the publish gate was passed.
pub struct Agent {
    identity: DeviceIdentity,
    gas: GasSensor,
    distance: DistanceSensor,
    store: Box<dyn Store + Send + 'static>,
    clock: Arc<dyn Clock + Send + Sync + 'static>,
    time: Box<dyn TimeSource + Send + 'static>,
    metrics: AgentMetrics,
    config: AgentConfig,
    last_publish: Option<Duration>,
}

impl Agent {
    pub fn new<S>(
        identity: DeviceIdentity,
        gas: GasSensor,
        distance: DistanceSensor,
        store: S,
        clock: Arc<dyn Clock + Send + Sync + 'static>,
        config: AgentConfig,
    ) -> Self
    where
        S: Store + Send + 'static,
    {
        Self {
            identity,
            gas,
            distance,
            store: Box::new(store),
            clock,
            time: Box::new(SystemTimeSource),
            metrics: AgentMetrics::new(),
            config,
            last_publish: None,
        }
    }

    pub fn with_time_source<T>(mut self, time: T) -> Self
    where
        T: TimeSource + Send + 'static,
    {
        self.time = Box::new(time);
        self
    }

    pub fn with_metrics(mut self, metrics: AgentMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    fn sample(&mut self) -> Sample {
        let gas = match self.gas.read() {
            Ok(gas) => Some(gas),
            Err(e) => {
                self.metrics.error(e.kind().as_label());
                tracing::error!(message = "unable to read gas sensor", error = %e);
                None
            }
        };

        let distance = self.distance.read();
        if distance == Distance::NoEcho {
            tracing::warn!(message = "no echo received from distance sensor");
        } else {
            tracing::debug!(message = "parsed distance", distance = %distance);
        }

        self.metrics.sampled(gas, distance);
        Sample { gas, distance }
    }

    /// Decide if this cycle may publish, recording the time if so.
    fn gate(&mut self) -> Result<(), SkipReason> {
        if !self.store.ready() {
            return Err(SkipReason::StoreNotReady);
        }

        let now = self.clock.now();
        if let Some(last) = self.last_publish {
            if now.saturating_sub(last) < self.config.publish_interval {
                return Err(SkipReason::RateLimited);
            }
        }

        self.last_publish = Some(now);
        Ok(())
    }

    fn field_outcome(&self, path: &StorePath, res: Result<(), StoreError>) -> FieldOutcome {
        match res {
            Ok(_) => {
                tracing::info!(message = "saved value", path = %path);
                FieldOutcome::Written
            }
            Err(e) => {
                self.metrics.error(e.kind().as_label());
                tracing::error!(message = "failed to save value", path = %path, reason = %e);
                FieldOutcome::Failed(e.kind())
            }
        }
    }

    /// Write each field of the sample on its own. A failure writing one field has
    /// no effect on writing the other.
    fn publish(&mut self, timestamp: &Timestamp, sample: &Sample) -> Outcome {
        self.metrics.published();

        let ppm = match sample.gas {
            Some(gas) => {
                let path = StorePath::new(&self.identity, timestamp, FIELD_PPM);
                let res = self.store.write_integer(&path, gas.into());
                self.field_outcome(&path, res)
            }
            None => FieldOutcome::Absent,
        };

        // A missing echo is written as the sentinel rather than omitted so the store
        // records that the measurement failed.
        let path = StorePath::new(&self.identity, timestamp, FIELD_DISTANCE_CM);
        let res = self.store.write_float(&path, sample.distance.as_published());
        let distance = self.field_outcome(&path, res);

        Outcome::Published { ppm, distance }
    }

    /// Run a single cycle: read both sensors, then publish the readings if the
    /// store is ready and enough time has passed since the last publish.
    pub fn cycle(&mut self) -> CycleReport {
        let sample = self.sample();
        let timestamp = Timestamp::from(self.time.now());

        tracing::info!(
            message = "sampled sensors",
            timestamp = %timestamp,
            gas = ?sample.gas.map(i64::from),
            distance = %sample.distance,
        );

        let outcome = match self.gate() {
            Ok(_) => self.publish(&timestamp, &sample),
            Err(reason) => {
                self.metrics.skipped(reason);
                tracing::debug!(message = "skipped publishing sample", reason = reason.as_label());
                Outcome::Skipped(reason)
            }
        };

        CycleReport {
            sample,
            timestamp,
            outcome,
        }
    }

    /// Run cycles until `shutdown` is triggered, waiting `cycle_delay` after each one.
    /// The current cycle always finishes before returning. Returns the number of cycles run.
    pub fn run(&mut self, shutdown: &Shutdown) -> u64 {
        let mut cycles = 0;

        tracing::info!(
            message = "starting sample loop",
            identity = %self.identity,
            cycle_delay_ms = self.config.cycle_delay.as_millis() as u64,
            publish_interval_ms = self.config.publish_interval.as_millis() as u64,
        );

        loop {
            let _ = self.cycle();
            cycles += 1;

            if shutdown.wait(self.config.cycle_delay) {
                break;
            }
        }

        tracing::info!(message = "stopped sample loop", cycles = cycles);
        cycles
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("identity", &self.identity)
            .field("gas", &self.gas)
            .field("distance", &self.distance)
            .field("config", &self.config)
            .field("last_publish", &self.last_publish)
            .finish()
    }
}
