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

#![cfg(test)]

use crate::clock::Clock;
use crate::sensor::core::{AnalogChannel, EchoPin, SensorError, SensorErrorKind, TriggerPin};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Microseconds the fake clock moves forward each time a mock echo pin is polled.
const POLL_MICROS: u64 = 1;
const NOT_FIRED: u64 = u64::MAX;

/// Monotonic clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeClock {
    micros: Arc<AtomicU64>,
}

impl FakeClock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn advance(&self, d: Duration) {
        self.micros.fetch_add(d.as_micros() as u64, Ordering::SeqCst);
    }

    /// Return the current time in microseconds and move the clock forward.
    fn tick(&self, micros: u64) -> u64 {
        self.micros.fetch_add(micros, Ordering::SeqCst)
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::SeqCst))
    }
}

pub(crate) struct FixedChannel(pub(crate) u16);

impl AnalogChannel for FixedChannel {
    fn read_raw(&mut self) -> Result<u16, SensorError> {
        Ok(self.0)
    }

    fn channel(&self) -> u8 {
        0
    }
}

pub(crate) struct FailingChannel;

impl AnalogChannel for FailingChannel {
    fn read_raw(&mut self) -> Result<u16, SensorError> {
        Err(SensorError::KindMsg(SensorErrorKind::Transfer, "unable to read from ADC"))
    }

    fn channel(&self) -> u8 {
        0
    }
}

/// Trigger pin that records every level it is driven to (`true` for high) and tells
/// the paired `MockEchoPin` when a trigger pulse has been sent.
#[derive(Debug, Clone)]
pub(crate) struct RecordingTriggerPin {
    clock: FakeClock,
    levels: Arc<Mutex<Vec<bool>>>,
    fired_at: Arc<AtomicU64>,
}

impl RecordingTriggerPin {
    pub(crate) fn levels(&self) -> Vec<bool> {
        self.levels.lock().unwrap().clone()
    }
}

impl TriggerPin for RecordingTriggerPin {
    fn pin(&self) -> u8 {
        0
    }

    fn set_high(&mut self) {
        self.levels.lock().unwrap().push(true);
    }

    fn set_low(&mut self) {
        let mut levels = self.levels.lock().unwrap();
        // Falling edge at the end of the trigger pulse starts the measurement
        if levels.last() == Some(&true) {
            self.fired_at.store(self.clock.now().as_micros() as u64, Ordering::SeqCst);
        }

        levels.push(false);
    }
}

/// Behavior of the echo line after each trigger pulse.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Echo {
    Never,
    StuckHigh,
    Pulse { rise_after: Duration, width: Duration },
}

/// Echo pin driven by a `FakeClock`. Each poll of the pin advances the clock by one
/// microsecond. For `Echo::Pulse` the pin reports high for `width` starting `rise_after`
/// the most recent trigger pulse.
pub(crate) struct MockEchoPin {
    clock: FakeClock,
    echo: Echo,
    fired_at: Arc<AtomicU64>,
}

impl EchoPin for MockEchoPin {
    fn pin(&self) -> u8 {
        0
    }

    fn is_high(&self) -> bool {
        let now = self.clock.tick(POLL_MICROS);
        let fired = self.fired_at.load(Ordering::SeqCst);

        match self.echo {
            Echo::Never => false,
            Echo::StuckHigh => true,
            Echo::Pulse { .. } if fired == NOT_FIRED => false,
            Echo::Pulse { rise_after, width } => {
                let elapsed = now - fired;
                let rise = rise_after.as_micros() as u64;
                elapsed >= rise && elapsed < rise + width.as_micros() as u64
            }
        }
    }
}

/// Create a trigger and echo pin pair for an ultrasonic sensor that behaves as `echo`.
pub(crate) fn ultrasonic(clock: &FakeClock, echo: Echo) -> (RecordingTriggerPin, MockEchoPin) {
    let fired_at = Arc::new(AtomicU64::new(NOT_FIRED));
    let trigger = RecordingTriggerPin {
        clock: clock.clone(),
        levels: Arc::new(Mutex::new(Vec::new())),
        fired_at: fired_at.clone(),
    };
    let echo = MockEchoPin {
        clock: clock.clone(),
        echo,
        fired_at,
    };

    (trigger, echo)
}
