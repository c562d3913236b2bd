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

use crate::clock::Clock;
use crate::sensor::core::{Distance, DistanceCm, EchoPin, TriggerPin};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Longest we wait for an echo, roughly a five meter round trip.
pub const ECHO_TIMEOUT: Duration = Duration::from_micros(30_000);

/// Speed of sound in centimeters per microsecond.
const SOUND_SPEED_CM_PER_US: f64 = 0.034;
const SETTLE_DELAY: Duration = Duration::from_micros(2);
const TRIGGER_PULSE: Duration = Duration::from_micros(10);

/// Measure how long the echo line stays high, in the manner of the Arduino `pulseIn` function.
///
/// Returns `None` if the whole measurement takes longer than `timeout`. Every phase
/// (waiting for a previous pulse to end, waiting for the pulse to start, and the pulse
/// itself) counts against the same deadline. The returned width is from the rising
/// to the falling edge only.
fn pulse_width(echo: &dyn EchoPin, clock: &dyn Clock, timeout: Duration) -> Option<Duration> {
    let start = clock.now();
    let expired = || clock.now() - start > timeout;

    while echo.is_high() {
        if expired() {
            return None;
        }
    }

    while !echo.is_high() {
        if expired() {
            return None;
        }
    }

    let rise = clock.now();
    while echo.is_high() {
        if expired() {
            return None;
        }
    }

    let fall = clock.now();
    if fall - start > timeout {
        None
    } else {
        Some(fall - rise)
    }
}

/// Convert the width of an echo pulse to a one-way distance.
fn distance_from_pulse(width: Duration) -> Distance {
    let micros = width.as_micros();
    if micros == 0 {
        return Distance::NoEcho;
    }

    // Sound covers the distance twice, out to the object and back
    Distance::Measured(DistanceCm::from(micros as f64 * SOUND_SPEED_CM_PER_US / 2.0))
}

/// Read distance from an HC-SR04 style ultrasonic sensor using separate trigger
/// and echo lines.
pub struct DistanceSensor {
    trigger: Box<dyn TriggerPin + Send + 'static>,
    echo: Box<dyn EchoPin + Send + 'static>,
    clock: Arc<dyn Clock + Send + Sync + 'static>,
    timeout: Duration,
}

impl DistanceSensor {
    pub fn from_pins<T, E>(trigger: T, echo: E, clock: Arc<dyn Clock + Send + Sync + 'static>) -> Self
    where
        T: TriggerPin + Send + 'static,
        E: EchoPin + Send + 'static,
    {
        Self {
            trigger: Box::new(trigger),
            echo: Box::new(echo),
            clock,
            timeout: ECHO_TIMEOUT,
        }
    }

    fn send_trigger(&mut self) {
        // Make sure the line is low so the sensor sees a clean rising edge, then hold
        // it high for 10us to start the ranging burst.
        self.trigger.set_low();
        thread::sleep(SETTLE_DELAY);
        self.trigger.set_high();
        thread::sleep(TRIGGER_PULSE);
        self.trigger.set_low();
    }

    /// Trigger a measurement and convert the echo pulse to a distance.
    ///
    /// `Distance::NoEcho` is returned if the echo didn't arrive in time. The read
    /// is not retried.
    pub fn read(&mut self) -> Distance {
        self.send_trigger();

        match pulse_width(self.echo.as_ref(), self.clock.as_ref(), self.timeout) {
            Some(width) => distance_from_pulse(width),
            None => Distance::NoEcho,
        }
    }
}

impl Debug for DistanceSensor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistanceSensor")
            .field("trigger", &self.trigger.pin())
            .field("echo", &self.echo.pin())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::{distance_from_pulse, DistanceSensor, ECHO_TIMEOUT};
    use crate::clock::Clock;
    use crate::sensor::core::{Distance, DistanceCm};
    use crate::sensor::test::{ultrasonic, Echo, FakeClock};
    use std::sync::Arc;
    use std::time::Duration;

    const RISE_AFTER: Duration = Duration::from_micros(450);

    fn pulse(micros: u64) -> Echo {
        Echo::Pulse {
            rise_after: RISE_AFTER,
            width: Duration::from_micros(micros),
        }
    }

    fn sensor(clock: &FakeClock, echo: Echo) -> DistanceSensor {
        let (trigger, echo) = ultrasonic(clock, echo);
        DistanceSensor::from_pins(trigger, echo, Arc::new(clock.clone()))
    }

    fn assert_cm(expected: f64, actual: Distance) {
        match actual {
            Distance::Measured(cm) => {
                let cm: f64 = cm.into();
                assert!((expected - cm).abs() < 1e-9, "expected {}cm, got {}cm", expected, cm);
            }
            Distance::NoEcho => panic!("expected {}cm, got no echo", expected),
        }
    }

    #[test]
    fn test_distance_from_pulse() {
        assert_cm(17.0, distance_from_pulse(Duration::from_micros(1000)));
        assert_cm(0.017, distance_from_pulse(Duration::from_micros(1)));
        assert_cm(510.0, distance_from_pulse(Duration::from_micros(30_000)));
    }

    #[test]
    fn test_distance_from_pulse_zero_is_no_echo() {
        assert_eq!(Distance::NoEcho, distance_from_pulse(Duration::ZERO));
        assert_eq!(Distance::NoEcho, distance_from_pulse(Duration::from_nanos(999)));
    }

    #[test]
    fn test_read_trigger_sequence() {
        let clock = FakeClock::new();
        let (trigger, echo) = ultrasonic(&clock, pulse(1000));
        let mut sensor = DistanceSensor::from_pins(trigger.clone(), echo, Arc::new(clock));

        let _ = sensor.read();
        assert_eq!(vec![false, true, false], trigger.levels());
    }

    #[test]
    fn test_read_valid_pulse() {
        let clock = FakeClock::new();
        let mut sensor = sensor(&clock, pulse(1000));

        assert_cm(17.0, sensor.read());
    }

    #[test]
    fn test_read_repeated() {
        let clock = FakeClock::new();
        let mut sensor = sensor(&clock, pulse(1000));

        assert_cm(17.0, sensor.read());
        clock.advance(Duration::from_secs(6));
        assert_cm(17.0, sensor.read());
    }

    #[test]
    fn test_read_pulse_widths() {
        for micros in [1u64, 58, 2500, 12_345, 29_000] {
            let clock = FakeClock::new();
            let mut sensor = sensor(&clock, pulse(micros));

            assert_cm(micros as f64 * 0.034 / 2.0, sensor.read());
        }
    }

    #[test]
    fn test_read_pulse_longer_than_timeout() {
        let clock = FakeClock::new();
        let mut sensor = sensor(&clock, pulse(ECHO_TIMEOUT.as_micros() as u64 + 1));

        assert_eq!(Distance::NoEcho, sensor.read());
    }

    #[test]
    fn test_read_no_echo() {
        let clock = FakeClock::new();
        let mut sensor = sensor(&clock, Echo::Never);

        let distance = sensor.read();
        assert_eq!(Distance::NoEcho, distance);
        assert_eq!(Distance::NO_ECHO_SENTINEL, distance.as_published());

        // Gave up shortly after the timeout elapsed
        let waited = clock.now();
        assert!(waited > ECHO_TIMEOUT);
        assert!(waited < ECHO_TIMEOUT + Duration::from_micros(10));
    }

    #[test]
    fn test_read_echo_late() {
        let clock = FakeClock::new();
        let echo = Echo::Pulse {
            rise_after: ECHO_TIMEOUT * 2,
            width: Duration::from_micros(1000),
        };
        let mut sensor = sensor(&clock, echo);

        assert_eq!(Distance::NoEcho, sensor.read());
    }

    #[test]
    fn test_read_late_echo_long_pulse() {
        let clock = FakeClock::new();
        let echo = Echo::Pulse {
            rise_after: Duration::from_micros(29_000),
            width: Duration::from_micros(29_000),
        };
        let mut sensor = sensor(&clock, echo);

        // Neither phase exceeds the timeout alone but together they do
        assert_eq!(Distance::NoEcho, sensor.read());
        assert!(clock.now() < ECHO_TIMEOUT + Duration::from_micros(10));
    }

    #[test]
    fn test_read_pulse_ending_at_timeout() {
        let clock = FakeClock::new();
        let echo = Echo::Pulse {
            rise_after: Duration::from_micros(10_000),
            width: Duration::from_micros(19_000),
        };
        let mut sensor = sensor(&clock, echo);

        assert_cm(19_000.0 * 0.034 / 2.0, sensor.read());
        assert!(clock.now() <= ECHO_TIMEOUT);
    }

    #[test]
    fn test_read_echo_stuck_high() {
        let clock = FakeClock::new();
        let mut sensor = sensor(&clock, Echo::StuckHigh);

        assert_eq!(Distance::NoEcho, sensor.read());
    }

    #[test]
    fn test_no_echo_distinct_from_valid_readings() {
        let clock = FakeClock::new();
        let mut sensor = sensor(&clock, pulse(1));

        let shortest = sensor.read();
        assert_ne!(Distance::NoEcho, shortest);
        assert!(shortest.as_published() > 0.0);
        assert_eq!(Some(DistanceCm::from(0.017)), shortest.centimeters());
    }
}
