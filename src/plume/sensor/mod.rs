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

mod core;
mod gas;
mod ranging;
mod test;

pub use crate::sensor::core::{
    open_adc, open_echo_pin, open_trigger_pin, AnalogChannel, Distance, DistanceCm, EchoPin, GasConcentration,
    Mcp3208, SensorError, SensorErrorKind, TriggerPin, ADC_MAX,
};
pub use crate::sensor::gas::GasSensor;
pub use crate::sensor::ranging::{DistanceSensor, ECHO_TIMEOUT};

#[cfg(test)]
pub(crate) use crate::sensor::test::{ultrasonic, Echo, FailingChannel, FakeClock, FixedChannel};
