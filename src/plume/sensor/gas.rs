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

use crate::sensor::core::{AnalogChannel, GasConcentration, SensorError, ADC_MAX};
use std::fmt::{Debug, Formatter};

const ADC_REFERENCE_VOLTS: f64 = 3.3;

/// Read a relative gas concentration from an MQ135 style sensor through an ADC channel.
pub struct GasSensor {
    channel: Box<dyn AnalogChannel + Send + 'static>,
}

impl GasSensor {
    pub fn from_channel<T>(channel: T) -> Self
    where
        T: AnalogChannel + Send + 'static,
    {
        Self {
            channel: Box::new(channel),
        }
    }

    /// Convert a raw 12-bit sample to millivolts at the ADC input.
    ///
    /// This is a linear placeholder and not a calibrated concentration curve. Values
    /// above the ADC range are clamped so the result is always between 0 and 3300.
    fn convert(raw: u16) -> GasConcentration {
        let voltage = raw.min(ADC_MAX) as f64 / ADC_MAX as f64 * ADC_REFERENCE_VOLTS;
        GasConcentration::from((voltage * 1000.0).round() as u16)
    }

    /// Sample the ADC and convert the reading, returning an error only if the ADC
    /// itself couldn't be read.
    pub fn read(&mut self) -> Result<GasConcentration, SensorError> {
        let raw = self.channel.read_raw()?;
        let gas = Self::convert(raw);

        tracing::debug!(message = "parsed gas concentration", raw = raw, gas = %gas);
        Ok(gas)
    }
}

impl Debug for GasSensor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GasSensor")
            .field("channel", &self.channel.channel())
            .finish()
    }
}
