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

use std::error::Error;
use std::fmt::{self, Formatter};

use rppal::gpio::{Gpio, InputPin, OutputPin, Pin};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

/// Largest value a 12-bit ADC can report.
pub const ADC_MAX: u16 = 4095;

const ADC_CHANNELS: u8 = 8;
const ADC_CLOCK_HZ: u32 = 1_000_000;
const CM_TO_INCH: f64 = 0.393701;

/// Relative gas concentration derived from the sensor voltage.
///
/// This is a linear proxy (millivolts at the ADC), not a calibrated parts-per-million value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct GasConcentration(u16);

impl From<u16> for GasConcentration {
    fn from(v: u16) -> Self {
        Self(v)
    }
}

impl From<GasConcentration> for i64 {
    fn from(v: GasConcentration) -> Self {
        v.0 as i64
    }
}

impl From<GasConcentration> for f64 {
    fn from(v: GasConcentration) -> Self {
        v.0 as f64
    }
}

impl fmt::Display for GasConcentration {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}ppm", self.0)
    }
}

/// Distance, in centimeters
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct DistanceCm(f64);

impl DistanceCm {
    pub fn inches(&self) -> f64 {
        self.0 * CM_TO_INCH
    }
}

impl From<f64> for DistanceCm {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl From<DistanceCm> for f64 {
    fn from(v: DistanceCm) -> Self {
        v.0
    }
}

impl fmt::Display for DistanceCm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}cm", self.0)
    }
}

/// Result of a single ranging attempt.
///
/// `NoEcho` is a measurement failure (nothing reflected the pulse within the timeout),
/// not a distance of zero.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Distance {
    Measured(DistanceCm),
    NoEcho,
}

impl Distance {
    /// Value written in place of a distance when no echo was received.
    pub const NO_ECHO_SENTINEL: f64 = -1.0;

    pub fn centimeters(&self) -> Option<DistanceCm> {
        match self {
            Distance::Measured(cm) => Some(*cm),
            Distance::NoEcho => None,
        }
    }

    /// Numeric value to store for this reading, the sentinel for `NoEcho`.
    pub fn as_published(&self) -> f64 {
        match self {
            Distance::Measured(cm) => (*cm).into(),
            Distance::NoEcho => Self::NO_ECHO_SENTINEL,
        }
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Distance::Measured(cm) => cm.fmt(f),
            Distance::NoEcho => f.write_str("no echo"),
        }
    }
}

#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum SensorErrorKind {
    Initialization,
    Transfer,
}

impl SensorErrorKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            SensorErrorKind::Initialization => "initialization",
            SensorErrorKind::Transfer => "transfer",
        }
    }
}

/// Error initializing or reading sensor hardware
#[derive(Debug)]
pub enum SensorError {
    KindMsg(SensorErrorKind, &'static str),
    KindMsgCause(SensorErrorKind, &'static str, Box<dyn Error + Send + Sync>),
}

impl SensorError {
    pub fn kind(&self) -> SensorErrorKind {
        match self {
            SensorError::KindMsg(kind, _) => *kind,
            SensorError::KindMsgCause(kind, _, _) => *kind,
        }
    }
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::KindMsg(_, msg) => msg.fmt(f),
            SensorError::KindMsgCause(_, msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for SensorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SensorError::KindMsgCause(_, _, ref e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

fn gpio_pin(bcm_gpio_pin: u8) -> Result<Pin, SensorError> {
    let controller = Gpio::new().map_err(|e| {
        SensorError::KindMsgCause(
            SensorErrorKind::Initialization,
            "unable to create GPIO controller",
            Box::new(e),
        )
    })?;

    controller.get(bcm_gpio_pin).map_err(|e| {
        SensorError::KindMsgCause(
            SensorErrorKind::Initialization,
            "unable to acquire pin from controller",
            Box::new(e),
        )
    })
}

/// Acquire the BCM GPIO pin connected to the ranging sensor trigger line as an output, driven low.
pub fn open_trigger_pin(bcm_gpio_pin: u8) -> Result<OutputPin, SensorError> {
    let mut pin = gpio_pin(bcm_gpio_pin)?.into_output();
    pin.set_low();
    Ok(pin)
}

/// Acquire the BCM GPIO pin connected to the ranging sensor echo line as an input.
pub fn open_echo_pin(bcm_gpio_pin: u8) -> Result<InputPin, SensorError> {
    Ok(gpio_pin(bcm_gpio_pin)?.into_input())
}

/// Open an MCP3208 on SPI0 using the given chip select line, reading a single-ended channel.
pub fn open_adc(slave: u8, channel: u8) -> Result<Mcp3208, SensorError> {
    if channel >= ADC_CHANNELS {
        return Err(SensorError::KindMsg(
            SensorErrorKind::Initialization,
            "ADC channel must be between 0 and 7",
        ));
    }

    let slave_select = match slave {
        0 => SlaveSelect::Ss0,
        1 => SlaveSelect::Ss1,
        2 => SlaveSelect::Ss2,
        _ => {
            return Err(SensorError::KindMsg(
                SensorErrorKind::Initialization,
                "SPI slave select must be between 0 and 2",
            ))
        }
    };

    let spi = Spi::new(Bus::Spi0, slave_select, ADC_CLOCK_HZ, Mode::Mode0).map_err(|e| {
        SensorError::KindMsgCause(SensorErrorKind::Initialization, "unable to open SPI bus", Box::new(e))
    })?;

    Ok(Mcp3208 { spi, channel })
}

/// Source of raw 12-bit analog samples.
pub trait AnalogChannel {
    fn read_raw(&mut self) -> Result<u16, SensorError>;
    fn channel(&self) -> u8;
}

/// Output line used to start a ranging measurement.
pub trait TriggerPin {
    fn pin(&self) -> u8;
    fn set_high(&mut self);
    fn set_low(&mut self);
}

/// Input line the ranging sensor holds high for the duration of the echo.
pub trait EchoPin {
    fn pin(&self) -> u8;
    fn is_high(&self) -> bool;
}

impl TriggerPin for OutputPin {
    fn pin(&self) -> u8 {
        OutputPin::pin(self)
    }

    fn set_high(&mut self) {
        OutputPin::set_high(self);
    }

    fn set_low(&mut self) {
        OutputPin::set_low(self);
    }
}

impl EchoPin for InputPin {
    fn pin(&self) -> u8 {
        InputPin::pin(self)
    }

    fn is_high(&self) -> bool {
        InputPin::is_high(self)
    }
}

/// MCP3208 8-channel, 12-bit ADC connected via SPI.
pub struct Mcp3208 {
    spi: Spi,
    channel: u8,
}

impl Mcp3208 {
    /// Three byte command for a single-ended conversion. The start bit and mode bit
    /// go in the first byte along with the high bit of the channel, the remaining
    /// two channel bits lead the second byte.
    fn command(channel: u8) -> [u8; 3] {
        [0x06 | ((channel & 0x07) >> 2), (channel & 0x03) << 6, 0x00]
    }

    /// The 12-bit result is the low nibble of the second byte followed by the third byte.
    fn decode(rx: &[u8; 3]) -> u16 {
        (((rx[1] & 0x0F) as u16) << 8) | rx[2] as u16
    }
}

impl AnalogChannel for Mcp3208 {
    fn read_raw(&mut self) -> Result<u16, SensorError> {
        let tx = Self::command(self.channel);
        let mut rx = [0u8; 3];

        self.spi.transfer(&mut rx, &tx).map_err(|e| {
            SensorError::KindMsgCause(SensorErrorKind::Transfer, "unable to read from ADC", Box::new(e))
        })?;

        let raw = Self::decode(&rx);
        tracing::trace!(message = "read raw ADC value", channel = self.channel, raw = raw);
        Ok(raw)
    }

    fn channel(&self) -> u8 {
        self.channel
    }
}

impl fmt::Debug for Mcp3208 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mcp3208").field("channel", &self.channel).finish()
    }
}
