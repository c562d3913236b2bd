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

//! Publish gas concentration and ultrasonic distance readings to a Firebase Realtime Database.
//!
//! ## Features
//!
//! Plume periodically samples an MQ135 style analog gas sensor (through an MCP3208 SPI ADC)
//! and an HC-SR04 style ultrasonic ranging sensor, timestamps the readings, and writes them
//! to a Firebase Realtime Database under a per-device key. It is best run on a Raspberry PI
//! (3 or 4).
//!
//! Each publish writes two independent values:
//!
//! * `/{mac address}/sensorData/{YYYY-MM-DD HH:MM:SS}/ppm` - Relative gas concentration derived
//!   from the ADC voltage (a linear indicator, not a calibrated PPM value).
//! * `/{mac address}/sensorData/{YYYY-MM-DD HH:MM:SS}/distance_cm` - Distance in centimeters, or
//!   `-1` when the ranging sensor did not see an echo.
//!
//! Writes happen at most once a second. By default the sensors are read every six seconds.
//!
//! The following metrics are exported:
//!
//! * `plume_cycles_total` - Total number of sample cycles run.
//! * `plume_gas_ppm` - Last gas concentration value read.
//! * `plume_distance_cm` - Last distance read, `-1` if there was no echo.
//! * `plume_publishes_total` - Total number of times the publish gate was passed.
//! * `plume_skipped_total` - Total cycles that did not publish, by reason.
//! * `plume_errors_total` - Total errors by type while reading sensors or writing values.
//! * `plume_last_publish_timestamp` - UNIX timestamp of the last time the publish gate passed.
//!
//! ## Build
//!
//! `plume` is a Rust program and must be built from source using a [Rust toolchain](https://rustup.rs/)
//! . Since it's meant to be run on a Raspberry PI, you will also likely need to cross-compile it. If you
//! are on Ubuntu GNU/Linux, you'll need the following packages installed for this.
//!
//! ```text
//! apt-get install gcc-arm-linux-gnueabihf musl-tools
//! ```
//!
//! ```text
//! rustup target add armv7-unknown-linux-musleabihf
//! cargo build --release --target armv7-unknown-linux-musleabihf
//! ```
//!
//! ## Install
//!
//! ### Wiring
//!
//! * Ultrasonic `TRIG` to a GPIO pin (`--trigger-pin`, BCM numbering, default 23).
//! * Ultrasonic `ECHO` to a GPIO pin (`--echo-pin`, default 24) through a 5V to 3.3V divider.
//! * Gas sensor analog output to an MCP3208 channel (`--adc-channel`, default 0) on SPI0.
//!
//! ### Run
//!
//! In order to read and write `/dev/gpiomem` and `/dev/spidev0.*`, `plume` must run as a user
//! with access to those devices (or `root`).
//!
//! ```text
//! plume --database-url https://example-default-rtdb.firebaseio.com --auth-token <token>
//! ```
//!
//! Prometheus metrics are exposed on port `9782` at `/metrics`.
//!

pub mod agent;
pub mod clock;
pub mod http;
pub mod metrics;
pub mod network;
pub mod sensor;
pub mod store;
