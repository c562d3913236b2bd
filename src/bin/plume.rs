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

use clap::{crate_version, Parser};
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use plume::agent::{shutdown_channel, Agent, AgentConfig, DEFAULT_PUBLISH_INTERVAL};
use plume::clock::{Clock, SystemClock};
use plume::http::{http_route, RequestContext};
use plume::metrics::{AgentMetrics, MetricsExposition};
use plume::network::{wait_for_connection, DeviceIdentity, Network, SysfsNetwork};
use plume::sensor::{open_adc, open_echo_pin, open_trigger_pin, DistanceSensor, GasSensor};
use plume::store::RealtimeDatabase;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{io, process};
use tokio::runtime::Handle;
use tokio::signal::unix::{self, SignalKind};
use tokio::task;
use tracing::{span, Instrument, Level};

const DEFAULT_TRIGGER_PIN: u8 = 23;
const DEFAULT_ECHO_PIN: u8 = 24;
const DEFAULT_ADC_CHANNEL: u8 = 0;
const DEFAULT_SPI_SLAVE: u8 = 0;
const DEFAULT_INTERFACE: &str = "wlan0";
const DEFAULT_CYCLE_SECS: u64 = 6;
const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 9782);
const NETWORK_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Publish gas concentration and distance readings to a Firebase Realtime Database
///
/// Read an MQ135 style gas sensor (via an MCP3208 ADC on SPI0) and an HC-SR04 style
/// ultrasonic distance sensor connected to a local machine, usually a Raspberry PI,
/// and write the readings to a Firebase Realtime Database keyed by the MAC address of
/// this machine and the time of the reading. Metrics about reads and writes are exposed
/// for Prometheus.
///
/// GPIO pin numbers are based on the Broadcom SOC channel, not the physical pin number.
#[derive(Debug, Parser)]
#[clap(name = "plume", version = crate_version!())]
struct PlumeApplication {
    /// BCM GPIO pin number the ultrasonic sensor trigger line is connected to
    #[clap(long, default_value_t = DEFAULT_TRIGGER_PIN)]
    trigger_pin: u8,

    /// BCM GPIO pin number the ultrasonic sensor echo line is connected to
    #[clap(long, default_value_t = DEFAULT_ECHO_PIN)]
    echo_pin: u8,

    /// MCP3208 channel (0-7) the gas sensor analog output is connected to
    #[clap(long, default_value_t = DEFAULT_ADC_CHANNEL)]
    adc_channel: u8,

    /// SPI0 chip select line (0-2) the MCP3208 is connected to
    #[clap(long, default_value_t = DEFAULT_SPI_SLAVE)]
    spi_slave: u8,

    /// Network interface to wait for and use the MAC address of as the device ID
    #[clap(long, default_value = DEFAULT_INTERFACE)]
    interface: String,

    /// Device ID to write readings under instead of the MAC address of the interface
    #[clap(long)]
    device_id: Option<String>,

    /// URL of the Firebase Realtime Database, e.g. https://example-default-rtdb.firebaseio.com
    #[clap(long)]
    database_url: String,

    /// ID token or database secret to authenticate writes with
    #[clap(long)]
    auth_token: Option<String>,

    /// Read the sensors at this interval, in seconds
    #[clap(long, default_value_t = DEFAULT_CYCLE_SECS)]
    cycle_secs: u64,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Address to bind to for exposing Prometheus metrics
    #[clap(long, default_value_t = DEFAULT_BIND_ADDR.into())]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let opts = PlumeApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let startup = Instant::now();
    let trigger = open_trigger_pin(opts.trigger_pin).unwrap_or_else(|e| {
        tracing::error!(message = "failed to initialize trigger pin", bcm_pin = opts.trigger_pin, error = %e);
        process::exit(1)
    });

    let echo = open_echo_pin(opts.echo_pin).unwrap_or_else(|e| {
        tracing::error!(message = "failed to initialize echo pin", bcm_pin = opts.echo_pin, error = %e);
        process::exit(1)
    });

    let adc = open_adc(opts.spi_slave, opts.adc_channel).unwrap_or_else(|e| {
        tracing::error!(
            message = "failed to initialize ADC",
            spi_slave = opts.spi_slave,
            adc_channel = opts.adc_channel,
            error = %e,
        );
        process::exit(1)
    });

    let network: Arc<dyn Network + Send + Sync> = Arc::new(SysfsNetwork::new(&opts.interface));
    let net = network.clone();
    let hardware_address = task::spawn_blocking(move || {
        wait_for_connection(net.as_ref(), NETWORK_POLL_INTERVAL);
        net.hardware_address()
    })
    .await?;

    let identity = match (opts.device_id.clone(), hardware_address) {
        (Some(id), _) => DeviceIdentity::from(id),
        (None, Ok(address)) => address,
        (None, Err(e)) => {
            tracing::error!(message = "failed to determine device ID", interface = %opts.interface, error = %e);
            process::exit(1)
        }
    };

    let store = RealtimeDatabase::new(&opts.database_url, opts.auth_token.clone(), network, Handle::current())
        .unwrap_or_else(|e| {
            tracing::error!(message = "failed to initialize database client", url = %opts.database_url, error = %e);
            process::exit(1)
        });

    let reg = prometheus::default_registry().clone();
    let metrics = AgentMetrics::new();
    reg.register(Box::new(metrics.clone())).unwrap_or_else(|e| {
        tracing::error!(message = "failed to register agent metric collector", error = %e);
        process::exit(1)
    });

    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(SystemClock::new());
    let config = AgentConfig {
        publish_interval: DEFAULT_PUBLISH_INTERVAL,
        cycle_delay: Duration::from_secs(opts.cycle_secs),
    };

    let mut agent = Agent::new(
        identity.clone(),
        GasSensor::from_channel(adc),
        DistanceSensor::from_pins(trigger, echo, clock.clone()),
        store,
        clock,
        config,
    )
    .with_metrics(metrics);

    // The sample loop blocks on the sensors and on writes to the database so
    // it gets a thread of its own rather than running on the async runtime.
    let (shutdown_handle, shutdown) = shutdown_channel();
    let sampler = task::spawn_blocking(move || agent.run(&shutdown));

    let context = Arc::new(RequestContext::new(MetricsExposition::new(reg)));
    let service = make_service_fn(move |_| {
        let context = context.clone();

        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                http_route(req, context.clone()).instrument(span!(Level::DEBUG, "plume_request"))
            }))
        }
    });

    let server = Server::try_bind(&opts.bind).unwrap_or_else(|e| {
        tracing::error!(message = "server failed to start", address = %opts.bind, error = %e);
        process::exit(1)
    });

    tracing::info!(
        message = "server started",
        address = %opts.bind,
        identity = %identity,
        trigger_pin = opts.trigger_pin,
        echo_pin = opts.echo_pin,
        adc_channel = opts.adc_channel,
    );

    server
        .serve(service)
        .with_graceful_shutdown(async {
            // Wait for either SIGTERM or SIGINT to shutdown
            tokio::select! {
                _ = sigterm() => {}
                _ = sigint() => {}
            }
        })
        .await?;

    shutdown_handle.shutdown();
    let cycles = sampler.await?;

    tracing::info!(
        message = "server shutdown",
        runtime_secs = %startup.elapsed().as_secs(),
        cycles = cycles,
    );

    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}
