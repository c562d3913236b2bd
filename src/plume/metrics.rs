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

use crate::agent::SkipReason;
use crate::sensor::{Distance, GasConcentration};
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::{SystemTime, UNIX_EPOCH};

/// Label used for a ranging attempt that didn't see an echo.
pub const NO_ECHO_LABEL: &str = "no_echo";

/// Prometheus Collector implementation updated by each sample cycle. Sensor values
/// are emitted as gauges, cycles, publishes, skips, and errors as counters.
#[derive(Clone)]
pub struct AgentMetrics {
    cycles: IntCounter,
    gas: Gauge,
    distance: Gauge,
    publishes: IntCounter,
    last_publish: Gauge,
    skipped: IntCounterVec,
    errors: IntCounterVec,
}

impl AgentMetrics {
    pub fn new() -> Self {
        let cycles = IntCounter::new("plume_cycles_total", "Number of sample cycles run")
            .expect("unable to declare cycles counter");

        let gas = Gauge::new("plume_gas_ppm", "Relative gas concentration (0-3300)")
            .expect("unable to declare gas gauge");

        let distance = Gauge::new("plume_distance_cm", "Distance in centimeters, -1 if no echo")
            .expect("unable to declare distance gauge");

        let publishes = IntCounter::new("plume_publishes_total", "Number of times values were published")
            .expect("unable to declare publishes counter");

        let last_publish = Gauge::new("plume_last_publish_timestamp", "Timestamp of last publish")
            .expect("unable to declare last publish gauge");

        let skipped = IntCounterVec::new(
            Opts::new("plume_skipped_total", "Number of cycles that did not publish by reason"),
            &["reason"],
        )
        .expect("unable to declare skipped counter");

        let errors = IntCounterVec::new(
            Opts::new("plume_errors_total", "Number of failed reads or writes by type"),
            &["kind"],
        )
        .expect("unable to declare errors counter");

        Self {
            cycles,
            gas,
            distance,
            publishes,
            last_publish,
            skipped,
            errors,
        }
    }

    pub fn sampled(&self, gas: Option<GasConcentration>, distance: Distance) {
        self.cycles.inc();
        if let Some(g) = gas {
            self.gas.set(g.into());
        }

        if distance == Distance::NoEcho {
            self.error(NO_ECHO_LABEL);
        }

        self.distance.set(distance.as_published());
    }

    pub fn published(&self) {
        self.publishes.inc();

        // If we can't get the number of seconds since the epoch, skip the update
        let _ = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| self.last_publish.set(d.as_secs_f64()));
    }

    pub fn skipped(&self, reason: SkipReason) {
        self.skipped.with_label_values(&[reason.as_label()]).inc();
    }

    pub fn error(&self, kind: &str) {
        self.errors.with_label_values(&[kind]).inc();
    }

    #[cfg(test)]
    pub(crate) fn errors(&self, kind: &str) -> u64 {
        self.errors.with_label_values(&[kind]).get()
    }

    #[cfg(test)]
    pub(crate) fn skips(&self, reason: SkipReason) -> u64 {
        self.skipped.with_label_values(&[reason.as_label()]).get()
    }

    #[cfg(test)]
    pub(crate) fn publishes(&self) -> u64 {
        self.publishes.get()
    }
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for AgentMetrics {
    fn desc(&self) -> Vec<&Desc> {
        let mut descs = Vec::new();
        descs.extend(self.cycles.desc());
        descs.extend(self.gas.desc());
        descs.extend(self.distance.desc());
        descs.extend(self.publishes.desc());
        descs.extend(self.last_publish.desc());
        descs.extend(self.skipped.desc());
        descs.extend(self.errors.desc());
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let mut mfs = Vec::new();
        mfs.extend(self.cycles.collect());
        mfs.extend(self.gas.collect());
        mfs.extend(self.distance.collect());
        mfs.extend(self.publishes.collect());
        mfs.extend(self.last_publish.collect());
        mfs.extend(self.skipped.collect());
        mfs.extend(self.errors.collect());
        mfs
    }
}

/// Wrapper that exposes metrics from a Prometheus registry in the text exposition format.
#[derive(Debug)]
pub struct MetricsExposition {
    registry: Registry,
}

impl MetricsExposition {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Collect all metrics from the registry and encode them in the Prometheus text exposition
    /// format, returning an error if metrics couldn't be encoded for some reason.
    pub fn encoded_text(&self) -> prometheus::Result<Vec<u8>> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();

        tracing::debug!(
            message = "encoding metric families to text exposition format",
            num_metrics = metric_families.len(),
        );

        encoder.encode(&metric_families, &mut buffer).map(|_| buffer)
    }
}

#[cfg(test)]
mod test {
    use super::{AgentMetrics, MetricsExposition, NO_ECHO_LABEL};
    use crate::agent::SkipReason;
    use crate::sensor::{Distance, DistanceCm, GasConcentration};
    use prometheus::Registry;

    #[test]
    fn test_sampled_no_echo_counted() {
        let metrics = AgentMetrics::new();
        metrics.sampled(Some(GasConcentration::from(1650)), Distance::NoEcho);
        metrics.sampled(None, Distance::Measured(DistanceCm::from(17.0)));

        assert_eq!(1, metrics.errors(NO_ECHO_LABEL));
        assert_eq!(2, metrics.cycles.get());
        assert_eq!(1650.0, metrics.gas.get());
        assert_eq!(17.0, metrics.distance.get());
    }

    #[test]
    fn test_sampled_no_echo_sets_sentinel() {
        let metrics = AgentMetrics::new();
        metrics.sampled(None, Distance::Measured(DistanceCm::from(17.0)));
        metrics.sampled(None, Distance::NoEcho);

        assert_eq!(Distance::NO_ECHO_SENTINEL, metrics.distance.get());
    }

    #[test]
    fn test_encoded_text() {
        let registry = Registry::new();
        let metrics = AgentMetrics::new();
        registry.register(Box::new(metrics.clone())).unwrap();

        metrics.skipped(SkipReason::RateLimited);
        metrics.published();

        let exposition = MetricsExposition::new(registry);
        let text = String::from_utf8(exposition.encoded_text().unwrap()).unwrap();

        assert!(text.contains("plume_publishes_total 1"));
        assert!(text.contains(r#"plume_skipped_total{reason="rate_limited"} 1"#));
    }
}
