// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE file at the
// root of this repository, or online at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Metrics for the compiler, planner and executor.
//!
//! Each subsystem keeps its metrics in a scoped-to-it struct, which gets
//! registered (once) to the process's (or a test's) prometheus registry.
//!
//! ```rust
//! # use dl_ore::metrics::{MetricsRegistry, UIntCounter};
//! # use dl_ore::metric;
//! #[derive(Debug, Clone)]
//! struct Metrics {
//!     pub parses: UIntCounter,
//! }
//!
//! impl Metrics {
//!     pub fn register_into(registry: &MetricsRegistry) -> Metrics {
//!         Metrics {
//!             parses: registry.register(metric!(
//!                 name: "dl_formula_parses",
//!                 help: "total number of formulas parsed",
//!             )),
//!         }
//!     }
//! }
//! ```

use prometheus::core::{
    Atomic, AtomicU64, Collector, GenericCounter, GenericCounterVec, GenericGauge, Opts,
};
use prometheus::proto::MetricFamily;
use prometheus::{HistogramOpts, Registry};

pub use prometheus::Opts as PrometheusOpts;
pub use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge};

/// An unsigned counter.
pub type UIntCounter = GenericCounter<AtomicU64>;
/// A labelled family of unsigned counters.
pub type UIntCounterVec = GenericCounterVec<AtomicU64>;
/// An unsigned gauge.
pub type UIntGauge = GenericGauge<AtomicU64>;

/// Buckets, in seconds, for latency histograms of planning and execution
/// stages.
pub const HISTOGRAM_SECONDS_BUCKETS: [f64; 12] = [
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 30.0,
];

/// Define a metric.
#[macro_export]
macro_rules! metric {
    (
        name: $name:expr,
        help: $help:expr
        $(, const_labels: { $($cl_key:expr => $cl_value:expr ),* })?
        $(, var_labels: [ $($vl_name:expr),* ])?
        $(,)?
    ) => {{
        let const_labels: ::std::collections::HashMap<String, String> = (&[
            $($(
                ($cl_key.to_string(), $cl_value.to_string()),
            )*)?
        ]).into_iter().cloned().collect();
        let var_labels: ::std::vec::Vec<String> = vec![
            $(
                $($vl_name.into(),)*
            )?];
        $crate::metrics::PrometheusOpts::new($name, $help)
            .const_labels(const_labels)
            .variable_labels(var_labels)
    }}
}

/// The metrics registry.
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    inner: Registry,
}

impl MetricsRegistry {
    /// Creates a new metrics registry.
    pub fn new() -> Self {
        MetricsRegistry {
            inner: Registry::new(),
        }
    }

    /// Register a metric defined with the [`metric`] macro.
    ///
    /// Panics if a metric with the same name was already registered.
    pub fn register<M>(&self, opts: prometheus::Opts) -> M
    where
        M: MakeCollector,
    {
        let collector = M::make_collector(opts);
        self.inner
            .register(Box::new(collector.clone()))
            .expect("registering metric");
        collector
    }

    /// Gather all the metrics from the metrics registry for reporting.
    ///
    /// See also [`prometheus::Registry::gather`].
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.inner.gather()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A wrapper for creating prometheus metrics more conveniently.
///
/// Together with the [`metric`] macro, this trait is mainly used by
/// [`MetricsRegistry`] and should not normally be used outside the metric
/// registration flow.
pub trait MakeCollector: Collector + Clone + 'static {
    /// Creates a new collector.
    fn make_collector(opts: Opts) -> Self;
}

impl<T> MakeCollector for GenericCounter<T>
where
    T: Atomic + 'static,
{
    fn make_collector(opts: Opts) -> Self {
        Self::with_opts(opts).expect("defining a counter")
    }
}

impl<T> MakeCollector for GenericCounterVec<T>
where
    T: Atomic + 'static,
{
    fn make_collector(opts: Opts) -> Self {
        let labels: Vec<String> = opts.variable_labels.clone();
        let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
        Self::new(opts, label_refs.as_slice()).expect("defining a counter vec")
    }
}

impl<T> MakeCollector for GenericGauge<T>
where
    T: Atomic + 'static,
{
    fn make_collector(opts: Opts) -> Self {
        Self::with_opts(opts).expect("defining a gauge")
    }
}

impl MakeCollector for HistogramVec {
    fn make_collector(opts: Opts) -> Self {
        let labels = opts.variable_labels.clone();
        let labels = &labels.iter().map(|x| x.as_str()).collect::<Vec<_>>();
        Self::new(
            HistogramOpts {
                common_opts: opts,
                buckets: HISTOGRAM_SECONDS_BUCKETS.to_vec(),
            },
            labels,
        )
        .expect("defining a histogram vec")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric;

    #[test]
    fn register_and_gather() {
        let registry = MetricsRegistry::new();
        let counter: UIntCounter = registry.register(metric!(
            name: "dl_test_counter",
            help: "a test counter",
        ));
        let by_kind: UIntCounterVec = registry.register(metric!(
            name: "dl_test_counter_by_kind",
            help: "a labelled test counter",
            var_labels: ["kind"],
        ));
        counter.inc();
        by_kind.with_label_values(&["a"]).inc_by(2);

        let families = registry.gather();
        let names: Vec<_> = families.iter().map(|f| f.get_name().to_string()).collect();
        assert_eq!(names, vec!["dl_test_counter", "dl_test_counter_by_kind"]);
        assert_eq!(counter.get(), 1);
        assert_eq!(by_kind.with_label_values(&["a"]).get(), 2);

        let open: UIntGauge = registry.register(metric!(
            name: "dl_test_gauge",
            help: "a test gauge",
        ));
        open.set(3);
        open.dec();
        assert_eq!(open.get(), 2);
    }
}
