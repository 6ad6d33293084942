//! Missing batteries for [`metrics`] crate.
//!
//! Declares labels and metrics together with their `HELP` descriptions in a
//! laconic way. The names of the metrics are prefixed with the name of the
//! crate that declares them.
//!
//! ```
//! use metrics_bat::{counters, gauges, histograms, labels};
//!
//! labels! {
//!     DeliveryLabels { queue, result }
//! }
//!
//! counters! {
//!     /// Number of deliveries received from the queue
//!     deliveries_total;
//! }
//!
//! gauges! {
//!     /// Number of deliveries that are being handled right now
//!     deliveries_in_flight;
//! }
//!
//! histograms! {
//!     /// Buckets go after the `=` sign
//!     delivery_duration_seconds = [0.01, 0.1, 1.0];
//! }
//!
//! let labels = DeliveryLabels {
//!     queue: "metrics",
//!     result: "ok",
//! };
//!
//! deliveries_total(labels).increment(1);
//! delivery_duration_seconds(labels).record(0.2);
//! deliveries_in_flight(DeliveryLabels { queue: "metrics", result: "" }).set(1.0);
//! ```
//!
//! The buckets declared via [`histograms!`] in any crate compiled into the
//! executable are collected by [`default_histogram_buckets`].

#[cfg(feature = "exporter-prometheus")]
mod exporter_prometheus;

mod timing;

pub mod prelude {
    #[cfg(feature = "exporter-prometheus")]
    pub use crate::exporter_prometheus::PrometheusBuilderExt as _;
    pub use crate::timing::FutureExt as _;
}

/// Returns histogram metric names with their buckets as declared by all
/// [`histograms!`] invocations compiled into the executable.
pub fn default_histogram_buckets() -> impl Iterator<Item = (&'static str, &'static [f64])> {
    inventory::iter::<imp::Bucket>
        .into_iter()
        .map(|bucket| (bucket.metric, bucket.buckets))
}

/// Defines a struct with a field per label name. Every field is generic, and
/// the struct implements [`metrics::IntoLabels`] when all field values
/// implement [`Into`] [`metrics::SharedString`].
#[macro_export]
macro_rules! labels {
    ($( $vis:vis $Labels:ident { $( $label:ident ),* $(,)? } )*) => {
        $(
            #[derive(Clone, Copy, Debug)]
            #[allow(non_camel_case_types)]
            $vis struct $Labels<$($label = $crate::imp::String,)*> {
                $( $vis $label: $label, )*
            }

            #[allow(non_camel_case_types)]
            impl<$($label,)*> $crate::imp::metrics::IntoLabels for $Labels<$($label,)*>
            where
                $($label: $crate::imp::Into<$crate::imp::metrics::SharedString>,)*
            {
                fn into_labels(self) -> $crate::imp::Vec<$crate::imp::metrics::Label> {
                    vec![$($crate::imp::metrics::Label::new(stringify!($label), self.$label)),*]
                }
            }
        )*
    };
}

/// Defines functions that accept [`metrics::IntoLabels`] and return a [`metrics::Counter`]
#[macro_export]
macro_rules! counters {
    ($($body:tt)*) => {
        $crate::metric_fns!(counter Counter $($body)*);
    };
}

/// Defines functions that accept [`metrics::IntoLabels`] and return a [`metrics::Gauge`]
#[macro_export]
macro_rules! gauges {
    ($($body:tt)*) => {
        $crate::metric_fns!(gauge Gauge $($body)*);
    };
}

/// Defines functions that accept [`metrics::IntoLabels`] and return a [`metrics::Histogram`]
#[macro_export]
macro_rules! histograms {
    ($($body:tt)*) => {
        $crate::metric_fns!(histogram Histogram $($body)*);
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! metric_fns {
    (@describe counter $metric:expr, $help:expr) => {
        $crate::imp::metrics::describe_counter!($metric, $help)
    };
    (@describe gauge $metric:expr, $help:expr) => {
        $crate::imp::metrics::describe_gauge!($metric, $help)
    };
    (@describe histogram $metric:expr, $help:expr) => {
        $crate::imp::metrics::describe_histogram!($metric, $help)
    };
    (@register counter $metric:expr, $labels:expr) => {
        $crate::imp::metrics::register_counter!($metric, $labels)
    };
    (@register gauge $metric:expr, $labels:expr) => {
        $crate::imp::metrics::register_gauge!($metric, $labels)
    };
    (@register histogram $metric:expr, $labels:expr) => {
        $crate::imp::metrics::register_histogram!($metric, $labels)
    };
    (
        $kind:ident $Metric:ident
        $(
            $( #[doc = $help:literal] )*
            $vis:vis $metric:ident $( = $buckets:expr )?;
        )*
    ) => {
        $(
            $( #[doc = $help] )*
            $vis fn $metric(
                labels: impl $crate::imp::metrics::IntoLabels,
            ) -> $crate::imp::metrics::$Metric {
                const METRIC: &str = concat!(env!("CARGO_CRATE_NAME"), "_", stringify!($metric));

                $(
                    $crate::imp::inventory::submit! {
                        $crate::imp::Bucket { metric: METRIC, buckets: &$buckets }
                    }
                )?

                static DESCRIBE: $crate::imp::std::sync::Once = $crate::imp::std::sync::Once::new();
                DESCRIBE.call_once(|| {
                    let help = [$( $help.trim() ),*].join("\n");
                    $crate::metric_fns!(@describe $kind METRIC, help);
                });

                $crate::metric_fns!(@register $kind METRIC, labels)
            }
        )*
    };
}

#[doc(hidden)]
pub mod imp {
    pub use inventory;
    pub use metrics;
    pub use std;
    pub use std::prelude::rust_2021::*;

    pub struct Bucket {
        pub metric: &'static str,
        pub buckets: &'static [f64],
    }

    inventory::collect!(Bucket);
}
