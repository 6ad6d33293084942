use easy_ext::ext;
use metrics::{Histogram, Label};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

/// Label that is reserved for the outcome of the future measured with
/// [`FutureExt::record_duration`]
const RESULT_LABEL: &str = "result";

#[ext(FutureExt)]
pub impl<F: Future + Sized> F {
    /// Records the time it took the future to complete into the histogram
    /// created by `make_histogram`. The labels get an additional `result`
    /// label with `ok` or `err` value.
    fn record_duration<Fn, L>(self, make_histogram: Fn, labels: L) -> RecordDuration<Self, Fn, L> {
        RecordDuration {
            future: self,
            record: Some((make_histogram, labels)),
            start: Instant::now(),
        }
    }
}

pin_project_lite::pin_project! {
    pub struct RecordDuration<F, Fn, L> {
        #[pin]
        future: F,
        record: Option<(Fn, L)>,
        start: Instant,
    }
}

impl<F, T, E, Fn, L> Future for RecordDuration<F, Fn, L>
where
    F: Future<Output = Result<T, E>>,
    Fn: FnOnce(Vec<Label>) -> Histogram,
    L: metrics::IntoLabels,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let output = std::task::ready!(this.future.poll(cx));

        let Some((make_histogram, labels)) = this.record.take() else {
            return Poll::Ready(output);
        };

        let mut labels = labels.into_labels();

        if let Some(label) = labels.iter().find(|label| label.key() == RESULT_LABEL) {
            tracing::error!(
                ?label,
                "BUG: label `{RESULT_LABEL}` is reserved for the result of the future"
            );
            debug_assert!(false, "label `{RESULT_LABEL}` is reserved");
            return Poll::Ready(output);
        }

        let result = if output.is_ok() { "ok" } else { "err" };
        labels.push(Label::from_static_parts(RESULT_LABEL, result));

        make_histogram(labels).record(this.start.elapsed());

        Poll::Ready(output)
    }
}

#[cfg(test)]
mod tests {
    use super::FutureExt as _;

    crate::labels! {
        TestLabels { op }
    }

    crate::histograms! {
        /// Test histogram
        test_duration_seconds = [0.1, 1.0];
    }

    #[tokio::test]
    async fn record_duration_passes_output_through() {
        let output = async { Ok::<_, ()>(42) }
            .record_duration(test_duration_seconds, TestLabels { op: "answer" })
            .await;

        assert_eq!(output, Ok(42));

        let buckets: Vec<_> = crate::default_histogram_buckets()
            .filter(|(metric, _)| *metric == "metrics_bat_test_duration_seconds")
            .collect();

        assert_eq!(buckets, [("metrics_bat_test_duration_seconds", &[0.1, 1.0][..])]);
    }
}
