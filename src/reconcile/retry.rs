/// Retry controller for interpolation failures.
///
/// When a spline fit hits missing values, the reconciliation is retried
/// with a doubled request buffer so the series gets more context; after
/// `MAX_INTERPOLATION_ATTEMPTS` the offending series is excluded from
/// interpolation and the attempt counter resets. State transitions are
/// pure functions on an explicit value, so a failed attempt can never
/// leak half-updated arguments into the next one.

use chrono::Duration;
use log::debug;

use crate::model::TimeSeries;

pub const MAX_INTERPOLATION_ATTEMPTS: u32 = 5;

/// Buffer applied on the first retry when none was configured.
pub fn default_retry_buffer() -> Duration {
    Duration::hours(24)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryState {
    /// Attempts made for the current exclusion set.
    pub attempt: u32,
    pub buffer_time: Option<Duration>,
    /// Series whose interpolation threshold is forced off.
    pub excluded_series: Vec<TimeSeries>,
}

impl RetryState {
    pub fn new(buffer_time: Option<Duration>) -> RetryState {
        RetryState {
            attempt: 0,
            buffer_time,
            excluded_series: Vec::new(),
        }
    }

    /// Transition after an interpolation failure on `failed`: double the
    /// buffer; once the attempt budget is spent, exclude the series and
    /// start a fresh budget for the remaining ones.
    pub fn after_interpolation_failure(mut self, failed: TimeSeries) -> RetryState {
        self.attempt += 1;

        let buffer = self.buffer_time.unwrap_or_else(default_retry_buffer);
        debug!(
            "interpolation retry {} for {failed}: buffer {} -> {}",
            self.attempt,
            buffer,
            buffer * 2
        );
        self.buffer_time = Some(buffer * 2);

        if self.attempt >= MAX_INTERPOLATION_ATTEMPTS {
            if !self.excluded_series.contains(&failed) {
                self.excluded_series.push(failed);
            }
            self.attempt = 0;
        }

        self
    }

    /// Interpolation threshold for one series under this state: `None`
    /// (fill only) when the series has been excluded.
    pub fn threshold_for(
        &self,
        series: TimeSeries,
        configured: Option<Duration>,
    ) -> Option<Duration> {
        if self.excluded_series.contains(&series) {
            None
        } else {
            configured
        }
    }
}
