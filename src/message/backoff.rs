use std::{iter::Take, time::Duration};

/// Provides a mechanism for managing attempting to complete an operation
/// and retrying the operation, with a backoff, if it fails.
///
/// This iterator provides an infinite stream of back off durations, where
/// the duration increases an exponential factor up to some maximum delay.
/// Upon reaching the maximum delay, that value will be returned from then
/// on. Bound it with [Iterator::take] to limit the number of attempts.
pub struct ExponentialBackoff {
    curr: Duration,
    max: Duration,
    factor: u32,
}

impl ExponentialBackoff {
    pub fn new(start: Duration, max: Duration, factor: u32) -> ExponentialBackoff {
        ExponentialBackoff {
            curr: start,
            max,
            factor,
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let this = self.curr;
        self.curr = (self.curr * self.factor).min(self.max);
        Some(this)
    }
}

/// The Retry trait provides a protocol for retrying a fallible function
/// until it succeeds or the iterator of delays runs out. The delays are the
/// time to wait between attempts, so a sequence of `n` delays permits `n`
/// attempts.
pub trait Retry: Iterator<Item = Duration> + Sized {
    /// Retry the given function until it returns [Ok]. After every failed
    /// attempt but the last, `sleep` is called with the error and the delay
    /// before the next attempt; it is expected to log and then sleep. If no
    /// attempt succeeds, the last error is returned. If the iterator is
    /// empty, `f` is never called and `None` is returned.
    fn retry<F, S, T, E>(self, mut f: F, sleep: S) -> Option<Result<T, E>>
    where
        F: FnMut() -> Result<T, E>,
        S: Fn(&E, Duration),
    {
        let mut last_err = None;
        let mut iter = self.peekable();

        while let Some(delay) = iter.next() {
            match f() {
                Ok(v) => return Some(Ok(v)),
                Err(e) => {
                    if iter.peek().is_some() {
                        sleep(&e, delay);
                    }
                    last_err = Some(Err(e));
                }
            }
        }
        last_err
    }
}

impl Retry for ExponentialBackoff {}

impl Retry for Take<ExponentialBackoff> {}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{ExponentialBackoff, Retry};
    use std::cell::Cell;
    use std::time::Duration;

    #[test]
    fn delays_grow_to_the_maximum() {
        let delays: Vec<_> = ExponentialBackoff::new(Duration::from_millis(10), Duration::from_millis(50), 2)
            .take(5)
            .collect();
        let ms: Vec<_> = delays.iter().map(|d| d.as_millis()).collect();
        assert_eq!(ms, vec![10, 20, 40, 50, 50]);
    }

    #[test]
    fn retry_stops_at_the_first_success() {
        let calls = Cell::new(0);
        let slept = Cell::new(0);
        let result = ExponentialBackoff::new(Duration::ZERO, Duration::ZERO, 2).take(5).retry(
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 { Err("not yet") } else { Ok(calls.get()) }
            },
            |_, _| slept.set(slept.get() + 1),
        );
        assert_eq!(result, Some(Ok(3)));
        assert_eq!(slept.get(), 2);
    }

    #[test]
    fn retry_returns_the_last_error_when_attempts_run_out() {
        let result: Option<Result<(), &str>> =
            ExponentialBackoff::new(Duration::ZERO, Duration::ZERO, 2).take(2).retry(|| Err("no"), |_, _| {});
        assert_eq!(result, Some(Err("no")));
    }
}
