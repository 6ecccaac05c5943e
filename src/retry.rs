use crate::Shutdown;
use std::{marker::PhantomData, thread, time::Duration};

#[derive(Copy, Clone, Debug)]
pub struct ExpBackoff {
    max: Duration,
    initial: Duration,
    current: Duration,
    target: &'static str,
}

/// Retries a fallible operation a fixed number of times.
pub struct Retry<E, F = fn(&E) -> bool> {
    max_retries: usize,
    should_retry: F,
    backoff: Option<ExpBackoff>,
    target: &'static str,
    _error: PhantomData<fn(E)>,
}

// === impl ExpBackoff ===

impl ExpBackoff {
    const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

    pub const fn new(initial: Duration) -> Self {
        Self {
            max: Self::DEFAULT_MAX_BACKOFF,
            current: initial,
            initial,
            target: "retry",
        }
    }

    pub const fn with_max(self, max: Duration) -> Self {
        Self { max, ..self }
    }

    pub const fn with_target(self, target: &'static str) -> Self {
        Self { target, ..self }
    }

    /// Returns the current backoff and doubles it for next time, up to the
    /// maximum.
    pub fn next_backoff(&mut self) -> Duration {
        let current = self.current;
        if self.current < self.max {
            self.current = (self.current * 2).min(self.max);
        }
        current
    }

    /// Sleeps for the current backoff, waking early on shutdown.
    ///
    /// Returns `true` if the process should keep running.
    pub fn wait(&mut self, shutdown: &Shutdown) -> bool {
        let backoff = self.next_backoff();
        log::debug!(target: self.target, "backing off for {backoff:?}...");
        shutdown.sleep(backoff)
    }

    pub fn reset(&mut self) {
        if self.current != self.initial {
            log::debug!(target: self.target, "reset backoff to {:?}", self.initial);
        }
        self.current = self.initial;
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

// === impl Retry ===

impl<E> Retry<E> {
    pub const fn new(max_retries: usize) -> Self {
        Self {
            max_retries,
            should_retry: |_: &E| true,
            backoff: None,
            target: "retry",
            _error: PhantomData,
        }
    }
}

impl<E, F> Retry<E, F>
where
    F: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    pub fn with_target(self, target: &'static str) -> Self {
        Self { target, ..self }
    }

    /// Waits between attempts. Without a backoff, retries are immediate.
    pub fn with_backoff(self, backoff: ExpBackoff) -> Self {
        Self {
            backoff: Some(backoff.with_target(self.target)),
            ..self
        }
    }

    pub fn with_predicate<F2>(self, should_retry: F2) -> Retry<E, F2>
    where
        F2: Fn(&E) -> bool,
    {
        Retry {
            max_retries: self.max_retries,
            should_retry,
            backoff: self.backoff,
            target: self.target,
            _error: PhantomData,
        }
    }

    pub fn run<T>(&self, mut op: impl FnMut() -> Result<T, E>) -> Result<T, E> {
        let mut retries = self.max_retries;
        let mut backoff = self.backoff;
        loop {
            match op() {
                Ok(val) => return Ok(val),
                Err(error) if (self.should_retry)(&error) && retries > 0 => {
                    retries -= 1;
                    log::warn!(target: self.target, "retrying: {error} ({retries} retries remaining)");
                    if let Some(backoff) = backoff.as_mut() {
                        thread::sleep(backoff.next_backoff());
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }
}
