use std::time::Duration;

use tokio::{
    runtime::{Builder, Runtime},
    time::{interval, Interval},
};

use super::EmuError;

/// Paces execution to a fixed instruction rate.
pub struct Clock {
    interval: Interval,
    rt: Runtime,
}

impl Clock {
    /// Creates a clock ticking `rate_hz` times per second.
    ///
    /// # Errors
    ///
    /// This function will return an error if the rate is not a positive, finite number of ticks per second,
    /// or if the Tokio runtime fails to initialize.
    pub fn new(rate_hz: f64) -> Result<Self, EmuError> {
        let period = Duration::try_from_secs_f64(rate_hz.recip())
            .ok()
            .filter(|p| !p.is_zero())
            .ok_or(EmuError::InvalidClockRate(rate_hz))?;
        let rt = Builder::new_current_thread().enable_time().build()?;
        let interval = rt.block_on(async { interval(period) });
        Ok(Self { interval, rt })
    }

    /// Blocks until the next tick.
    pub fn tick(&mut self) {
        self.rt.block_on(self.interval.tick());
    }
}
