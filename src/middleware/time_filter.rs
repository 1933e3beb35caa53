use async_trait::async_trait;
use chrono::{Local, Timelike};
use std::{fmt, sync::Arc};
use tracing::debug;

use super::{Middleware, Next};
use crate::{
    delivery::{
        entities::{Device, Message},
        error::PlingError,
        registry::FromOptions,
    },
    options::Options,
};

type HourClock = Arc<dyn Fn() -> u32 + Send + Sync>;

/// Only lets deliveries through while the local hour is inside `[from, to)`.
///
/// A window with `from > to` wraps around midnight.
#[derive(Clone)]
pub struct TimeFilter {
    from: u32,
    to: u32,
    clock: HourClock,
}

impl TimeFilter {
    pub fn new(from: u32, to: u32) -> Result<Self, PlingError> {
        if from > 23 || to > 24 {
            return Err(PlingError::Argument(format!(
                "Invalid delivery window {}..{}",
                from, to
            )));
        }

        Ok(Self {
            from,
            to,
            clock: Arc::new(|| Local::now().hour()),
        })
    }

    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> u32 + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn allows(&self, hour: u32) -> bool {
        if self.from <= self.to {
            (self.from..self.to).contains(&hour)
        } else {
            hour >= self.from || hour < self.to
        }
    }
}

impl FromOptions for TimeFilter {
    fn from_options(options: Options) -> Result<Self, PlingError> {
        let hour = |key: &str, default: u64| -> Result<u32, PlingError> {
            u32::try_from(options.u64_or(key, default)?)
                .map_err(|_| PlingError::Argument(format!("Option :{} is out of range", key)))
        };
        Self::new(hour("from", 8)?, hour("to", 22)?)
    }
}

impl fmt::Debug for TimeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeFilter")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

#[async_trait]
impl Middleware for TimeFilter {
    async fn process(
        &self,
        message: Message,
        device: Device,
        next: Next<'_>,
    ) -> Result<(), PlingError> {
        let hour = (self.clock)();
        if self.allows(hour) {
            return next.run(message, device).await;
        }

        debug!(
            hour,
            from = self.from,
            to = self.to,
            "outside delivery window, dropping notification"
        );
        Ok(())
    }
}
