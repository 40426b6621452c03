//! Named wall-clock timers for the assembly hot paths.
use log::info;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct Stopwatch {
    started: Option<Instant>,
    elapsed: Duration,
    count: usize,
}

impl Stopwatch {
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Stops the current lap. Does nothing if the stopwatch is not running.
    pub fn pause(&mut self) {
        if let Some(started) = self.started.take() {
            self.elapsed += started.elapsed();
            self.count += 1;
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Number of completed laps.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn average(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.elapsed / self.count as u32
        }
    }
}

/// Stopwatches keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Stopwatches {
    watches: BTreeMap<String, Stopwatch>,
}

impl Stopwatches {
    pub fn start(&mut self, name: &str) {
        self.watches.entry(name.to_string()).or_default().start();
    }

    pub fn pause(&mut self, name: &str) {
        if let Some(watch) = self.watches.get_mut(name) {
            watch.pause();
        }
    }

    /// Runs `f` while timing it under `name`.
    pub fn time<R>(&mut self, name: &str, f: impl FnOnce() -> R) -> R {
        self.start(name);
        let result = f();
        self.pause(name);
        result
    }

    pub fn get(&self, name: &str) -> Option<&Stopwatch> {
        self.watches.get(name)
    }

    pub fn log_summary(&self) {
        for (name, watch) in &self.watches {
            info!(
                "{:<40} total {:>10.4} s, {:>6} laps, average {:>10.6} s",
                name,
                watch.elapsed().as_secs_f64(),
                watch.count(),
                watch.average().as_secs_f64()
            );
        }
    }
}
