use std::fmt;
use std::time::Duration;

use web_time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct StageTiming {
    pub stage: &'static str,
    pub elapsed: Duration,
}

/// Wall-clock time of consecutive reconstruction stages.
///
/// Starting a stage stops the one that is running.
#[derive(Debug, Default)]
pub struct StageTimer {
    running: Option<(&'static str, Instant)>,
    finished: Vec<StageTiming>,
}

impl StageTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, stage: &'static str) {
        self.stop();
        self.running = Some((stage, Instant::now()));
    }

    pub fn stop(&mut self) {
        if let Some((stage, started)) = self.running.take() {
            self.finished.push(StageTiming {
                stage,
                elapsed: started.elapsed(),
            });
        }
    }

    pub fn report(mut self) -> TimingReport {
        self.stop();
        TimingReport {
            stages: self.finished,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimingReport {
    pub stages: Vec<StageTiming>,
}

impl TimingReport {
    pub fn total(&self) -> Duration {
        self.stages.iter().map(|s| s.elapsed).sum()
    }

    pub fn get(&self, stage: &str) -> Option<Duration> {
        self.stages
            .iter()
            .find(|s| s.stage == stage)
            .map(|s| s.elapsed)
    }
}

impl fmt::Display for TimingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for s in &self.stages {
            write!(f, "{}={:.2?} ", s.stage, s.elapsed)?;
        }
        write!(f, "total={:.2?}", self.total())
    }
}
