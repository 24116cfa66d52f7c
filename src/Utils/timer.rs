use log::info;
use std::time::{Duration, Instant};

/// Tic/tac phase timer of one solve: provider evaluations, buffer assembly
/// and subproblem solves are accumulated separately.
#[derive(Debug, Clone)]
pub struct SolveTimer {
    start: Instant,
    fun_time: Instant,
    pub fun: Duration,
    assemble_time: Instant,
    pub assemble: Duration,
    subproblem_time: Instant,
    pub subproblem: Duration,
}

impl SolveTimer {
    pub fn new() -> SolveTimer {
        SolveTimer {
            start: Instant::now(),
            fun_time: Instant::now(),
            fun: Duration::from_secs(0),
            assemble_time: Instant::now(),
            assemble: Duration::from_secs(0),
            subproblem_time: Instant::now(),
            subproblem: Duration::from_secs(0),
        }
    }

    pub fn start(&mut self) {
        self.start = Instant::now();
        self.fun = Duration::from_secs(0);
        self.assemble = Duration::from_secs(0);
        self.subproblem = Duration::from_secs(0);
    }

    pub fn fun_tic(&mut self) {
        self.fun_time = Instant::now();
    }

    pub fn fun_tac(&mut self) {
        self.fun += self.fun_time.elapsed();
    }

    pub fn assemble_tic(&mut self) {
        self.assemble_time = Instant::now();
    }

    pub fn assemble_tac(&mut self) {
        self.assemble += self.assemble_time.elapsed();
    }

    pub fn subproblem_tic(&mut self) {
        self.subproblem_time = Instant::now();
    }

    pub fn subproblem_tac(&mut self) {
        self.subproblem += self.subproblem_time.elapsed();
    }

    /// Wall-clock time since start().
    pub fn total(&self) -> Duration {
        self.start.elapsed()
    }

    // unit-aware rendering shared by the log line and the statistics table
    fn render(d: Duration) -> String {
        let secs = d.as_secs_f64();
        if secs < 1.0 {
            format!("{} ms", d.as_millis())
        } else if secs < 60.0 {
            format!("{:.2} s", secs)
        } else if secs < 3600.0 {
            format!("{:.1} min", secs / 60.0)
        } else {
            format!("{:.1} h", secs / 3600.0)
        }
    }

    /// One-line phase summary for verbose solves.
    pub fn log_phases(&self) {
        info!(
            "time: total {}, provider {}, assembly {}, subproblem {}",
            Self::render(self.total()),
            Self::render(self.fun),
            Self::render(self.assemble),
            Self::render(self.subproblem)
        );
    }

    /// Phase rows for the statistics table.
    pub fn phases(&self) -> Vec<(String, String)> {
        vec![
            ("total time".to_string(), Self::render(self.total())),
            ("provider time".to_string(), Self::render(self.fun)),
            ("assembly time".to_string(), Self::render(self.assemble)),
            ("subproblem time".to_string(), Self::render(self.subproblem)),
        ]
    }
}
