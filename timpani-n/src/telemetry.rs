//! Wire-format telemetry: a fixed line-oriented protocol written straight to
//! stdout for downstream tooling to parse, so the exact line shapes are load
//! bearing. Every line is also mirrored through `tracing` at `info` level so
//! the same run can be followed through structured log aggregation without
//! touching the stdout contract.

use std::io::Write;

use tracing::info;

use crate::task::TaskSnapshot;

/// One schedule-overhead/runtime summary, emitted once at test end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub avg_schedule_overhead_s: f64,
    pub real_runtime_s: f64,
    pub runtime_overshoot_fraction: f64,
}

/// Emits the wire protocol to a writer (normally stdout) and to `tracing`.
pub struct Telemetry<W: Write> {
    out: W,
}

impl<W: Write> Telemetry<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn start(&mut self) {
        self.line("START");
        info!(event = "start", "test started");
    }

    pub fn stop(&mut self) {
        self.line("STOP");
        info!(event = "stop", "test stopped");
    }

    pub fn missed(&mut self, task_id: u32) {
        self.line(&format!("MISSED {task_id}"));
        info!(event = "missed", task = task_id, "deadline missed");
    }

    /// A dispatch trace: the sequence of task ids that ran, in order.
    pub fn trace(&mut self, ids: &[u32]) {
        let csv = ids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        self.line(&format!("TRACE {csv}"));
        info!(event = "trace", count = ids.len(), "dispatch trace emitted");
    }

    pub fn summary(&mut self, s: RunSummary) {
        self.line(&format!(
            "PDATA {},{},{}",
            s.avg_schedule_overhead_s, s.real_runtime_s, s.runtime_overshoot_fraction
        ));
        info!(
            event = "pdata",
            avg_schedule_overhead_s = s.avg_schedule_overhead_s,
            real_runtime_s = s.real_runtime_s,
            runtime_overshoot_fraction = s.runtime_overshoot_fraction,
            "run summary emitted"
        );
    }

    pub fn task_data(&mut self, snap: TaskSnapshot) {
        self.line(&format!(
            "TDATA {},{},{},{},{},{},{},{},{}",
            snap.id,
            snap.deadline_events,
            snap.deadlines_missed,
            snap.total_computation_time_missed_ns,
            snap.total_computation_time_ms,
            snap.total_computation_cycles,
            snap.transition_fraction,
            snap.real_compute_time_ms,
            snap.time_error_fraction,
        ));
        info!(
            event = "tdata",
            task = snap.id,
            deadline_events = snap.deadline_events,
            deadlines_missed = snap.deadlines_missed,
            "task summary emitted"
        );
    }

    fn line(&mut self, s: &str) {
        let _ = writeln!(self.out, "{s}");
        let _ = self.out.flush();
    }
}
