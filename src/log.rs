//! Persisted convergence-history and run-summary writers. Disabled unless
//! a driver's config asks for them (`lognres`/`logfile`); writing here is
//! the only hot-path-adjacent I/O in the crate, so it stays out of the
//! inner Krylov loop and is only ever called once per outer step.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use problemo::common::IntoCommonProblem;

use crate::E;

/// Appends one `step, rel_residual` row per call to a `.conv` file. Opened
/// once per solve and flushed on drop via `BufWriter`'s normal teardown.
pub struct ConvergenceLog {
    writer: BufWriter<File>,
}

impl ConvergenceLog {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, problemo::Problem> {
        let file = File::create(path).into_common_problem()?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn record(&mut self, step: usize, rel_residual: E) -> Result<(), problemo::Problem> {
        writeln!(self.writer, "{step},{rel_residual:.10e}").into_common_problem()
    }
}

/// One solve's run-summary fields: cell count, worker-thread count, the
/// inner (Krylov) solve's aggregated wall/CPU time over the whole solve, its
/// mean iteration count per outer step, and the outer step count itself.
///
/// `lin_cputime` is approximated as `lin_walltime * threads`: the crate has
/// no per-thread CPU-time accounting (that would need a new dependency
/// outside the stack this core otherwise draws from), and `rayon`'s
/// work-stealing pool makes wall-time-times-worker-count the closest
/// approximation available from what's already on hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    pub nelem: usize,
    pub threads: usize,
    pub lin_walltime: E,
    pub lin_cputime: E,
    pub avg_lin_iters: E,
    pub outer_iters: usize,
}

/// Appends one whitespace-separated line to `{logfile}`:
/// `nelem threads lin_walltime lin_cputime avg_lin_iters outer_iters`.
/// Opened in append mode so successive `solve` calls against the same path
/// accumulate rows rather than truncating each other's.
pub fn write_run_summary(path: impl AsRef<Path>, summary: &RunSummary) -> Result<(), problemo::Problem> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .into_common_problem()?;
    writeln!(
        file,
        "{} {} {:.6e} {:.6e} {:.6} {}",
        summary.nelem, summary.threads, summary.lin_walltime, summary.lin_cputime, summary.avg_lin_iters, summary.outer_iters
    )
    .into_common_problem()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convergence_log_writes_rows() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("pseudostep_test_{}.conv", std::process::id()));
        {
            let mut log = ConvergenceLog::create(&path).unwrap();
            log.record(0, 1.0).unwrap();
            log.record(1, 0.5).unwrap();
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn run_summary_appends_one_line_per_call() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("pseudostep_test_{}.summary", std::process::id()));
        std::fs::remove_file(&path).ok();

        let summary = RunSummary {
            nelem: 20,
            threads: 4,
            lin_walltime: 0.01,
            lin_cputime: 0.04,
            avg_lin_iters: 3.5,
            outer_iters: 42,
        };
        write_run_summary(&path, &summary).unwrap();
        write_run_summary(&path, &summary).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let fields: Vec<&str> = lines[0].split_whitespace().collect();
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[0], "20");
        assert_eq!(fields[1], "4");
        assert_eq!(fields[5], "42");
        std::fs::remove_file(&path).ok();
    }
}
