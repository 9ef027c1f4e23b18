//! Composition job state.

use std::path::{Path, PathBuf};

use duet_common::error::{DuetError, DuetResult};

/// Lifecycle of one composition. Terminal states are final.
#[derive(Debug, Clone)]
pub enum JobState {
    Pending,
    Running,
    Completed(PathBuf),
    Failed(DuetError),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
        }
    }
}

/// Two inputs composited onto one canvas, written to one output path.
///
/// The job never touches its inputs beyond reading them.
#[derive(Debug, Clone)]
pub struct CompositionJob {
    inputs: [PathBuf; 2],
    canvas: (u32, u32),
    output: PathBuf,
    state: JobState,
}

impl CompositionJob {
    /// Create a pending job. The canvas must have non-zero sides.
    pub fn new(
        first: impl Into<PathBuf>,
        second: impl Into<PathBuf>,
        canvas_width: u32,
        canvas_height: u32,
        output: impl Into<PathBuf>,
    ) -> DuetResult<Self> {
        if canvas_width == 0 || canvas_height == 0 {
            return Err(DuetError::invalid_state(format!(
                "canvas {canvas_width}x{canvas_height} is empty"
            )));
        }
        let inputs = [first.into(), second.into()];
        let output = output.into();
        if let Some(input) = inputs.iter().find(|input| same_file(input, &output)) {
            return Err(DuetError::invalid_state(format!(
                "output {} would overwrite input {}",
                output.display(),
                input.display()
            )));
        }
        Ok(Self {
            inputs,
            canvas: (canvas_width, canvas_height),
            output,
            state: JobState::Pending,
        })
    }

    pub fn inputs(&self) -> [&Path; 2] {
        [self.inputs[0].as_path(), self.inputs[1].as_path()]
    }

    pub fn canvas(&self) -> (u32, u32) {
        self.canvas
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    /// `Pending → Running`.
    pub fn begin(&mut self) -> DuetResult<()> {
        if !matches!(self.state, JobState::Pending) {
            return Err(DuetError::invalid_state(format!(
                "composition job cannot start while {}",
                self.state.name()
            )));
        }
        self.state = JobState::Running;
        Ok(())
    }

    /// `Running → Completed`.
    pub fn complete(&mut self) -> DuetResult<PathBuf> {
        if !matches!(self.state, JobState::Running) {
            return Err(DuetError::invalid_state(format!(
                "composition job cannot complete while {}",
                self.state.name()
            )));
        }
        self.state = JobState::Completed(self.output.clone());
        Ok(self.output.clone())
    }

    /// Move to `Failed` unless already terminal; returns the error.
    pub fn fail(&mut self, error: DuetError) -> DuetError {
        if !self.state.is_terminal() {
            self.state = JobState::Failed(error.clone());
        }
        error
    }
}

/// Canonical comparison when both paths exist, literal otherwise.
fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> CompositionJob {
        CompositionJob::new("a.mov", "b.mov", 640, 480, "out.mov").unwrap()
    }

    #[test]
    fn runs_once_to_completion() {
        let mut job = job();
        assert!(matches!(job.state(), JobState::Pending));
        job.begin().unwrap();
        assert_eq!(job.complete().unwrap(), PathBuf::from("out.mov"));
        assert!(job.state().is_terminal());
        assert!(matches!(job.begin(), Err(DuetError::InvalidState { .. })));
    }

    #[test]
    fn failure_is_final() {
        let mut job = job();
        job.begin().unwrap();
        job.fail(DuetError::Cancelled);
        job.fail(DuetError::encoding("later"));
        assert!(matches!(job.state(), JobState::Failed(DuetError::Cancelled)));
        assert!(job.complete().is_err());
    }

    #[test]
    fn output_may_not_name_an_input() {
        assert!(matches!(
            CompositionJob::new("a.mov", "b.mov", 64, 64, "b.mov"),
            Err(DuetError::InvalidState { .. })
        ));

        let dir = std::env::temp_dir().join(format!("duet_job_alias_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let input = dir.join("input.mov");
        std::fs::write(&input, b"x").unwrap();
        let dotted = dir.join(".").join("input.mov");
        assert!(CompositionJob::new(&input, "b.mov", 64, 64, &dotted).is_err());
        assert!(CompositionJob::new(&input, "b.mov", 64, 64, dir.join("out.mov")).is_ok());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn empty_canvas_is_rejected() {
        assert!(CompositionJob::new("a", "b", 0, 10, "c").is_err());
    }
}
