//! Fail-closed job reconstruction registry.
//!
//! Grounded on `domain.GetJob(jobType string)` in
//! `original_source/scheduler/domain/task.go`, which switches on a type tag
//! and returns an error for anything unrecognized rather than a nil job.

use super::{Job, ShellJob, SHELL_JOB_TYPE};
use crate::error::{Result, SchedulerError};
use std::collections::HashMap;
use std::sync::Arc;

type Reconstructor = fn(&str) -> Result<Arc<dyn Job>>;

/// Maps job type tags to the function that rebuilds a [`Job`] from its
/// serialized payload.
pub struct JobRegistry {
    reconstructors: HashMap<&'static str, Reconstructor>,
}

impl JobRegistry {
    /// The registry with every built-in job variant registered.
    pub fn new() -> Self {
        let mut reconstructors: HashMap<&'static str, Reconstructor> = HashMap::new();
        reconstructors.insert(SHELL_JOB_TYPE, ShellJob::from_payload as Reconstructor);
        Self { reconstructors }
    }

    pub fn reconstruct(&self, job_type: &str, payload: &str) -> Result<Arc<dyn Job>> {
        let Some(reconstructor) = self.reconstructors.get(job_type) else {
            return Err(SchedulerError::UnknownJobType(job_type.to_string()).into());
        };
        reconstructor(payload)
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_job_type_fails_closed() {
        let registry = JobRegistry::new();
        let result = registry.reconstruct("carrier-pigeon", "{}");
        assert!(matches!(
            result,
            Err(crate::error::Error::Scheduler(SchedulerError::UnknownJobType(ref t))) if t == "carrier-pigeon"
        ));
    }

    #[test]
    fn shell_job_round_trips_through_registry() {
        let registry = JobRegistry::new();
        let job = ShellJob::new(
            true,
            std::time::Duration::from_secs(5),
            "/tmp/taskwheel-test".into(),
            "owner-a".to_string(),
            "echo".to_string(),
            vec!["hi".to_string()],
        );
        let payload = job.serialize().unwrap();
        let rebuilt = registry.reconstruct(SHELL_JOB_TYPE, &payload).unwrap();
        assert_eq!(rebuilt.job_type(), SHELL_JOB_TYPE);
    }
}
