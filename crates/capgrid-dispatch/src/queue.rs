//! FIFO job queue loaded from the job file.

use std::collections::VecDeque;
use std::path::Path;

use capgrid_core::Job;
use tracing::{info, warn};

use crate::error::DispatchError;

#[derive(Debug, Clone, Default)]
pub struct JobQueue {
    jobs: VecDeque<Job>,
    skipped: usize,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load one command per line. Blank lines and `#` comments are skipped;
    /// lines that fail to parse are logged and skipped.
    pub fn load(path: &Path) -> Result<Self, DispatchError> {
        let content = std::fs::read_to_string(path).map_err(|source| DispatchError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        let queue = Self::parse(&content);
        info!(
            path = %path.display(),
            jobs = queue.len(),
            skipped = queue.skipped,
            "job queue loaded"
        );
        Ok(queue)
    }

    pub fn parse(content: &str) -> Self {
        let mut queue = Self::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match Job::parse(line) {
                Ok(job) => queue.jobs.push_back(job),
                Err(e) => {
                    warn!(line = lineno + 1, command = line, error = %e, "skipping malformed job");
                    queue.skipped += 1;
                }
            }
        }
        queue
    }

    pub fn has_next(&self) -> bool {
        !self.jobs.is_empty()
    }

    pub fn peek(&self) -> Option<&Job> {
        self.jobs.front()
    }

    /// Remove and return the head job. Jobs never re-enter the queue.
    pub fn dequeue(&mut self) -> Option<Job> {
        self.jobs.pop_front()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Lines rejected while loading.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}
