use std::sync::Arc;

use tgconsole_process::JobKind;

use crate::registry::ProcessRegistry;
use crate::scan::{ProcessScanner, SysinfoScanner};
use crate::support::JobLimits;
use crate::worker::WorkerProgram;

/// Supervises one worker kind: at most one job per owner.
///
/// Cheap to clone; clones share the registry.
#[derive(Clone, Debug)]
pub struct JobManager {
    pub(crate) inner: Arc<Inner>,
}

#[derive(Debug)]
pub(crate) struct Inner {
    pub(crate) program: WorkerProgram,
    pub(crate) limits: JobLimits,
    pub(crate) registry: ProcessRegistry,
    pub(crate) scanner: Arc<dyn ProcessScanner>,
}

impl JobManager {
    pub fn new(program: WorkerProgram, limits: JobLimits) -> Self {
        Self::with_scanner(program, limits, Arc::new(SysinfoScanner))
    }

    pub fn with_scanner(
        program: WorkerProgram,
        limits: JobLimits,
        scanner: Arc<dyn ProcessScanner>,
    ) -> Self {
        let registry = ProcessRegistry::new(program.kind);
        Self {
            inner: Arc::new(Inner {
                program,
                limits,
                registry,
                scanner,
            }),
        }
    }

    pub fn kind(&self) -> JobKind {
        self.inner.program.kind
    }

    pub fn program(&self) -> &WorkerProgram {
        &self.inner.program
    }

    pub fn limits(&self) -> JobLimits {
        self.inner.limits
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.inner.registry
    }
}
