use std::sync::Arc;

use tgconsole_agent::{
    JobKind, JobLimits, JobManager, WorkerProgram,
    worker::{AUTO_CHAT_SCRIPT, SCRAPE_SCRIPT},
};

use crate::config::ControlConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ControlConfig>,
    pub auto_chat: JobManager,
    pub scraper: JobManager,
}

impl AppState {
    pub fn new(config: ControlConfig, auto_chat: JobManager, scraper: JobManager) -> Self {
        Self {
            config: Arc::new(config),
            auto_chat,
            scraper,
        }
    }

    /// Python workers from `scripts_dir`, limits from the environment.
    pub fn from_config(config: ControlConfig) -> Self {
        let program = |kind: JobKind, script: &str| {
            WorkerProgram::python(kind, &config.python, config.scripts_dir.join(script))
                .with_working_dir(&config.root_dir)
        };
        let auto_chat = JobManager::new(
            program(JobKind::AutoChat, AUTO_CHAT_SCRIPT),
            JobLimits::from_env(JobKind::AutoChat),
        );
        let scraper = JobManager::new(
            program(JobKind::Scrape, SCRAPE_SCRIPT),
            JobLimits::from_env(JobKind::Scrape),
        );
        Self::new(config, auto_chat, scraper)
    }
}
