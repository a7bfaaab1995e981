//! Engine configuration
//!
//! Layered the usual way: built-in defaults, then an optional file, then
//! `TASKFLOW_*` environment variables (`__` separates nested keys, e.g.
//! `TASKFLOW_SCHEDULER__MAX_CONCURRENT_TASKS=4`).

use serde::{Deserialize, Serialize};

/// Main engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Step executor limits
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Decision gate policy thresholds
    #[serde(default)]
    pub gate: GateConfig,

    /// Cross-task scheduling
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Step executor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Executor invocations allowed for one task in one run before the
    /// task is failed
    #[serde(default = "default_max_step_executions")]
    pub max_step_executions: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_step_executions: default_max_step_executions(),
        }
    }
}

/// Decision gate configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Assessments below this confidence are ambiguous
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Minimum trimmed length of knowledge content that counts as sufficient
    #[serde(default = "default_min_knowledge_chars")]
    pub min_knowledge_chars: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            min_knowledge_chars: default_min_knowledge_chars(),
        }
    }
}

/// How task-level `depends_on` is honoured
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyPolicy {
    /// A task starts only once every prerequisite task is `Done`
    #[default]
    WaitForDone,
    /// Task-level dependencies are recorded but not enforced
    Ignore,
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Distinct tasks driven in parallel by `run_pending`
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    #[serde(default)]
    pub dependency_policy: DependencyPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            dependency_policy: DependencyPolicy::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level, overridden by `RUST_LOG` when set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_max_step_executions() -> u32 {
    256
}

fn default_confidence_threshold() -> f32 {
    0.6
}

fn default_min_knowledge_chars() -> usize {
    1
}

fn default_max_concurrent_tasks() -> usize {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

impl EngineConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&EngineConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TASKFLOW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Small limits for tests and demos
    pub fn development() -> Self {
        Self {
            executor: ExecutorConfig {
                max_step_executions: 32,
            },
            scheduler: SchedulerConfig {
                max_concurrent_tasks: 2,
                ..SchedulerConfig::default()
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                json: false,
            },
            ..Default::default()
        }
    }
}
