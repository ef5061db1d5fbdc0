use crate::detection::{EngineConfig, PacketBudget};
use crate::error::{KsError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub rules: RulesConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RulesConfig {
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetectionConfig {
    /// 0 picks a count from the available cores
    #[serde(default)]
    pub worker_threads: usize,
    #[serde(default = "default_packet_queue_size")]
    pub packet_queue_size: usize,
    #[serde(default = "default_alert_queue_size")]
    pub alert_queue_size: usize,
    /// Matches kept per packet before further ones are dropped
    #[serde(default = "default_max_queued_matches")]
    pub max_queued_matches: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            packet_queue_size: default_packet_queue_size(),
            alert_queue_size: default_alert_queue_size(),
            max_queued_matches: default_max_queued_matches(),
        }
    }
}

impl DetectionConfig {
    pub fn effective_workers(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get().saturating_sub(2).max(1)
        } else {
            self.worker_threads
        }
    }
}

/// Per-packet evaluation time limit
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BudgetConfig {
    #[serde(default)]
    pub enabled: bool,
    /// 0 disables the limit even when `enabled` is set
    #[serde(default)]
    pub max_packet_time_us: u64,
}

impl BudgetConfig {
    pub fn packet_budget(&self) -> PacketBudget {
        PacketBudget::new(self.max_packet_time_us, self.enabled)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PerformanceConfig {
    #[serde(default = "default_stats_interval")]
    pub stats_interval: u64,
    #[serde(default)]
    pub enable_profiling: bool,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            stats_interval: default_stats_interval(),
            enable_profiling: false,
        }
    }
}

impl PerformanceConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            enable_profiling: self.enable_profiling,
        }
    }
}

// Default value functions
fn default_packet_queue_size() -> usize {
    10_000
}

fn default_alert_queue_size() -> usize {
    1_000
}

fn default_max_queued_matches() -> usize {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_stats_interval() -> u64 {
    60
}

impl Settings {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            KsError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        let settings: Settings = serde_yaml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        // Validate rule paths exist
        for path in &self.rules.paths {
            if !path.exists() {
                tracing::warn!("Rule file does not exist: {:?}", path);
            }
        }

        // Validate worker threads
        if self.detection.worker_threads > 1000 {
            return Err(KsError::ConfigError(
                "Worker threads cannot exceed 1000".to_string(),
            ));
        }

        // Validate queue sizes
        if self.detection.packet_queue_size == 0 {
            return Err(KsError::ConfigError(
                "Packet queue size must be greater than 0".to_string(),
            ));
        }

        if self.detection.alert_queue_size == 0 {
            return Err(KsError::ConfigError(
                "Alert queue size must be greater than 0".to_string(),
            ));
        }

        if self.detection.max_queued_matches == 0 {
            return Err(KsError::ConfigError(
                "Max queued matches must be greater than 0".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(KsError::ConfigError(format!(
                "Unknown log format '{}'",
                self.logging.format
            )));
        }

        Ok(())
    }

    pub fn default_config() -> Self {
        Settings {
            rules: RulesConfig {
                paths: vec![PathBuf::from("rules/local.yaml")],
            },
            detection: DetectionConfig::default(),
            budget: BudgetConfig {
                enabled: false,
                max_packet_time_us: 500,
            },
            logging: LoggingConfig::default(),
            performance: PerformanceConfig {
                stats_interval: 60,
                enable_profiling: false,
            },
        }
    }
}
