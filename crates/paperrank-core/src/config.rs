use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PaperrankError, Result};

/// Top-level configuration for paperrank.
///
/// Loaded from `~/.paperrank/config.toml` by default. Each section corresponds
/// to one bounded context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaperrankConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub merge: MergeConfig,
}

impl PaperrankConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PaperrankConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values that would make a run meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.ranking.top_k == 0 {
            return Err(PaperrankError::Config("ranking.top_k must be at least 1".into()));
        }
        if self.ranking.top_k > 99 {
            // Column names carry a two-digit rank.
            return Err(PaperrankError::Config("ranking.top_k must be at most 99".into()));
        }
        if self.ranking.expected_dim == Some(0) {
            return Err(PaperrankError::Config(
                "ranking.expected_dim must be positive when set".into(),
            ));
        }
        if self.pipeline.max_consecutive_failures == 0 {
            return Err(PaperrankError::Config(
                "pipeline.max_consecutive_failures must be at least 1".into(),
            ));
        }
        if self.pipeline.queries.is_empty() {
            return Err(PaperrankError::Config("pipeline.queries must not be empty".into()));
        }
        for (name, stage) in [
            ("collect", &self.pipeline.collect),
            ("extract", &self.pipeline.extract),
            ("rank", &self.pipeline.rank),
        ] {
            if stage.timeout_secs == 0 {
                return Err(PaperrankError::Config(format!(
                    "pipeline.{}.timeout_secs must be positive",
                    name
                )));
            }
            if stage.backend == StageBackend::Command && stage.command.is_empty() {
                return Err(PaperrankError::Config(format!(
                    "pipeline.{} uses the command backend but has no command",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory holding the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.paperrank/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Similarity ranking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Neighbors retained per paper.
    pub top_k: usize,
    /// Vector dimension. Inferred from the snapshot when unset.
    pub expected_dim: Option<usize>,
    /// Spread the pairwise computation across worker threads.
    pub parallel: bool,
    /// Valid embeddings required before a ranking cycle runs.
    pub min_papers: usize,
    /// Sink table name.
    pub table: String,
    /// Literal row key prefix.
    pub row_prefix: String,
    /// Zero-padded width of the id in the row key.
    pub key_width: usize,
    /// Decimal places of the per-rank score columns.
    pub score_precision: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            top_k: 30,
            expected_dim: None,
            parallel: true,
            min_papers: 10,
            table: "paper_similarities".to_string(),
            row_prefix: "paper_".to_string(),
            key_width: 8,
            score_precision: 6,
        }
    }
}

/// Which column-oriented sink receives ranked rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkBackend {
    Memory,
    Sqlite,
    Hbase,
}

/// Ranked-result sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub backend: SinkBackend,
    /// Base URL of the HBase REST gateway.
    pub hbase_url: String,
    /// Per-request timeout for the REST gateway.
    pub request_timeout_secs: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            backend: SinkBackend::Sqlite,
            hbase_url: "http://localhost:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// How a pipeline stage is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageBackend {
    /// Spawn the configured external command.
    Command,
    /// Run the in-process implementation.
    Builtin,
}

/// Settings for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub enabled: bool,
    pub backend: StageBackend,
    /// Deadline for one invocation.
    pub timeout_secs: u64,
    /// argv template; `{query}` and `{count}` are substituted per iteration.
    pub command: Vec<String>,
}

impl StageConfig {
    fn command(timeout_secs: u64, command: &[&str]) -> Self {
        Self {
            enabled: true,
            backend: StageBackend::Command,
            timeout_secs,
            command: command.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn builtin(timeout_secs: u64) -> Self {
        Self {
            enabled: true,
            backend: StageBackend::Builtin,
            timeout_secs,
            command: Vec::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self::builtin(300)
    }
}

/// Pipeline orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Consecutive failed iterations before the loop halts for good.
    pub max_consecutive_failures: u32,
    /// Pause after a successful iteration.
    pub success_delay_secs: u64,
    /// Pause after a failed iteration.
    pub failure_delay_secs: u64,
    /// Stop after this many iterations. Unbounded when unset.
    pub max_iterations: Option<u64>,
    /// Papers requested from the collector per iteration.
    pub target_count: u32,
    /// Collection queries, rotated round-robin by iteration index.
    pub queries: Vec<String>,
    /// Most recent iterations kept in full in the run summary.
    pub history_limit: usize,
    pub collect: StageConfig,
    pub extract: StageConfig,
    pub rank: StageConfig,
}

impl PipelineConfig {
    pub fn success_delay(&self) -> Duration {
        Duration::from_secs(self.success_delay_secs)
    }

    pub fn failure_delay(&self) -> Duration {
        Duration::from_secs(self.failure_delay_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            success_delay_secs: 30,
            failure_delay_secs: 60,
            max_iterations: None,
            target_count: 100,
            queries: default_queries(),
            history_limit: 50,
            collect: StageConfig::command(
                300,
                &[
                    "python3",
                    "full_openalex_collector.py",
                    "--query",
                    "{query}",
                    "--count",
                    "{count}",
                ],
            ),
            extract: StageConfig::builtin(600),
            rank: StageConfig::builtin(1800),
        }
    }
}

fn default_queries() -> Vec<String> {
    [
        "machine learning",
        "artificial intelligence",
        "computer vision",
        "natural language processing",
        "deep learning",
        "neural networks",
        "data mining",
        "robotics",
        "algorithm",
        "software engineering",
        "distributed systems",
        "cloud computing",
        "blockchain",
        "cybersecurity",
        "reinforcement learning",
        "computer graphics",
        "human-computer interaction",
        "database systems",
        "operating systems",
        "computer networks",
        "information retrieval",
        "pattern recognition",
        "signal processing",
        "optimization",
        "computational biology",
        "quantum computing",
        "autonomous vehicles",
        "Internet of Things",
        "edge computing",
        "recommender systems",
        "game theory",
        "knowledge representation",
        "semantic web",
        "virtual reality",
        "augmented reality",
        "medical informatics",
        "bioinformatics",
        "social networks",
        "multimedia systems",
        "parallel computing",
        "formal methods",
    ]
    .iter()
    .map(|q| q.to_string())
    .collect()
}

/// Entity merge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Duplicate groups listed in the read-only report.
    pub sample_limit: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self { sample_limit: 20 }
    }
}
