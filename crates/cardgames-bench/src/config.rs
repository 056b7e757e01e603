use cardgames_core::{EnvConfig, InitialObservation, Rank, RankScores};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::Level;

const DEFAULT_N_DECKS: usize = 1;
const RUN_ID_ALLOWED: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789._-";

/// Root benchmark configuration loaded from YAML.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BenchConfig {
    pub run_id: String,
    #[serde(default)]
    pub game: GameConfig,
    pub episodes: EpisodesConfig,
    pub agents: Vec<AgentConfig>,
    pub outputs: OutputsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BenchConfig {
    /// Load configuration from a YAML file on disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let path_buf = path.to_path_buf();
        let file = File::open(path).map_err(|source| ConfigError::Read {
            source,
            path: path_buf.clone(),
        })?;
        let reader = BufReader::new(file);
        let mut cfg: BenchConfig =
            serde_yaml::from_reader(reader).map_err(|source| ConfigError::Parse {
                source,
                path: path_buf.clone(),
            })?;
        cfg.validate().map_err(|source| ConfigError::Invalid {
            path: path_buf,
            source,
        })?;
        Ok(cfg)
    }

    /// Validate the configuration without performing I/O.
    pub fn validate(&mut self) -> Result<(), ValidationError> {
        validate_run_id(&self.run_id)?;
        self.game.validate()?;
        self.episodes.validate()?;
        self.outputs.validate(&self.run_id)?;
        self.metrics.validate(&self.agents)?;
        self.logging.normalize();
        validate_agents(&mut self.agents)?;
        Ok(())
    }

    /// Resolve output templates (e.g., `{run_id}` placeholders) into concrete paths.
    pub fn resolved_outputs(&self) -> ResolvedOutputs {
        ResolvedOutputs {
            jsonl: resolve_template(&self.run_id, &self.outputs.jsonl),
            summary_md: resolve_template(&self.run_id, &self.outputs.summary_md),
            plots_dir: resolve_template(&self.run_id, &self.outputs.plots_dir),
        }
    }
}

/// Game setup shared by every agent.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GameConfig {
    #[serde(default = "default_n_decks")]
    pub n_decks: usize,
    #[serde(default)]
    pub rank_scores: RankScoresConfig,
    #[serde(default)]
    pub initial_observation: InitialObservation,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            n_decks: DEFAULT_N_DECKS,
            rank_scores: RankScoresConfig::default(),
            initial_observation: InitialObservation::default(),
        }
    }
}

impl GameConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.n_decks == 0 {
            return Err(ValidationError::InvalidField {
                field: "game.n_decks".to_string(),
                message: "number of decks must be greater than zero".to_string(),
            });
        }
        self.rank_scores.resolve()?;
        Ok(())
    }

    /// Environment configuration every worker builds its simulator from.
    pub fn env_config(&self) -> Result<EnvConfig, ValidationError> {
        Ok(EnvConfig {
            n_decks: self.n_decks,
            rank_scores: self.rank_scores.resolve()?,
            initial_observation: self.initial_observation,
        })
    }
}

fn default_n_decks() -> usize {
    DEFAULT_N_DECKS
}

/// Either a named preset or an explicit `rank symbol -> bucket` table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RankScoresConfig {
    Preset(String),
    Table(BTreeMap<String, usize>),
}

impl Default for RankScoresConfig {
    fn default() -> Self {
        RankScoresConfig::Preset("simple".to_string())
    }
}

impl RankScoresConfig {
    pub fn resolve(&self) -> Result<RankScores, ValidationError> {
        match self {
            RankScoresConfig::Preset(name) => match name.to_ascii_lowercase().as_str() {
                "simple" => Ok(RankScores::simple()),
                other => Err(ValidationError::InvalidField {
                    field: "game.rank_scores".to_string(),
                    message: format!("unknown rank score preset '{other}'"),
                }),
            },
            RankScoresConfig::Table(table) => {
                let mut pairs = Vec::with_capacity(table.len());
                for (symbol, bucket) in table {
                    let rank =
                        Rank::from_symbol(symbol).ok_or_else(|| ValidationError::InvalidField {
                            field: format!("game.rank_scores.{symbol}"),
                            message: "unknown rank symbol".to_string(),
                        })?;
                    pairs.push((rank, *bucket));
                }
                RankScores::from_pairs(pairs).map_err(|err| ValidationError::InvalidField {
                    field: "game.rank_scores".to_string(),
                    message: err.to_string(),
                })
            }
        }
    }
}

/// Episode sampling configuration block.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EpisodesConfig {
    pub runs: usize,
    pub seed: Option<u64>,
}

impl EpisodesConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.runs == 0 {
            return Err(ValidationError::InvalidField {
                field: "episodes.runs".to_string(),
                message: "number of runs must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Definition of a benchmark participant.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub name: String,
    pub kind: AgentKind,
    #[serde(default)]
    pub params: serde_yaml::Value,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Random,
    MeanObservation,
    ExpectedObservation,
    Constant,
    Oracle,
    External,
}

impl AgentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::Random => "random",
            AgentKind::MeanObservation => "mean_observation",
            AgentKind::ExpectedObservation => "expected_observation",
            AgentKind::Constant => "constant",
            AgentKind::Oracle => "oracle",
            AgentKind::External => "external",
        }
    }
}

/// Output artifact configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OutputsConfig {
    pub jsonl: String,
    pub summary_md: String,
    pub plots_dir: String,
}

impl OutputsConfig {
    fn validate(&self, run_id: &str) -> Result<(), ValidationError> {
        for (label, value) in [
            ("outputs.jsonl", &self.jsonl),
            ("outputs.summary_md", &self.summary_md),
            ("outputs.plots_dir", &self.plots_dir),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::InvalidField {
                    field: label.to_string(),
                    message: "path must not be empty".to_string(),
                });
            }

            let resolved = resolve_template(run_id, value);
            if resolved.components().count() == 0 {
                return Err(ValidationError::InvalidField {
                    field: label.to_string(),
                    message: "resolved path is invalid".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Metrics configuration block.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct MetricsConfig {
    #[serde(default)]
    pub baseline: Option<String>,
}

impl MetricsConfig {
    fn validate(&self, agents: &[AgentConfig]) -> Result<(), ValidationError> {
        let Some(baseline) = self.baseline.as_ref() else {
            return Err(ValidationError::InvalidField {
                field: "metrics.baseline".to_string(),
                message: "baseline agent must be specified".to_string(),
            });
        };

        if !agents.iter().any(|a| &a.name == baseline) {
            return Err(ValidationError::InvalidField {
                field: "metrics.baseline".to_string(),
                message: format!("baseline agent '{baseline}' is not defined in agents list"),
            });
        }

        Ok(())
    }
}

/// Logging configuration defaults to disabled structured logs.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub enable_structured: bool,
    #[serde(default = "default_tracing_level")]
    pub tracing_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enable_structured: false,
            tracing_level: default_tracing_level(),
        }
    }
}

impl LoggingConfig {
    fn normalize(&mut self) {
        if self.tracing_level.trim().is_empty() {
            self.tracing_level = default_tracing_level();
        }
    }

    pub fn level(&self) -> Option<Level> {
        match self.tracing_level.to_ascii_lowercase().as_str() {
            "trace" => Some(Level::TRACE),
            "debug" => Some(Level::DEBUG),
            "info" => Some(Level::INFO),
            "warn" | "warning" => Some(Level::WARN),
            "error" => Some(Level::ERROR),
            _ => None,
        }
    }
}

fn default_tracing_level() -> String {
    "info".to_string()
}

fn validate_run_id(run_id: &str) -> Result<(), ValidationError> {
    if run_id.trim().is_empty() {
        return Err(ValidationError::InvalidField {
            field: "run_id".to_string(),
            message: "run_id must not be empty".to_string(),
        });
    }

    if !run_id.chars().all(|c| RUN_ID_ALLOWED.contains(c)) {
        return Err(ValidationError::InvalidField {
            field: "run_id".to_string(),
            message: "run_id may only contain alphanumeric characters, '.', '_' or '-'".to_string(),
        });
    }

    Ok(())
}

fn validate_agents(agents: &mut [AgentConfig]) -> Result<(), ValidationError> {
    if agents.is_empty() {
        return Err(ValidationError::InvalidField {
            field: "agents".to_string(),
            message: "at least one agent must be specified".to_string(),
        });
    }

    let mut seen = HashSet::new();
    for agent in agents.iter_mut() {
        if agent.name.trim().is_empty() {
            return Err(ValidationError::InvalidField {
                field: "agents.name".to_string(),
                message: "agent name must not be empty".to_string(),
            });
        }

        if !agent.name.chars().all(|c| RUN_ID_ALLOWED.contains(c)) {
            return Err(ValidationError::InvalidField {
                field: format!("agents[{}].name", agent.name),
                message: "agent name contains invalid characters".to_string(),
            });
        }

        if !seen.insert(agent.name.clone()) {
            return Err(ValidationError::InvalidField {
                field: "agents".to_string(),
                message: format!("agent name '{}' defined more than once", agent.name),
            });
        }

        if agent.params.is_null() {
            agent.params = serde_yaml::Value::Mapping(Default::default());
        }
    }

    Ok(())
}

fn resolve_template(run_id: &str, template: &str) -> PathBuf {
    let replaced = template.replace("{run_id}", run_id);
    PathBuf::from(replaced)
}

/// Fully resolved output paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOutputs {
    pub jsonl: PathBuf,
    pub summary_md: PathBuf,
    pub plots_dir: PathBuf,
}

/// Errors surfaced when loading configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        #[source]
        source: serde_yaml::Error,
        path: PathBuf,
    },
    #[error("invalid configuration in {path:?}: {source}")]
    Invalid {
        path: PathBuf,
        source: ValidationError,
    },
}

/// Validation failures captured with contextual metadata.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field}: {message}")]
    InvalidField { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC_YAML: &str = r#"
run_id: "guess_smoke"
game:
  n_decks: 2
  initial_observation: "top_card"
episodes:
  seed: 123
  runs: 16
agents:
  - name: "random"
    kind: "random"
  - name: "expected"
    kind: "expected_observation"
  - name: "midpoint"
    kind: "constant"
    params:
      action: 6
outputs:
  jsonl: "bench/out/{run_id}/episodes.jsonl"
  summary_md: "bench/out/{run_id}/summary.md"
  plots_dir: "bench/out/{run_id}/plots"
metrics:
  baseline: "random"
logging:
  enable_structured: true
  tracing_level: "debug"
"#;

    fn parse(yaml: &str) -> BenchConfig {
        serde_yaml::from_str(yaml).expect("parse yaml")
    }

    #[test]
    fn loads_and_validates_basic_config() {
        let mut cfg = parse(BASIC_YAML);
        cfg.validate().expect("validate");

        assert_eq!(
            cfg.metrics,
            MetricsConfig {
                baseline: Some("random".to_string())
            }
        );
        assert!(cfg.logging.enable_structured);
        assert_eq!(cfg.logging.level(), Some(Level::DEBUG));
        assert_eq!(cfg.agents[2].kind, AgentKind::Constant);
        assert!(cfg.agents[0].params.is_mapping());

        let env = cfg.game.env_config().expect("env config");
        assert_eq!(env.n_decks, 2);
        assert_eq!(env.initial_observation, InitialObservation::TopCard);
        assert_eq!(env.rank_scores, RankScores::simple());

        let outputs = cfg.resolved_outputs();
        assert_eq!(
            outputs.jsonl,
            PathBuf::from("bench/out/guess_smoke/episodes.jsonl")
        );
    }

    #[test]
    fn game_block_is_optional() {
        let yaml = BASIC_YAML.replace(
            "game:\n  n_decks: 2\n  initial_observation: \"top_card\"\n",
            "",
        );
        let mut cfg = parse(&yaml);
        cfg.validate().expect("validate");
        assert_eq!(cfg.game, GameConfig::default());
    }

    #[test]
    fn custom_rank_table_resolves() {
        let yaml = BASIC_YAML.replace(
            "  initial_observation: \"top_card\"\n",
            "  rank_scores: { \"2\": 0, \"3\": 0, \"4\": 0, \"5\": 0, \"6\": 0, \"7\": 0, \"8\": 0, \"9\": 0, \"10\": 1, \"J\": 1, \"Q\": 1, \"K\": 1, \"A\": 2 }\n",
        );
        let mut cfg = parse(&yaml);
        cfg.validate().expect("validate");
        let scores = cfg.game.env_config().unwrap().rank_scores;
        assert_eq!(scores.n_buckets(), 3);
        assert_eq!(scores.score(Rank::Ten), 1);
        assert_eq!(scores.score(Rank::Ace), 2);
    }

    #[test]
    fn rejects_incomplete_rank_table() {
        let yaml = BASIC_YAML.replace(
            "  initial_observation: \"top_card\"\n",
            "  rank_scores: { \"A\": 0 }\n",
        );
        let mut cfg = parse(&yaml);
        let err = cfg.validate().expect_err("missing ranks");
        assert!(matches!(
            err,
            ValidationError::InvalidField { field, .. } if field == "game.rank_scores"
        ));
    }

    #[test]
    fn rejects_unknown_preset() {
        let yaml = BASIC_YAML.replace(
            "  initial_observation: \"top_card\"\n",
            "  rank_scores: \"blackjack\"\n",
        );
        let mut cfg = parse(&yaml);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_decks_and_runs() {
        let mut cfg = parse(&BASIC_YAML.replace("n_decks: 2", "n_decks: 0"));
        let err = cfg.validate().expect_err("zero decks");
        assert!(matches!(
            err,
            ValidationError::InvalidField { field, .. } if field == "game.n_decks"
        ));

        let mut cfg = parse(&BASIC_YAML.replace("runs: 16", "runs: 0"));
        let err = cfg.validate().expect_err("zero runs");
        assert!(matches!(
            err,
            ValidationError::InvalidField { field, .. } if field == "episodes.runs"
        ));
    }

    #[test]
    fn rejects_missing_baseline() {
        let yaml = BASIC_YAML.replace("baseline: \"random\"\n", "");
        let mut cfg = parse(&yaml);
        let err = cfg.validate().expect_err("should fail");
        assert!(matches!(
            err,
            ValidationError::InvalidField { field, .. } if field == "metrics.baseline"
        ));
    }

    #[test]
    fn rejects_unknown_baseline() {
        let yaml = BASIC_YAML.replace("baseline: \"random\"", "baseline: \"oracle\"");
        let mut cfg = parse(&yaml);
        let err = cfg.validate().expect_err("should fail");
        assert!(matches!(
            err,
            ValidationError::InvalidField { field, .. } if field == "metrics.baseline"
        ));
    }

    #[test]
    fn rejects_duplicate_agents() {
        let yaml = BASIC_YAML.replace("- name: \"expected\"", "- name: \"random\"");
        let mut cfg = parse(&yaml);
        let err = cfg.validate().expect_err("duplicate agents should fail");
        assert!(matches!(
            err,
            ValidationError::InvalidField { field, .. } if field == "agents"
        ));
    }

    #[test]
    fn rejects_invalid_run_id() {
        let yaml = BASIC_YAML.replace("guess_smoke", "guess smoke");
        let mut cfg = parse(&yaml);
        let err = cfg.validate().expect_err("invalid run id");
        assert!(matches!(
            err,
            ValidationError::InvalidField { field, .. } if field == "run_id"
        ));
    }

    #[test]
    fn outputs_resolve_template_multiple_occurrences() {
        let yaml = BASIC_YAML.replace(
            "bench/out/{run_id}/plots",
            "bench/out/{run_id}/{run_id}/plots",
        );
        let mut cfg = parse(&yaml);
        cfg.validate().expect("valid");
        let outputs = cfg.resolved_outputs();
        assert_eq!(
            outputs.plots_dir,
            PathBuf::from("bench/out/guess_smoke/guess_smoke/plots")
        );
    }
}
