mod external;

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::{Duration, Instant};

use crate::analytics::{AnalyticsCollector, AnalyticsError, render_distribution};
use crate::config::{AgentConfig, AgentKind, BenchConfig, ResolvedOutputs, ValidationError};
use crate::logging::telemetry_dir;
use cardgames_bot::{BaselineKind, Policy, run_episode};
use cardgames_core::{EnvConfig, GameError, GameSimulator};
use external::ExternalPolicy;
use parking_lot::Mutex;
use rand::{RngCore, SeedableRng, rngs::StdRng};
use serde::Serialize;
use thiserror::Error;
use tracing::{Level, event};

/// Primary entry point for benchmark runs.
pub struct BenchRunner {
    config: BenchConfig,
    outputs: ResolvedOutputs,
    env_config: EnvConfig,
    deck_counts: Vec<usize>,
    agents: Vec<AgentBlueprint>,
    print_lock: Mutex<()>,
}

/// Summary details returned after a run.
pub struct RunSummary {
    pub episodes: usize,
    pub agents: usize,
    pub rows_written: usize,
    pub failures: Vec<AgentFailure>,
    pub jsonl_path: PathBuf,
    pub summary_path: PathBuf,
    pub plot_path: Option<PathBuf>,
    pub distribution_plot_path: Option<PathBuf>,
    pub telemetry_path: Option<PathBuf>,
}

/// A worker that stopped early. Its completed episodes are still reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentFailure {
    pub agent: String,
    pub episode_index: usize,
    pub message: String,
}

/// Result of one episode played by one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeOutcome {
    pub episode_index: usize,
    pub seed: u64,
    pub steps: usize,
    pub total_reward: f64,
    pub mean_reward: f64,
    pub elapsed_ms: f64,
}

impl EpisodeOutcome {
    fn from_rewards(episode_index: usize, seed: u64, rewards: &[f64], elapsed: Duration) -> Self {
        let total_reward: f64 = rewards.iter().sum();
        let steps = rewards.len();
        Self {
            episode_index,
            seed,
            steps,
            total_reward,
            mean_reward: if steps == 0 {
                0.0
            } else {
                total_reward / steps as f64
            },
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
        }
    }

    pub fn ms_per_step(&self) -> f64 {
        if self.steps == 0 {
            0.0
        } else {
            self.elapsed_ms / self.steps as f64
        }
    }
}

enum WorkerMessage {
    Episode {
        agent_index: usize,
        outcome: EpisodeOutcome,
    },
    Failed {
        agent_index: usize,
        failure: AgentFailure,
    },
}

impl BenchRunner {
    /// Build a runner from a validated configuration.
    pub fn new(config: BenchConfig, outputs: ResolvedOutputs) -> Result<Self, RunnerError> {
        let env_config = config.game.env_config()?;
        let template = GameSimulator::new(env_config.clone())?;
        let agents = AgentBlueprint::from_configs(&config.agents, template.n_actions())?;

        Ok(Self {
            config,
            outputs,
            env_config,
            deck_counts: template.remaining_counts(),
            agents,
            print_lock: Mutex::new(()),
        })
    }

    /// Per-episode seeds drawn from the master seed. Every agent plays the
    /// same sequence of shuffles.
    pub fn episode_seeds(&self) -> Vec<u64> {
        let mut rng = StdRng::seed_from_u64(self.config.episodes.seed.unwrap_or(0));
        (0..self.config.episodes.runs)
            .map(|_| rng.next_u64())
            .collect()
    }

    /// Execute the benchmark: one worker per agent, results written once all
    /// workers finish.
    pub fn run(&self) -> Result<RunSummary, RunnerError> {
        ensure_parent(self.outputs.jsonl.parent())?;
        ensure_parent(self.outputs.summary_md.parent())?;
        if !self.outputs.plots_dir.as_os_str().is_empty() {
            fs::create_dir_all(&self.outputs.plots_dir)?;
        }

        let seeds = self.episode_seeds();
        let mut results: Vec<Vec<EpisodeOutcome>> = vec![Vec::new(); self.agents.len()];
        let mut failures: Vec<(usize, AgentFailure)> = Vec::new();

        event!(
            target: "cardgames_bench::runner",
            Level::INFO,
            run_id = %self.config.run_id,
            agents = self.agents.len(),
            episodes = seeds.len(),
            "benchmark started"
        );

        thread::scope(|scope| {
            let (tx, rx) = mpsc::channel();
            let mut handles = Vec::with_capacity(self.agents.len());
            for (agent_index, agent) in self.agents.iter().enumerate() {
                let tx = tx.clone();
                let seeds = &seeds;
                handles.push(scope.spawn(move || {
                    if let Err(failure) = self.run_agent(agent_index, agent, seeds, &tx) {
                        let _ = tx.send(WorkerMessage::Failed {
                            agent_index,
                            failure,
                        });
                    }
                }));
            }
            drop(tx);

            for message in rx {
                match message {
                    WorkerMessage::Episode {
                        agent_index,
                        outcome,
                    } => results[agent_index].push(outcome),
                    WorkerMessage::Failed {
                        agent_index,
                        failure,
                    } => failures.push((agent_index, failure)),
                }
            }

            for (agent_index, handle) in handles.into_iter().enumerate() {
                if handle.join().is_err() {
                    failures.push((
                        agent_index,
                        AgentFailure {
                            agent: self.agents[agent_index].name.clone(),
                            episode_index: results[agent_index].len(),
                            message: "worker panicked".to_string(),
                        },
                    ));
                }
            }
        });
        failures.sort_by_key(|(agent_index, _)| *agent_index);

        let mut writer = BufWriter::new(File::create(&self.outputs.jsonl)?);
        let mut analytics = AnalyticsCollector::new(&self.config)?;
        let mut rows_written = 0usize;
        for (agent, outcomes) in self.agents.iter().zip(&results) {
            for outcome in outcomes {
                analytics.record_episode(&agent.name, outcome)?;
                write_episode_row(&mut writer, &self.config.run_id, agent, outcome)?;
                rows_written += 1;
            }
        }
        writer.flush()?;

        for (_, failure) in &failures {
            analytics.record_failure(&failure.agent, &failure.message)?;
        }

        let summary = analytics.finalize()?;
        summary.write_markdown(&self.outputs.summary_md)?;
        let plot_path = optional_plot(summary.render_plot(&self.outputs.plots_dir));
        let distribution_plot_path =
            optional_plot(render_distribution(&self.deck_counts, &self.outputs.plots_dir));

        let telemetry_path = self
            .config
            .logging
            .enable_structured
            .then(|| telemetry_dir(&self.outputs).join("telemetry.jsonl"));

        Ok(RunSummary {
            episodes: seeds.len(),
            agents: self.agents.len(),
            rows_written,
            failures: failures.into_iter().map(|(_, failure)| failure).collect(),
            jsonl_path: self.outputs.jsonl.clone(),
            summary_path: self.outputs.summary_md.clone(),
            plot_path,
            distribution_plot_path,
            telemetry_path,
        })
    }

    fn run_agent(
        &self,
        agent_index: usize,
        agent: &AgentBlueprint,
        seeds: &[u64],
        tx: &Sender<WorkerMessage>,
    ) -> Result<(), AgentFailure> {
        let failure = |episode_index: usize, message: String| AgentFailure {
            agent: agent.name.clone(),
            episode_index,
            message,
        };

        let mut sim =
            GameSimulator::new(self.env_config.clone()).map_err(|err| failure(0, err.to_string()))?;
        let mut policy = agent.spawn_policy();
        let mut total = 0.0;

        for (episode_index, seed) in seeds.iter().copied().enumerate() {
            let start = Instant::now();
            let rewards = match run_episode(&mut sim, policy.as_mut(), Some(seed)) {
                Ok(rewards) => rewards,
                Err(err) => {
                    event!(
                        target: "cardgames_bench::runner",
                        Level::WARN,
                        run_id = %self.config.run_id,
                        agent = %agent.name,
                        episode_index = episode_index as u64,
                        error = %err,
                        "agent failed"
                    );
                    let _guard = self.print_lock.lock();
                    println!(
                        "{}: failed at episode {episode_index}: {err}",
                        agent.name
                    );
                    return Err(failure(episode_index, err.to_string()));
                }
            };

            let outcome = EpisodeOutcome::from_rewards(episode_index, seed, &rewards, start.elapsed());
            total += outcome.total_reward;

            if tracing::enabled!(Level::INFO) {
                event!(
                    target: "cardgames_bench::runner",
                    Level::INFO,
                    run_id = %self.config.run_id,
                    agent = %agent.name,
                    episode_index = episode_index as u64,
                    seed,
                    steps = outcome.steps as u64,
                    total_reward = outcome.total_reward,
                    elapsed_ms = outcome.elapsed_ms,
                    ms_per_step = outcome.ms_per_step()
                );
            }

            if tx
                .send(WorkerMessage::Episode {
                    agent_index,
                    outcome,
                })
                .is_err()
            {
                return Ok(());
            }
        }

        let _guard = self.print_lock.lock();
        println!(
            "{}: {} episodes, mean total reward {:.3}",
            agent.name,
            seeds.len(),
            total / seeds.len().max(1) as f64
        );
        Ok(())
    }
}

fn optional_plot(result: Result<PathBuf, AnalyticsError>) -> Option<PathBuf> {
    match result {
        Ok(path) => Some(path),
        Err(err) => {
            event!(
                target: "cardgames_bench::runner",
                Level::WARN,
                error = %err,
                "plot rendering skipped"
            );
            eprintln!("WARN: {err}");
            None
        }
    }
}

fn ensure_parent(path: Option<&Path>) -> Result<(), RunnerError> {
    if let Some(dir) = path.filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

fn write_episode_row(
    writer: &mut BufWriter<File>,
    run_id: &str,
    agent: &AgentBlueprint,
    outcome: &EpisodeOutcome,
) -> Result<(), RunnerError> {
    let row = EpisodeLogRow {
        run_id,
        episode_id: format!("E{:05}", outcome.episode_index),
        episode_index: outcome.episode_index,
        episode_seed: outcome.seed,
        agent: &agent.name,
        kind: agent.kind.as_str(),
        steps: outcome.steps,
        total_reward: outcome.total_reward,
        mean_reward: outcome.mean_reward,
    };
    serde_json::to_writer(&mut *writer, &row)?;
    writer.write_all(b"\n")?;
    Ok(())
}

#[derive(Serialize)]
struct EpisodeLogRow<'a> {
    run_id: &'a str,
    episode_id: String,
    episode_index: usize,
    episode_seed: u64,
    agent: &'a str,
    kind: &'static str,
    steps: usize,
    total_reward: f64,
    mean_reward: f64,
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("{0}")]
    Agent(#[from] AgentError),
    #[error("invalid game configuration: {0}")]
    Config(#[from] ValidationError),
    #[error("game setup failed: {0}")]
    Game(#[from] GameError),
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("failed to serialize log row: {source}")]
    Serialize {
        #[from]
        source: serde_json::Error,
    },
    #[error("analytics error: {0}")]
    Analytics(#[from] AnalyticsError),
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid constant parameter for agent '{name}': {message}")]
    InvalidConstantParam { name: String, message: String },
    #[error("invalid external parameter for agent '{name}': {message}")]
    InvalidExternalParam { name: String, message: String },
}

struct AgentBlueprint {
    name: String,
    kind: AgentKind,
    implementation: AgentImplementation,
}

enum AgentImplementation {
    Baseline(BaselineKind),
    External(ExternalOptions),
}

impl AgentBlueprint {
    fn from_configs(configs: &[AgentConfig], n_actions: usize) -> Result<Vec<Self>, AgentError> {
        configs
            .iter()
            .map(|config| Self::from_config(config, n_actions))
            .collect()
    }

    fn from_config(config: &AgentConfig, n_actions: usize) -> Result<Self, AgentError> {
        let implementation = match config.kind {
            AgentKind::Random => AgentImplementation::Baseline(BaselineKind::Random),
            AgentKind::MeanObservation => {
                AgentImplementation::Baseline(BaselineKind::MeanObservation)
            }
            AgentKind::ExpectedObservation => {
                AgentImplementation::Baseline(BaselineKind::ExpectedObservation)
            }
            AgentKind::Oracle => AgentImplementation::Baseline(BaselineKind::Oracle),
            AgentKind::Constant => {
                let action = constant_action(&config.name, &config.params, n_actions)?;
                AgentImplementation::Baseline(BaselineKind::Constant(action))
            }
            AgentKind::External => {
                let options = ExternalOptions::from_params(&config.name, &config.params)?;
                AgentImplementation::External(options)
            }
        };

        Ok(Self {
            name: config.name.clone(),
            kind: config.kind,
            implementation,
        })
    }

    fn spawn_policy(&self) -> Box<dyn Policy> {
        match &self.implementation {
            AgentImplementation::Baseline(kind) => kind.spawn(),
            AgentImplementation::External(opts) => {
                Box::new(ExternalPolicy::new(self.name.clone(), opts.clone()))
            }
        }
    }
}

fn constant_action(
    name: &str,
    params: &serde_yaml::Value,
    n_actions: usize,
) -> Result<usize, AgentError> {
    let invalid = |message: String| AgentError::InvalidConstantParam {
        name: name.to_string(),
        message,
    };

    let value = params
        .as_mapping()
        .and_then(|mapping| {
            mapping
                .iter()
                .find_map(|(key, value)| (key.as_str() == Some("action")).then_some(value))
        })
        .ok_or_else(|| invalid("params.action is required".to_string()))?;

    let action = value
        .as_u64()
        .ok_or_else(|| invalid("action must be a non-negative integer".to_string()))?;
    let action = usize::try_from(action).map_err(|err| invalid(err.to_string()))?;
    if action >= n_actions {
        return Err(invalid(format!(
            "action {action} outside the action space [0, {n_actions})"
        )));
    }
    Ok(action)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum ExternalFallback {
    Baseline(BaselineKind),
    Error,
}

#[derive(Clone, Debug)]
pub(super) struct ExternalOptions {
    pub(super) command: Option<String>,
    pub(super) args: Vec<String>,
    pub(super) working_dir: Option<PathBuf>,
    pub(super) timeout_ms: Option<u64>,
    pub(super) fallback: ExternalFallback,
}

impl ExternalOptions {
    fn from_params(name: &str, params: &serde_yaml::Value) -> Result<Self, AgentError> {
        let invalid = |message: String| AgentError::InvalidExternalParam {
            name: name.to_string(),
            message,
        };

        let mut command = None;
        let mut args = Vec::new();
        let mut working_dir = None;
        let mut timeout_ms = None;
        let mut fallback = ExternalFallback::Baseline(BaselineKind::ExpectedObservation);

        if params.is_null() {
            return Ok(Self {
                command,
                args,
                working_dir,
                timeout_ms,
                fallback,
            });
        }

        let mapping = params
            .as_mapping()
            .ok_or_else(|| invalid("expected mapping for external params".to_string()))?;

        for (key, value) in mapping {
            match key.as_str() {
                Some("command") => {
                    command = value.as_str().map(|s| s.to_string());
                    if command.is_none() {
                        return Err(invalid("command must be a string".to_string()));
                    }
                }
                Some("args") => {
                    let seq = value
                        .as_sequence()
                        .ok_or_else(|| invalid("args must be an array of strings".to_string()))?;
                    args = seq
                        .iter()
                        .filter_map(|v| v.as_str().map(|s| s.to_string()))
                        .collect();
                }
                Some("working_dir") => {
                    working_dir = value.as_str().map(PathBuf::from);
                }
                Some("timeout_ms") => {
                    timeout_ms = Some(value.as_u64().ok_or_else(|| {
                        invalid("timeout_ms must be a non-negative integer".to_string())
                    })?);
                }
                Some("fallback") => {
                    let text = value
                        .as_str()
                        .ok_or_else(|| invalid("fallback must be a string".to_string()))?;
                    fallback = match text.to_ascii_lowercase().as_str() {
                        "error" | "none" => ExternalFallback::Error,
                        other => BaselineKind::from_str(other)
                            .map(ExternalFallback::Baseline)
                            .map_err(|_| invalid(format!("unknown fallback '{other}'")))?,
                    };
                }
                _ => {}
            }
        }

        Ok(Self {
            command,
            args,
            working_dir,
            timeout_ms,
            fallback,
        })
    }
}
