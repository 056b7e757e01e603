use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use plotters::prelude::*;
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};
use thiserror::Error;

use crate::config::{AgentKind, BenchConfig};
use crate::runner::EpisodeOutcome;

const CONFIDENCE_Z: f64 = 1.96; // 95% CI

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("baseline agent '{0}' not present in benchmark results")]
    MissingBaseline(String),
    #[error("agent '{0}' defined in results but missing from configuration")]
    UnknownAgent(String),
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to render plot: {0}")]
    Plot(String),
}

pub struct AnalyticsCollector {
    baseline: String,
    agents: Vec<AgentAccumulator>,
}

impl AnalyticsCollector {
    pub fn new(config: &BenchConfig) -> Result<Self, AnalyticsError> {
        let baseline = config
            .metrics
            .baseline
            .clone()
            .ok_or_else(|| AnalyticsError::MissingBaseline("<unset>".into()))?;

        if !config.agents.iter().any(|agent| agent.name == baseline) {
            return Err(AnalyticsError::MissingBaseline(baseline));
        }

        let agents = config
            .agents
            .iter()
            .map(|agent| AgentAccumulator::new(agent.name.clone(), agent.kind))
            .collect();

        Ok(Self { baseline, agents })
    }

    pub fn record_episode(
        &mut self,
        agent: &str,
        outcome: &EpisodeOutcome,
    ) -> Result<(), AnalyticsError> {
        self.accumulator(agent)?.record(outcome);
        Ok(())
    }

    pub fn record_failure(&mut self, agent: &str, message: &str) -> Result<(), AnalyticsError> {
        self.accumulator(agent)?.failure = Some(message.to_string());
        Ok(())
    }

    fn accumulator(&mut self, agent: &str) -> Result<&mut AgentAccumulator, AnalyticsError> {
        self.agents
            .iter_mut()
            .find(|acc| acc.name == agent)
            .ok_or_else(|| AnalyticsError::UnknownAgent(agent.to_string()))
    }

    pub fn finalize(self) -> Result<AnalyticsSummary, AnalyticsError> {
        let baseline_totals: HashMap<usize, f64> = self
            .agents
            .iter()
            .find(|acc| acc.name == self.baseline)
            .map(|acc| acc.totals.iter().copied().collect())
            .ok_or_else(|| AnalyticsError::MissingBaseline(self.baseline.clone()))?;

        let mut comparisons = Vec::with_capacity(self.agents.len());
        for acc in &self.agents {
            if acc.name == self.baseline {
                comparisons.push(ComparisonReport {
                    agent: acc.name.clone(),
                    p_value: 1.0,
                    sample_size: acc.totals.len(),
                });
                continue;
            }

            let diffs: Vec<f64> = acc
                .totals
                .iter()
                .filter_map(|(episode, total)| {
                    baseline_totals
                        .get(episode)
                        .map(|baseline| total - baseline)
                })
                .collect();
            let (p_value, sample_size) = wilcoxon_signed_rank(diffs);
            comparisons.push(ComparisonReport {
                agent: acc.name.clone(),
                p_value,
                sample_size,
            });
        }

        let reports = self
            .agents
            .into_iter()
            .map(AgentAccumulator::into_report)
            .collect();

        Ok(AnalyticsSummary {
            baseline: self.baseline,
            agents: reports,
            comparisons,
        }
        .enrich())
    }
}

struct AgentAccumulator {
    name: String,
    kind: AgentKind,
    totals: Vec<(usize, f64)>,
    total_steps: usize,
    total_reward: f64,
    total_ms: f64,
    failure: Option<String>,
}

impl AgentAccumulator {
    fn new(name: String, kind: AgentKind) -> Self {
        Self {
            name,
            kind,
            totals: Vec::new(),
            total_steps: 0,
            total_reward: 0.0,
            total_ms: 0.0,
            failure: None,
        }
    }

    fn record(&mut self, outcome: &EpisodeOutcome) {
        self.totals
            .push((outcome.episode_index, outcome.total_reward));
        self.total_steps += outcome.steps;
        self.total_reward += outcome.total_reward;
        self.total_ms += outcome.elapsed_ms;
    }

    fn into_report(self) -> AgentReport {
        let episode_totals: Vec<f64> = self.totals.iter().map(|(_, total)| *total).collect();
        let episodes = episode_totals.len();
        let mean_total = if episodes == 0 {
            0.0
        } else {
            self.total_reward / episodes as f64
        };
        let mean_step_reward = if self.total_steps == 0 {
            0.0
        } else {
            self.total_reward / self.total_steps as f64
        };
        let average_ms_per_step = if self.total_steps == 0 {
            0.0
        } else {
            self.total_ms / self.total_steps as f64
        };

        AgentReport {
            name: self.name,
            kind: self.kind,
            episodes,
            mean_total,
            ci95: confidence_interval(&episode_totals),
            mean_step_reward,
            average_ms_per_step,
            delta_vs_baseline: 0.0, // Filled once the baseline report is known
            failure: self.failure,
        }
    }
}

/// Two-sided Wilcoxon signed-rank test on paired differences, normal
/// approximation with tie and continuity correction. Returns `(p, n)` where
/// `n` counts the non-zero differences.
fn wilcoxon_signed_rank(diffs: Vec<f64>) -> (f64, usize) {
    let diffs: Vec<f64> = diffs
        .into_iter()
        .filter(|d| d.abs() > f64::EPSILON)
        .collect();
    let n = diffs.len();
    if n == 0 {
        return (1.0, 0);
    }

    let mut paired: Vec<(f64, f64)> = diffs.into_iter().map(|d| (d.abs(), d.signum())).collect();
    paired.sort_by(|a, b| a.0.total_cmp(&b.0));

    // Average ranks across ties
    let mut ranks = Vec::with_capacity(n);
    let mut tie_sizes = Vec::new();
    let mut i = 0;
    while i < paired.len() {
        let mut j = i;
        while j + 1 < paired.len() && (paired[j + 1].0 - paired[i].0).abs() < 1e-12 {
            j += 1;
        }
        let rank = (i + j + 2) as f64 / 2.0;
        for item in &paired[i..=j] {
            ranks.push((rank, item.1));
        }
        if j > i {
            tie_sizes.push(j - i + 1);
        }
        i = j + 1;
    }

    let w_plus: f64 = ranks
        .iter()
        .filter(|(_, sign)| *sign > 0.0)
        .map(|(rank, _)| *rank)
        .sum();
    let w_minus: f64 = ranks
        .iter()
        .filter(|(_, sign)| *sign < 0.0)
        .map(|(rank, _)| *rank)
        .sum();

    let w = w_plus.min(w_minus);
    let n_f = n as f64;
    let mean_w = n_f * (n_f + 1.0) / 4.0;

    let tie_adjustment: f64 = tie_sizes
        .into_iter()
        .map(|count| {
            let c = count as f64;
            (c.powi(3) - c) / 48.0
        })
        .sum();
    let variance_w = n_f * (n_f + 1.0) * (2.0 * n_f + 1.0) / 24.0 - tie_adjustment;
    if variance_w <= 0.0 {
        return (1.0, n);
    }

    let Ok(normal) = Normal::new(0.0, 1.0) else {
        return (1.0, n);
    };
    let z = (((w - mean_w).abs() - 0.5) / variance_w.sqrt()).max(0.0);
    let p = 2.0 * (1.0 - normal.cdf(z));
    (p.clamp(0.0, 1.0), n)
}

#[derive(Debug, Serialize)]
pub struct AnalyticsSummary {
    pub baseline: String,
    pub agents: Vec<AgentReport>,
    pub comparisons: Vec<ComparisonReport>,
}

impl AnalyticsSummary {
    pub fn enrich(mut self) -> Self {
        let baseline_mean = self
            .agents
            .iter()
            .find(|agent| agent.name == self.baseline)
            .map(|agent| agent.mean_total)
            .unwrap_or(0.0);

        for agent in &mut self.agents {
            agent.delta_vs_baseline = agent.mean_total - baseline_mean;
        }

        self
    }

    pub fn p_value(&self, agent: &str) -> f64 {
        self.comparisons
            .iter()
            .find(|c| c.agent == agent)
            .map(|c| c.p_value)
            .unwrap_or(1.0)
    }

    pub fn write_markdown(&self, path: impl AsRef<Path>) -> Result<(), AnalyticsError> {
        let mut rows = String::new();
        rows.push_str("# Guessing Benchmark Summary\n\n");
        rows.push_str(&format!("Baseline: `{}`\n\n", self.baseline));
        rows.push_str("| Agent | Kind | Episodes | Mean total | Δ vs baseline | 95% CI | Mean reward/step | Avg ms/step | p-value |\n");
        rows.push_str("|-------|------|----------|------------|---------------|--------|------------------|-------------|---------|\n");

        for agent in &self.agents {
            rows.push_str(&format!(
                "| {name} | {kind} | {episodes} | {mean:.3} | {delta:+.3} | [{ci_low:.3}, {ci_high:.3}] | {step:.4} | {ms:.4} | {pval:.3} |\n",
                name = agent.name,
                kind = agent.kind.as_str(),
                episodes = agent.episodes,
                mean = agent.mean_total,
                delta = agent.delta_vs_baseline,
                ci_low = agent.ci95.0,
                ci_high = agent.ci95.1,
                step = agent.mean_step_reward,
                ms = agent.average_ms_per_step,
                pval = self.p_value(&agent.name),
            ));
        }

        let failed: Vec<&AgentReport> = self
            .agents
            .iter()
            .filter(|agent| agent.failure.is_some())
            .collect();
        if !failed.is_empty() {
            rows.push_str("\n## Failed agents\n\n");
            for agent in failed {
                rows.push_str(&format!(
                    "- `{}` after {} episodes: {}\n",
                    agent.name,
                    agent.episodes,
                    agent.failure.as_deref().unwrap_or_default()
                ));
            }
        }

        fs::write(path.as_ref(), rows).map_err(|e| AnalyticsError::Io {
            context: "writing summary markdown",
            source: e,
        })?;
        Ok(())
    }

    pub fn render_plot(&self, dir: impl AsRef<Path>) -> Result<PathBuf, AnalyticsError> {
        let output_path = plot_path(dir.as_ref(), "mean_reward.png")?;
        let baseline = self.baseline.clone();
        let agents = self.agents.clone();

        render_guarded(move || {
            let root = BitMapBackend::new(&output_path, (800, 480)).into_drawing_area();
            root.fill(&WHITE)
                .map_err(|e| AnalyticsError::Plot(e.to_string()))?;

            let y_max = agents
                .iter()
                .map(|a| a.mean_total)
                .fold(0.0f64, f64::max);
            let y_max = (y_max * 1.1).max(1.0);

            let mut chart = ChartBuilder::on(&root)
                .margin(20)
                .caption(
                    "Mean episode reward (higher is better)",
                    ("sans-serif", 22),
                )
                .set_label_area_size(LabelAreaPosition::Left, 50)
                .set_label_area_size(LabelAreaPosition::Bottom, 60)
                .build_cartesian_2d(0..agents.len(), 0.0..y_max)
                .map_err(|e| AnalyticsError::Plot(e.to_string()))?;

            chart
                .configure_mesh()
                .disable_mesh()
                .y_desc("Mean total reward")
                .x_desc("Agent")
                .x_label_formatter(&|idx| {
                    agents
                        .get(*idx)
                        .map(|agent| agent.name.clone())
                        .unwrap_or_default()
                })
                .draw()
                .map_err(|e| AnalyticsError::Plot(e.to_string()))?;

            chart
                .draw_series(agents.iter().enumerate().map(|(idx, agent)| {
                    let color = if agent.name == baseline {
                        &BLUE
                    } else if agent.delta_vs_baseline >= 0.0 {
                        &GREEN
                    } else {
                        &RED
                    };
                    Rectangle::new([(idx, 0.0), (idx + 1, agent.mean_total)], color.filled())
                }))
                .map_err(|e| AnalyticsError::Plot(e.to_string()))?;

            drop(chart);

            root.present()
                .map_err(|e| AnalyticsError::Plot(e.to_string()))?;

            drop(root);

            Ok(output_path)
        })
    }
}

/// Bar chart of how many cards fall into each score bucket.
pub fn render_distribution(
    counts: &[usize],
    dir: impl AsRef<Path>,
) -> Result<PathBuf, AnalyticsError> {
    let output_path = plot_path(dir.as_ref(), "deck_distribution.png")?;
    let counts = counts.to_vec();

    render_guarded(move || {
        let root = BitMapBackend::new(&output_path, (800, 480)).into_drawing_area();
        root.fill(&WHITE)
            .map_err(|e| AnalyticsError::Plot(e.to_string()))?;

        let y_max = counts.iter().copied().max().unwrap_or(0) as f64;
        let y_max = (y_max * 1.1).max(1.0);
        let mut chart = ChartBuilder::on(&root)
            .margin(20)
            .caption("Cards per observation bucket", ("sans-serif", 22))
            .set_label_area_size(LabelAreaPosition::Left, 50)
            .set_label_area_size(LabelAreaPosition::Bottom, 40)
            .build_cartesian_2d(0..counts.len(), 0.0..y_max)
            .map_err(|e| AnalyticsError::Plot(e.to_string()))?;

        chart
            .configure_mesh()
            .disable_mesh()
            .y_desc("Cards")
            .x_desc("Observation")
            .draw()
            .map_err(|e| AnalyticsError::Plot(e.to_string()))?;

        chart
            .draw_series(counts.iter().enumerate().map(|(bucket, count)| {
                Rectangle::new([(bucket, 0.0), (bucket + 1, *count as f64)], BLUE.filled())
            }))
            .map_err(|e| AnalyticsError::Plot(e.to_string()))?;

        drop(chart);

        root.present()
            .map_err(|e| AnalyticsError::Plot(e.to_string()))?;

        drop(root);

        Ok(output_path)
    })
}

fn plot_path(dir: &Path, file_name: &str) -> Result<PathBuf, AnalyticsError> {
    if !dir.as_os_str().is_empty() {
        fs::create_dir_all(dir).map_err(|e| AnalyticsError::Io {
            context: "creating plots directory",
            source: e,
        })?;
    }
    Ok(dir.join(file_name))
}

/// Runs a plotters closure with the panic hook silenced; font lookups panic
/// on hosts without system fonts.
fn render_guarded<F>(draw: F) -> Result<PathBuf, AnalyticsError>
where
    F: FnOnce() -> Result<PathBuf, AnalyticsError> + std::panic::UnwindSafe,
{
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(|_| {}));
    let attempt = std::panic::catch_unwind(draw);
    std::panic::set_hook(prev_hook);

    match attempt {
        Ok(result) => result,
        Err(_) => Err(AnalyticsError::Plot(
            "plotters panicked while rendering (missing font support?)".into(),
        )),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentReport {
    pub name: String,
    pub kind: AgentKind,
    pub episodes: usize,
    pub mean_total: f64,
    pub ci95: (f64, f64),
    pub mean_step_reward: f64,
    pub average_ms_per_step: f64,
    #[serde(skip)]
    pub delta_vs_baseline: f64,
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub agent: String,
    pub p_value: f64,
    pub sample_size: usize,
}

fn confidence_interval(points: &[f64]) -> (f64, f64) {
    if points.is_empty() {
        return (0.0, 0.0);
    }
    let mean = points.iter().sum::<f64>() / points.len() as f64;
    if points.len() == 1 {
        return (mean, mean);
    }
    let variance = points
        .iter()
        .map(|value| (value - mean).powi(2))
        .sum::<f64>()
        / (points.len() as f64 - 1.0);
    let std_error = (variance / points.len() as f64).sqrt();
    let margin = CONFIDENCE_Z * std_error;
    (mean - margin, mean + margin)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BenchConfig {
        let yaml = r#"
run_id: "analytics"
episodes:
  runs: 3
agents:
  - name: "base"
    kind: "random"
  - name: "better"
    kind: "expected_observation"
outputs:
  jsonl: "out/episodes.jsonl"
  summary_md: "out/summary.md"
  plots_dir: "out/plots"
metrics:
  baseline: "base"
"#;
        let mut cfg: BenchConfig = serde_yaml::from_str(yaml).expect("parse");
        cfg.validate().expect("valid");
        cfg
    }

    fn outcome(episode_index: usize, total_reward: f64) -> EpisodeOutcome {
        EpisodeOutcome {
            episode_index,
            seed: episode_index as u64,
            steps: 52,
            total_reward,
            mean_reward: total_reward / 52.0,
            elapsed_ms: 5.2,
        }
    }

    #[test]
    fn confidence_interval_brackets_the_mean() {
        let (low, high) = confidence_interval(&[30.0, 32.0, 34.0]);
        assert!(low < 32.0 && 32.0 < high);
        assert!((high - 32.0 - CONFIDENCE_Z * (4.0f64 / 3.0).sqrt()).abs() < 1e-9);
        assert_eq!(confidence_interval(&[5.0]), (5.0, 5.0));
        assert_eq!(confidence_interval(&[]), (0.0, 0.0));
    }

    #[test]
    fn wilcoxon_detects_consistent_shift() {
        let diffs: Vec<f64> = (1..=20).map(|d| d as f64).collect();
        let (p, n) = wilcoxon_signed_rank(diffs);
        assert_eq!(n, 20);
        assert!(p < 0.001, "p = {p}");
    }

    #[test]
    fn wilcoxon_ignores_zero_differences() {
        assert_eq!(wilcoxon_signed_rank(vec![0.0, 0.0]), (1.0, 0));
        let (p, n) = wilcoxon_signed_rank(vec![1.0, -1.0, 2.0, -2.0, 0.0]);
        assert_eq!(n, 4);
        assert!(p > 0.5, "p = {p}");
    }

    #[test]
    fn summary_reports_delta_against_baseline() {
        let mut collector = AnalyticsCollector::new(&config()).unwrap();
        for (idx, total) in [30.0, 31.0, 32.0].into_iter().enumerate() {
            collector.record_episode("base", &outcome(idx, total)).unwrap();
            collector
                .record_episode("better", &outcome(idx, total + 6.0))
                .unwrap();
        }
        let summary = collector.finalize().unwrap();
        assert_eq!(summary.agents[0].mean_total, 31.0);
        assert_eq!(summary.agents[0].delta_vs_baseline, 0.0);
        assert_eq!(summary.agents[1].delta_vs_baseline, 6.0);
        assert_eq!(summary.comparisons[1].sample_size, 3);
        assert!(summary.p_value("better") < 1.0);
        assert_eq!(summary.p_value("base"), 1.0);
    }

    #[test]
    fn unknown_agents_are_rejected() {
        let mut collector = AnalyticsCollector::new(&config()).unwrap();
        assert!(matches!(
            collector.record_episode("ghost", &outcome(0, 1.0)),
            Err(AnalyticsError::UnknownAgent(_))
        ));
    }

    #[test]
    fn distribution_plot_lands_in_plots_dir() {
        let dir = tempfile::tempdir().unwrap();
        let plots = dir.path().join("plots");
        // Font support varies by host; a failure must be reported, not panic.
        match render_distribution(&[4; 13], &plots) {
            Ok(path) => {
                assert_eq!(path, plots.join("deck_distribution.png"));
                assert!(path.exists());
            }
            Err(err) => assert!(matches!(err, AnalyticsError::Plot(_))),
        }
        assert!(plots.is_dir());
    }

    #[test]
    fn markdown_lists_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut collector = AnalyticsCollector::new(&config()).unwrap();
        collector.record_episode("base", &outcome(0, 30.0)).unwrap();
        collector
            .record_failure("better", "subprocess exited")
            .unwrap();
        let summary = collector.finalize().unwrap();
        let path = dir.path().join("summary.md");
        summary.write_markdown(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("| Avg ms/step | p-value |\n"));
        assert!(text.contains("| base | random | 1 |"));
        assert!(text.contains("## Failed agents"));
        assert!(text.contains("`better` after 0 episodes: subprocess exited"));
    }
}
