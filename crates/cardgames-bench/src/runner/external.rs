use std::io::Write;
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use cardgames_bot::{Policy, PolicyError};
use cardgames_core::GameSimulator;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{Level, event};

use super::{ExternalFallback, ExternalOptions};

const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Delegates every guess to a subprocess speaking one JSON object per line.
pub struct ExternalPolicy {
    name: String,
    options: ExternalOptions,
    fallback: Option<Box<dyn Policy>>,
}

impl ExternalPolicy {
    pub fn new(name: String, options: ExternalOptions) -> Self {
        let fallback = match options.fallback {
            ExternalFallback::Baseline(kind) => Some(kind.spawn()),
            ExternalFallback::Error => None,
        };
        if options.command.is_none() {
            event!(
                target: "cardgames_bench::external",
                Level::WARN,
                agent = %name,
                "no external command configured; using fallback policy"
            );
        }
        Self {
            name,
            options,
            fallback,
        }
    }

    fn invoke(&self, request: &GuessRequest) -> Result<GuessResponse, ExternalInvokeError> {
        let command = match &self.options.command {
            Some(cmd) if !cmd.is_empty() => cmd,
            _ => return Err(ExternalInvokeError::NoCommand),
        };

        let mut cmd = Command::new(command);
        if !self.options.args.is_empty() {
            cmd.args(&self.options.args);
        }
        if let Some(dir) = &self.options.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|err| ExternalInvokeError::Spawn(err.to_string()))?;
        if let Err(err) = send_request(&mut child, request) {
            reap(&mut child);
            return Err(err);
        }

        let output = match self.options.timeout_ms {
            Some(timeout_ms) => wait_with_deadline(child, Duration::from_millis(timeout_ms))?,
            None => child
                .wait_with_output()
                .map_err(|err| ExternalInvokeError::Io(err.to_string()))?,
        };

        if !output.status.success() {
            return Err(ExternalInvokeError::Status(format!(
                "exit status {}",
                output.status
            )));
        }

        event!(
            target: "cardgames_bench::external",
            Level::TRACE,
            agent = %self.name,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "external guess received"
        );

        serde_json::from_slice(&output.stdout)
            .map_err(|err| ExternalInvokeError::Protocol(err.to_string()))
    }

    fn fallback_action(
        &mut self,
        sim: &mut GameSimulator,
        reason: String,
    ) -> Result<usize, PolicyError> {
        match self.fallback.as_mut() {
            Some(policy) => {
                event!(
                    target: "cardgames_bench::external",
                    Level::WARN,
                    agent = %self.name,
                    fallback = policy.name(),
                    reason = %reason,
                    "external guess unavailable; falling back"
                );
                policy.choose_action(sim)
            }
            None => Err(PolicyError::Agent {
                agent: self.name.clone(),
                message: reason,
            }),
        }
    }
}

impl Policy for ExternalPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn choose_action(&mut self, sim: &mut GameSimulator) -> Result<usize, PolicyError> {
        let request = GuessRequest::from_simulator(sim);
        match self.invoke(&request) {
            Ok(response) if response.action < request.action_space_size => Ok(response.action),
            Ok(response) => self.fallback_action(
                sim,
                format!(
                    "action {} outside [0, {})",
                    response.action, request.action_space_size
                ),
            ),
            Err(err) => self.fallback_action(sim, err.to_string()),
        }
    }
}

/// Writes the request line and closes stdin so the child sees EOF.
fn send_request(child: &mut Child, request: &GuessRequest) -> Result<(), ExternalInvokeError> {
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| ExternalInvokeError::Io("stdin".into()))?;
    serde_json::to_writer(&mut stdin, request)
        .map_err(|err| ExternalInvokeError::Protocol(err.to_string()))?;
    stdin
        .write_all(b"\n")
        .map_err(|err| ExternalInvokeError::Io(err.to_string()))
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Polls the child until it exits, killing it once `timeout` elapses.
fn wait_with_deadline(mut child: Child, timeout: Duration) -> Result<Output, ExternalInvokeError> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) if Instant::now() >= deadline => {
                reap(&mut child);
                return Err(ExternalInvokeError::Timeout(timeout.as_millis() as u64));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(err) => return Err(ExternalInvokeError::Io(err.to_string())),
        }
    }
    child
        .wait_with_output()
        .map_err(|err| ExternalInvokeError::Io(err.to_string()))
}

#[derive(Debug, Error)]
enum ExternalInvokeError {
    #[error("no command configured")]
    NoCommand,
    #[error("failed to spawn process: {0}")]
    Spawn(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("non-zero exit status: {0}")]
    Status(String),
    #[error("no answer within {0} ms")]
    Timeout(u64),
}

/// Snapshot of the game handed to the subprocess before each deal.
#[derive(Debug, Serialize)]
struct GuessRequest {
    action_space_size: usize,
    cards_remaining: usize,
    last_observation: Option<usize>,
    remaining_distribution: Vec<usize>,
    expected_observation: Option<f64>,
    mean_observation: f64,
}

impl GuessRequest {
    fn from_simulator(sim: &GameSimulator) -> Self {
        let env = sim.env();
        Self {
            action_space_size: sim.n_actions(),
            cards_remaining: env.deck().n_cards(),
            last_observation: env
                .last_card()
                .map(|card| env.rank_scores().score(card.rank)),
            remaining_distribution: sim.remaining_counts(),
            expected_observation: sim.expected_observation(),
            mean_observation: sim.mean_observation(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GuessResponse {
    action: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardgames_bot::{BaselineKind, run_episode};
    use cardgames_core::{EnvConfig, RankScores};

    fn simulator() -> GameSimulator {
        GameSimulator::new(EnvConfig::new(1, RankScores::simple())).unwrap()
    }

    fn options(command: Option<&str>, args: &[&str], fallback: ExternalFallback) -> ExternalOptions {
        ExternalOptions {
            command: command.map(str::to_string),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            working_dir: None,
            timeout_ms: None,
            fallback,
        }
    }

    #[test]
    fn request_describes_remaining_deck() {
        let mut sim = simulator();
        sim.env_mut().reset(Some(3));
        sim.env_mut().step(0).unwrap();
        let request = GuessRequest::from_simulator(&sim);
        assert_eq!(request.action_space_size, 13);
        assert_eq!(request.cards_remaining, 51);
        assert!(request.last_observation.is_some());
        assert_eq!(request.remaining_distribution.iter().sum::<usize>(), 51);
        assert_eq!(request.mean_observation, 6.0);

        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("remaining_distribution").is_some());
    }

    #[test]
    fn fallback_invoked_when_command_missing() {
        let opts = options(
            Some("__cardgames_bench_missing__"),
            &[],
            ExternalFallback::Baseline(BaselineKind::MeanObservation),
        );
        let mut policy = ExternalPolicy::new("remote".into(), opts);
        let mut sim = simulator();
        let rewards = run_episode(&mut sim, &mut policy, Some(0)).unwrap();
        let total: f64 = rewards.iter().sum();
        assert!((total - 38.0).abs() < 1e-9);
    }

    #[test]
    fn error_fallback_surfaces_agent_failure() {
        let opts = options(None, &[], ExternalFallback::Error);
        let mut policy = ExternalPolicy::new("remote".into(), opts);
        let mut sim = simulator();
        let err = run_episode(&mut sim, &mut policy, Some(0)).unwrap_err();
        assert!(matches!(err, PolicyError::Agent { agent, .. } if agent == "remote"));
    }

    #[cfg(unix)]
    #[test]
    fn subprocess_answer_is_used() {
        let opts = options(
            Some("sh"),
            &["-c", "cat > /dev/null; echo '{\"action\": 12}'"],
            ExternalFallback::Error,
        );
        let mut policy = ExternalPolicy::new("shell".into(), opts);
        let mut sim = simulator();
        sim.env_mut().reset(Some(1));
        assert_eq!(policy.choose_action(&mut sim).unwrap(), 12);
    }

    #[cfg(unix)]
    #[test]
    fn out_of_range_answer_falls_back() {
        let opts = options(
            Some("sh"),
            &["-c", "cat > /dev/null; echo '{\"action\": 99}'"],
            ExternalFallback::Baseline(BaselineKind::Constant(4)),
        );
        let mut policy = ExternalPolicy::new("shell".into(), opts);
        let mut sim = simulator();
        sim.env_mut().reset(Some(1));
        assert_eq!(policy.choose_action(&mut sim).unwrap(), 4);
    }

    #[cfg(unix)]
    #[test]
    fn unwritable_child_is_reaped() {
        let mut child = Command::new("sh")
            .args(["-c", "sleep 5"])
            .stdin(Stdio::null())
            .spawn()
            .unwrap();
        let mut sim = simulator();
        sim.env_mut().reset(Some(1));
        let request = GuessRequest::from_simulator(&sim);

        let err = send_request(&mut child, &request).unwrap_err();
        assert!(matches!(err, ExternalInvokeError::Io(_)));
        reap(&mut child);
        assert!(child.try_wait().unwrap().is_some());
    }

    #[cfg(unix)]
    #[test]
    fn slow_subprocess_is_killed() {
        let mut opts = options(
            Some("sh"),
            &["-c", "sleep 5; echo '{\"action\": 1}'"],
            ExternalFallback::Error,
        );
        opts.timeout_ms = Some(50);
        let mut policy = ExternalPolicy::new("sleepy".into(), opts);
        let mut sim = simulator();
        sim.env_mut().reset(Some(1));
        let start = Instant::now();
        let err = policy.choose_action(&mut sim).unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(4));
        assert!(matches!(err, PolicyError::Agent { message, .. } if message.contains("50 ms")));
    }
}
