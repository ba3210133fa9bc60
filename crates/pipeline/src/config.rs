use std::path::PathBuf;
use std::time::Duration;

use framewatch_core::channel::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_ENQUEUE_TIMEOUT};

/// Supervisor and relay tuning loaded from environment variables.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Worker executable (default: `framewatch-worker`, resolved via `PATH`).
    pub worker_bin: PathBuf,
    /// Extra arguments passed to the worker executable (default: none).
    pub worker_args: Vec<String>,
    /// Root directory for per-job output directories (default: `results`).
    pub results_dir: PathBuf,
    /// Interval between liveness checks of one worker (default: 1s).
    pub poll_interval: Duration,
    /// Time a worker gets to exit after SIGTERM before it is killed (default: 3s).
    pub stop_grace: Duration,
    /// Capacity of each job's frame channel (default: 30).
    pub channel_capacity: usize,
    /// Producer wait before a frame is dropped (default: 100ms).
    pub enqueue_timeout: Duration,
    /// Relay wait per dequeue attempt (default: 100ms).
    pub relay_dequeue_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            worker_bin: PathBuf::from("framewatch-worker"),
            worker_args: Vec::new(),
            results_dir: PathBuf::from("results"),
            poll_interval: Duration::from_secs(1),
            stop_grace: Duration::from_secs(3),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
            relay_dequeue_timeout: Duration::from_millis(100),
        }
    }
}

impl SupervisorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default             |
    /// |----------------------------|---------------------|
    /// | `WORKER_BIN`               | `framewatch-worker` |
    /// | `WORKER_ARGS`              | (none)              |
    /// | `RESULTS_DIR`              | `results`           |
    /// | `POLL_INTERVAL_MS`         | `1000`              |
    /// | `STOP_GRACE_MS`            | `3000`              |
    /// | `CHANNEL_CAPACITY`         | `30`                |
    /// | `ENQUEUE_TIMEOUT_MS`       | `100`               |
    /// | `RELAY_DEQUEUE_TIMEOUT_MS` | `100`               |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let worker_bin = std::env::var("WORKER_BIN")
            .map(PathBuf::from)
            .unwrap_or(defaults.worker_bin);

        let worker_args = std::env::var("WORKER_ARGS")
            .map(|raw| raw.split_whitespace().map(String::from).collect())
            .unwrap_or_default();

        let results_dir = std::env::var("RESULTS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.results_dir);

        let channel_capacity: usize = std::env::var("CHANNEL_CAPACITY")
            .unwrap_or_else(|_| DEFAULT_CHANNEL_CAPACITY.to_string())
            .parse()
            .expect("CHANNEL_CAPACITY must be a valid usize");
        assert!(channel_capacity > 0, "CHANNEL_CAPACITY must be positive");

        Self {
            worker_bin,
            worker_args,
            results_dir,
            poll_interval: millis_var("POLL_INTERVAL_MS", defaults.poll_interval),
            stop_grace: millis_var("STOP_GRACE_MS", defaults.stop_grace),
            channel_capacity,
            enqueue_timeout: millis_var("ENQUEUE_TIMEOUT_MS", defaults.enqueue_timeout),
            relay_dequeue_timeout: millis_var(
                "RELAY_DEQUEUE_TIMEOUT_MS",
                defaults.relay_dequeue_timeout,
            ),
        }
    }
}

fn millis_var(name: &str, default: Duration) -> Duration {
    match std::env::var(name) {
        Ok(raw) => {
            let ms: u64 = raw
                .parse()
                .unwrap_or_else(|_| panic!("{name} must be a valid u64"));
            Duration::from_millis(ms)
        }
        Err(_) => default,
    }
}
