pub use anyboost_boost as boost;
pub use anyboost_core as core;
pub use anyboost_detect as detect;
pub use anyboost_io as io;

use rayon::ThreadPoolBuilder;
use std::env;
use std::sync::OnceLock;

static POOL: OnceLock<Result<(), String>> = OnceLock::new();

/// Size the global rayon pool backing the parallel feature scans
/// (response-cache construction and per-feature selection sweeps).
///
/// The first call wins; later calls return the first outcome. An explicit
/// `workers` argument overrides the `ANYBOOST_CPU_THREADS` environment
/// variable; with neither given, rayon chooses its own default.
pub fn init_thread_pool(workers: Option<usize>) -> Result<(), String> {
    POOL.get_or_init(|| build_pool(workers)).clone()
}

fn build_pool(workers: Option<usize>) -> Result<(), String> {
    let workers = match workers {
        Some(n) if n == 0 => return Err("worker count must be >= 1".into()),
        Some(n) => Some(n),
        None => workers_from_env()?,
    };

    // rayon reads zero as "pick the default".
    ThreadPoolBuilder::new()
        .num_threads(workers.unwrap_or(0))
        .build_global()
        .map_err(|e| e.to_string())
}

fn workers_from_env() -> Result<Option<usize>, String> {
    let Ok(raw) = env::var("ANYBOOST_CPU_THREADS") else {
        return Ok(None);
    };

    match raw.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(Some(n)),
        _ => Err(format!(
            "ANYBOOST_CPU_THREADS must be a positive worker count, got '{raw}'"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_pool_init_is_idempotent() {
        let first = init_thread_pool(Some(2));
        assert!(first.is_ok());

        // A second call with a different request reports the first outcome
        // rather than rebuilding the pool.
        assert_eq!(init_thread_pool(Some(4)), first);
    }

    #[test]
    fn env_worker_counts_are_validated() {
        env::set_var("ANYBOOST_CPU_THREADS", "3");
        assert_eq!(workers_from_env(), Ok(Some(3)));

        env::set_var("ANYBOOST_CPU_THREADS", "0");
        assert!(workers_from_env().is_err());

        env::set_var("ANYBOOST_CPU_THREADS", "many");
        assert!(workers_from_env().is_err());

        env::remove_var("ANYBOOST_CPU_THREADS");
        assert_eq!(workers_from_env(), Ok(None));
    }
}
