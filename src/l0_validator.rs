//! L0 validator (§4.10): one-shot pre-flight check with retry. Runs before
//! the orchestrator enters its main loop.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, FailMode};
use crate::runtime::ContainerRuntime;

#[derive(Debug)]
pub struct ValidationOutcome {
    pub ok: bool,
    pub errors: Vec<String>,
}

async fn run_checks(runtime: &Arc<dyn ContainerRuntime>, config: &Config) -> Vec<String> {
    let mut errors = Vec::new();

    if let Err(e) = runtime.ping().await {
        errors.push(format!("runtime unreachable: {e}"));
        // further checks are meaningless without a reachable runtime
        return errors;
    }

    match runtime
        .network_has_subnet(&config.network.name, &config.network.subnet)
        .await
    {
        Ok(true) => {}
        Ok(false) => errors.push(format!(
            "project network {} missing or has unexpected subnet (expected {})",
            config.network.name, config.network.subnet
        )),
        Err(e) => errors.push(format!("failed to check project network: {e}")),
    }

    match runtime.container_running_by_name("proxy").await {
        Ok(true) => {}
        Ok(false) => errors.push("proxy container is not running".to_string()),
        Err(e) => errors.push(format!("failed to check proxy container: {e}")),
    }

    match runtime.image_exists(&config.session_template_image).await {
        Ok(true) => {}
        Ok(false) => errors.push(format!(
            "session template image {} does not exist",
            config.session_template_image
        )),
        Err(e) => errors.push(format!("failed to check session template image: {e}")),
    }

    errors
}

/// Runs the checks with a bounded retry loop (fixed delay between
/// attempts), returning the outcome of the final attempt.
pub async fn validate(runtime: &Arc<dyn ContainerRuntime>, config: &Config) -> ValidationOutcome {
    let mut last_errors = Vec::new();

    for attempt in 1..=config.l0.retries {
        let errors = run_checks(runtime, config).await;
        if errors.is_empty() {
            return ValidationOutcome { ok: true, errors: Vec::new() };
        }
        last_errors = errors;
        log::warn!(
            "L0 validation attempt {}/{} failed: {:?}",
            attempt,
            config.l0.retries,
            last_errors
        );
        if attempt < config.l0.retries {
            tokio::time::sleep(Duration::from_millis(config.l0.retry_delay_ms)).await;
        }
    }

    ValidationOutcome { ok: false, errors: last_errors }
}

/// Applies the fail-mode policy to a validation outcome. Returns `true` if
/// the caller should proceed into the main loop.
pub fn should_proceed(outcome: &ValidationOutcome, config: &Config) -> bool {
    if outcome.ok {
        return true;
    }
    match config.l0.fail_mode {
        FailMode::Open => {
            log::error!("L0 validation failed but fail_mode=open; continuing: {:?}", outcome.errors);
            true
        }
        FailMode::Closed => {
            log::error!("L0 validation failed and fail_mode=closed; refusing to start: {:?}", outcome.errors);
            false
        }
    }
}
