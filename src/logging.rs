//! # Structured Logging Module
//!
//! Environment-aware structured logging for the worker and embedding processes.
//! Production emits JSON lines; other environments get human-readable output.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

use crate::models::{Channel, FailureType, HealingActionKind};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));

        let layer = if environment == "production" {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .boxed()
        };

        // A subscriber installed by an embedding process wins
        if tracing_subscriber::registry()
            .with(layer.with_filter(filter))
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            "Structured logging initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var("OUTREACH_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Canonical record for one applied healing action
pub fn log_healing_operation(
    enrollment_id: Uuid,
    tenant_id: Uuid,
    failure_type: &FailureType,
    action: HealingActionKind,
    channel: Option<Channel>,
    step_order: i32,
    reason: &str,
) {
    tracing::info!(
        enrollment_id = %enrollment_id,
        tenant_id = %tenant_id,
        failure_type = %failure_type,
        action = %action,
        channel = channel.map(|c| c.as_str()),
        step_order = step_order,
        reason = %reason,
        timestamp = %Utc::now().to_rfc3339(),
        "HEALING_OPERATION"
    );
}
