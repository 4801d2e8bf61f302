use anyhow::Result;
use colored::Colorize;
use logspan::config::{self, TelemetryConfig};
use logspan::init_tracing;
use tracing::info;

/// Execute the config show command
///
/// Displays the current configuration with secrets masked
pub fn show() -> Result<()> {
    init_tracing("info", "pretty");
    println!("{}", "Loading configuration...".yellow());
    info!("Loading configuration for display");

    let cfg = config::load_config()?;
    let sanitized = sanitize_secrets(&cfg);

    println!("{}", "Current Configuration:".green().bold());
    println!();

    let toml_string = toml::to_string_pretty(&sanitized)?;
    println!("{}", toml_string);

    info!("Configuration displayed successfully");
    Ok(())
}

/// Execute the config validate command
///
/// Loads configuration from file and environment and validates it
pub fn validate() -> Result<()> {
    init_tracing("info", "pretty");
    println!("{}", "Validating configuration...".yellow());
    info!("Validating configuration");

    let cfg = config::load_config()?;

    println!("{}", "✓ Configuration is valid".green());
    println!();
    println!("{}", "Summary:".bold());
    println!("  Service: {} (job {})", cfg.service_name, cfg.job_name);
    println!("  Enabled subsystems: {}", enabled_subsystems(&cfg).join(", "));
    println!(
        "  Export queue: capacity {}, policy {:?}",
        cfg.export_queue_capacity, cfg.export_backpressure
    );

    info!("Configuration validation successful");
    Ok(())
}

/// Mask secrets in configuration for safe display
fn sanitize_secrets(cfg: &TelemetryConfig) -> TelemetryConfig {
    let mut sanitized = cfg.clone();
    sanitized.sentry_dsn = mask_secret(&cfg.sentry_dsn);
    sanitized
}

/// Mask a secret for safe display
///
/// Shows first 7 and last 4 characters with an ellipsis in between
/// Example: "https://abcdef0123@o1.ingest.sentry.io/42" -> "https:/...o/42"
fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        return String::new();
    }

    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 11 {
        return "***".to_string();
    }

    let prefix: String = chars[..7].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();

    format!("{}...{}", prefix, suffix)
}

fn enabled_subsystems(cfg: &TelemetryConfig) -> Vec<&'static str> {
    let mut enabled = Vec::new();
    if cfg.enable_tracing {
        enabled.push("tracing");
    }
    if cfg.enable_metrics {
        enabled.push("metrics");
    }
    if cfg.enable_sentry {
        enabled.push("sentry");
    }
    if cfg.enable_loki {
        enabled.push("loki");
    }
    if enabled.is_empty() {
        enabled.push("none");
    }
    enabled
}
