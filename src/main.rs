//! Command-line front end: aggregate the statistics for one account and print
//! the payload as JSON. The same payload the site's metrics endpoint serves.

use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, ValueEnum};
use gh_metrics::Result;
use gh_metrics::metrics::aggregator::MetricsService;
use ohno::IntoAppError;

const CLAP_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    /// No logging output
    None,
    /// Only error messages
    Error,
    /// Warning and error messages
    Warn,
    /// Info, warning, and error messages
    Info,
    /// Debug and above messages
    Debug,
    /// All messages including trace
    Trace,
}

#[derive(Parser, Debug)]
#[command(name = "gh-metrics", version, about)]
#[command(styles = CLAP_STYLES)]
struct Args {
    /// Account to aggregate statistics for
    #[arg(value_name = "USERNAME", env = "GH_METRICS_USER")]
    username: String,

    /// Bypass the cached payload and aggregate afresh
    #[arg(long)]
    refresh: bool,

    /// GitHub personal access token; enables the contribution calendar and PR count
    #[arg(long, value_name = "TOKEN", env = "GITHUB_TOKEN")]
    token: Option<String>,

    /// Set the logging level for diagnostic output
    #[arg(long, value_name = "LEVEL", default_value = "none")]
    log_level: LogLevel,
}

/// Initialize logger based on log level
fn init_logging(log_level: LogLevel) {
    if log_level == LogLevel::None {
        return;
    }

    let level = match log_level {
        LogLevel::None => return, // Already checked above, but being explicit
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let env = env_logger::Env::default().filter_or("RUST_LOG", level);

    env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(matches!(log_level, LogLevel::Debug) || matches!(log_level, LogLevel::Trace))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level);

    let service = MetricsService::new(args.token.as_deref())?;
    let payload = service
        .get_metrics(&args.username, args.refresh)
        .await
        .into_app_err_with(|| format!("unable to aggregate metrics for '{}'", args.username))?;

    let json = serde_json::to_string_pretty(payload.as_ref()).into_app_err("unable to serialize payload")?;
    println!("{json}");

    Ok(())
}
