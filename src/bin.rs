//! Binary entry point for `duty-desk`.
//!
//! Runs one desk: a socket-mode Slack connection, the question store and the
//! inactivity escalation loop, with spans exported over OTLP.

use clap::Parser;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt};
use duty_desk::base::{config::Config, types::Void};

/// Duty-desk: hands employee questions from direct messages to the duties
/// watching a support channel.
///
/// Each question gets its own topic thread in `support_channel_id`. Duties
/// claim by replying there and use `!close`, `!release` and `!reopen`;
/// employees write to the bot directly and use `!close`, `!cancel` and
/// `!reopenable`.
///
/// Every key in the config file can be overridden with a `DUTY_DESK_`
/// variable, e.g. `DUTY_DESK_SLACK_BOT_TOKEN`, `DUTY_DESK_INACTIVITY_TIMEOUT_SECONDS`
/// or `DUTY_DESK_REOPEN_WINDOW_HOURS`.
#[derive(Parser, Debug)]
#[command(version, author, about, long_about = None)]
struct Args {
    /// Override the config file path (optional).
    ///
    /// Defaults to `.hidden/config.toml`. The Slack tokens and the support
    /// channel must be set here or in the environment.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
    /// Increase log verbosity (-v, -vv, etc.).
    ///
    /// Use multiple times to increase verbosity:
    /// - No flag: INFO level
    /// - -v: DEBUG level
    /// - -vv or more: TRACE level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Starts the desk and runs until the Slack listener stops.
///
/// Questions left in progress by a previous run get no inactivity timer until
/// someone writes in them again.
#[tokio::main]
async fn main() -> Void {
    let args = Args::parse();

    // Construct the level filter.

    let level = match args.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    let level_filter = tracing_subscriber::filter::LevelFilter::from_level(level);

    // Prepare the log layer.

    let stdout = tracing_subscriber::fmt::layer()
        .without_time()
        .with_ansi(true)
        .with_level(true)
        .with_file(false)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    // Prepare the otlp layer.

    let exporter = opentelemetry_otlp::SpanExporter::builder().with_http().with_protocol(Protocol::HttpBinary).build()?;
    let tracer = opentelemetry_sdk::trace::SdkTracerProvider::builder().with_simple_exporter(exporter).build().tracer("duty-desk");
    let otel = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry().with(otel).with(level_filter).with(stdout).init();

    let config = Config::load(args.config.as_deref())?;

    duty_desk::start(config).await
}
