use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sparql_agent::config::Config;
use sparql_agent::utils::StringExt;
use sparql_agent::AppContext;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // .env is optional; real deployments use environment variables
    let _ = dotenvy::dotenv();

    let (config, cli_args) = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    // keep the appender guard alive for the lifetime of the process
    let _file_guard;
    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("quasar.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        _file_guard = guard;
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Quasar starting up");

    // blank CLI input is treated the same as absent input
    let endpoint_url = cli_args.endpoint.as_ref().and_then(|url| url.clean());
    let question = cli_args.question.as_ref().and_then(|q| q.clean());
    let (Some(endpoint_url), Some(question)) = (endpoint_url, question) else {
        eprintln!("Usage: quasar --endpoint <URL> --question <TEXT> [--timeout 90s] [--strict true]");
        std::process::exit(2);
    };

    let context = AppContext::from_config(config);
    let endpoint = context.endpoint_for(&endpoint_url)?;

    let health = context.pinger.ping_one(&endpoint.url, true).await;
    tracing::info!(
        "Endpoint {} is {} ({}ms)",
        endpoint.url,
        health.status.as_str(),
        health
            .response_time_ms
            .map(|ms| format!("{:.0}", ms))
            .unwrap_or_else(|| "-".to_string())
    );

    let options = context.orchestrator_options();
    let outcome = context.orchestrator.run(&question, &endpoint, &options).await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if outcome.metadata.gave_up {
        std::process::exit(1);
    }
    Ok(())
}
