use servicebus_demo_cli::run_cli;
use tracing::error;

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        error!(error = %e, exit_code = e.exit_code(), "servicebus-demo failed");
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}
