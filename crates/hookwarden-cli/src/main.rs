use clap::Parser;
use hookwarden_cli::{init_logging, run, Cli};
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let mut stdout = std::io::stdout();
    if let Err(e) = run(cli, &mut stdout).await {
        error!(error = %e, "Command failed");
        eprintln!("error: {}", e);
        std::process::exit(e.exit_code());
    }
}
