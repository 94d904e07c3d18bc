use anyhow::Result;
use clap::Parser;
use gpu_dra_plugin::app::run_print_state;
use gpu_dra_plugin::app::Application;
use gpu_dra_plugin::config::Cli;
use gpu_dra_plugin::config::Commands;
use gpu_dra_plugin::config::DaemonArgs;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    let _guard = utils::logging::init(cli.log_path.as_ref());

    match cli.command {
        Commands::Daemon(daemon_args) => run_daemon(*daemon_args).await,
        Commands::PrintState(args) => run_print_state(args).await,
    }
}

async fn run_daemon(daemon_args: DaemonArgs) -> Result<()> {
    tracing::info!("Starting gpu-dra-plugin daemon {}", &**version::VERSION);

    let app = Application::build(daemon_args).await?;
    app.run().await?;

    tracing::info!("gpu-dra-plugin daemon stopped");
    Ok(())
}
