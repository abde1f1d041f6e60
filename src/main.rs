use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use lightnode_launcher_lib::console::{self, PtySpawner};
use lightnode_launcher_lib::deploy::ChannelProgress;
use lightnode_launcher_lib::paths::{ensure_data_dirs, ConsoleLayout};
use lightnode_launcher_lib::{
    deploy_node, load_config, node_status, start_node, stop_node, Collaborators,
    DeploymentContext, Result,
};

#[derive(Parser)]
#[command(name = "lightnode-launcher", version, about = "FISCO BCOS 轻节点一键部署工具")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Issue certificates, build and start a light node, then set up the console.
    Deploy {
        /// Overrides `api_base_url` from the config file.
        #[arg(long)]
        api_url: Option<String>,
        /// Overrides `node_dir` from the config file. Must be empty.
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Use a fixed node id instead of a random one.
        #[arg(long)]
        node_id: Option<String>,
    },
    /// Run the deployed node's start.sh.
    Start,
    /// Run the deployed node's stop.sh.
    Stop,
    /// Print the node status as JSON.
    Status,
    /// Serve the interactive console over WebSocket.
    Console {
        /// Overrides `console_listen` from the config file.
        #[arg(long)]
        listen: Option<String>,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn deploy(
    api_url: Option<String>,
    output_dir: Option<PathBuf>,
    node_id: Option<String>,
) -> Result<bool> {
    let config = load_config()?;
    let api_url = api_url.unwrap_or_else(|| config.api_base_url.clone());
    let output_dir = match output_dir {
        Some(dir) => dir,
        None => config.node_dir()?,
    };

    let mut ctx = DeploymentContext::new(api_url, output_dir)?
        .with_build_options(config.build_options());
    if let Some(id) = node_id {
        ctx = ctx.with_node_id(id);
    }
    println!("[INFO] 收到部署请求，目标目录: {}", ctx.output_dir.display());

    let collaborators = Collaborators::http(&config, &ctx)?;
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let printer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            println!("[DEPLOY] {}", line);
        }
    });

    let result = deploy_node(&ctx, collaborators, Arc::new(ChannelProgress::new(tx))).await;
    // The progress sender is dropped with the coordinator, ending the printer.
    let _ = printer.await;

    let result = result?;
    if result.success() {
        println!("[SUCCESS] {}", result.message());
    } else {
        println!("[RESULT] {}", result.message());
    }
    Ok(result.success())
}

async fn run(cli: Cli) -> Result<bool> {
    ensure_data_dirs()?;
    let config = load_config()?;

    match cli.command {
        Command::Deploy {
            api_url,
            output_dir,
            node_id,
        } => deploy(api_url, output_dir, node_id).await,
        Command::Start => {
            println!("{}", start_node(&config.node_dir()?).await?);
            Ok(true)
        }
        Command::Stop => {
            println!("{}", stop_node(&config.node_dir()?).await?);
            Ok(true)
        }
        Command::Status => {
            let status = node_status()?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(true)
        }
        Command::Console { listen } => {
            let listen = listen.unwrap_or_else(|| config.console_listen.clone());
            let layout = ConsoleLayout::new(config.console_dir()?);
            let spawner = Arc::new(PtySpawner::new(layout.start_script()));
            console::serve(&listen, spawner).await?;
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => std::process::ExitCode::SUCCESS,
        Ok(false) => std::process::ExitCode::FAILURE,
        Err(e) => {
            eprintln!("[ERROR] {}", e);
            log::error!("{:?}", e);
            std::process::ExitCode::FAILURE
        }
    }
}
