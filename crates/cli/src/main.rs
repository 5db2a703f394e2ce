use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "linebridge")]
#[command(about = "WebSocket bridge for line-based game servers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: LINEBRIDGE_CONFIG_PATH or ~/.linebridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the bridge: accept WebSocket connections on /ws and relay each one to the backend.
    Serve {
        /// Config file path (default: LINEBRIDGE_CONFIG_PATH or ~/.linebridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Listening port (default: PORT, then config, then 8080)
        #[arg(long, short)]
        port: Option<u16>,

        /// Bind address (default from config or 0.0.0.0)
        #[arg(long)]
        bind: Option<String>,

        /// Backend host:port (default: LINEBRIDGE_BACKEND, then config, then freechess.org:5000)
        #[arg(long, short, value_name = "HOST:PORT")]
        backend: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("linebridge {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve {
            config,
            port,
            bind,
            backend,
        }) => {
            if let Err(e) = run_serve(config, port, bind, backend).await {
                log::error!("serve failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(bridge::config::default_config_path);
    let dir = bridge::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
    bind: Option<String>,
    backend: Option<String>,
) -> anyhow::Result<()> {
    let (mut config, path) = bridge::config::load_config(config_path)?;
    log::debug!("using config {}", path.display());
    bridge::config::apply_env(&mut config)?;
    if let Some(p) = port {
        config.bridge.port = p;
    }
    if let Some(b) = bind {
        config.bridge.bind = b;
    }
    if let Some(b) = backend {
        config.bridge.backend = b;
    }
    bridge::gateway::run_gateway(config).await
}
