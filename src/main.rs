use clap::Parser;
use ferry::{Config, Sender, Server};
use std::path::PathBuf;
use std::process;
use tracing::error;

#[derive(Parser)]
#[command(name = "ferry")]
#[command(about = "Concurrent UDP file transfer tool")]
struct Cli {
    /// Run in client (sender) mode; this is the default
    #[arg(short = 'c', long, conflicts_with = "server")]
    client: bool,

    /// Run in server (receiver) mode
    #[arg(short = 's', long)]
    server: bool,

    /// Server IPv4 address
    #[arg(short = 'a', long)]
    address: Option<String>,

    /// UDP port
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// File to send (client mode; the server takes names from the wire)
    #[arg(short = 'f', long)]
    file: Option<PathBuf>,

    /// Configuration file path
    #[arg(long, default_value = "ferry.toml")]
    config: PathBuf,
}

fn main() {
    // Initialize tracing with info level by default, but allow RUST_LOG env var to override
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .init();

    let cli = Cli::parse();

    let mut config = match Config::load_or_create(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            process::exit(-1);
        }
    };
    if let Some(address) = cli.address {
        config.server.address = address.clone();
        config.client.server_address = address;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
        config.client.server_port = port;
    }

    if cli.server {
        let mut server = match Server::new(&config.server) {
            Ok(server) => server,
            Err(e) => {
                error!(error = %e, "failed to initialize server");
                process::exit(-1);
            }
        };
        if let Err(e) = server.run() {
            error!(error = %e, "server failed");
            process::exit(-1);
        }
    } else {
        let file = match cli.file {
            Some(file) => file,
            None => {
                eprintln!("Error: client mode requires a file to send (-f <path>)");
                process::exit(-1);
            }
        };
        let mut sender = match Sender::new(&file, &config.client) {
            Ok(sender) => sender,
            Err(e) => {
                error!(error = %e, "failed to initialize client");
                process::exit(-1);
            }
        };
        if let Err(e) = sender.run() {
            error!(error = %e, "transfer failed");
            process::exit(-1);
        }
    }
}
