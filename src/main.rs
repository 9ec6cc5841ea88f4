use clap::{Parser, Subcommand};
use pppd::config;
use pppd::event::Action;
use pppd::link::Link;
use pppd::protocol::ppp::protocol_name;
use pppd::telemetry::{init_logging, LinkStats};
use pppd::ExitStatus;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, warn};

/// Largest datagram we read; one PPP frame per datagram
const MAX_DATAGRAM: usize = 65536;

#[derive(Parser)]
#[command(name = "pppd")]
#[command(about = "PPP link negotiation daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run a PPP link carried in UDP datagrams
    Run {
        /// Path to the configuration file
        #[arg(short, long, default_value = "pppd.toml")]
        config: PathBuf,

        /// Local address to bind
        #[arg(long)]
        bind: SocketAddr,

        /// Address of the peer
        #[arg(long)]
        peer: SocketAddr,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Check the configuration for errors
    Validate {
        #[arg(short, long, default_value = "pppd.toml")]
        config: PathBuf,
    },
    /// Print the configuration with all defaults filled in
    Show {
        #[arg(short, long, default_value = "pppd.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config { action } => {
            init_logging(None);
            let result = match action {
                ConfigAction::Validate { config } => cmd_config_validate(&config),
                ConfigAction::Show { config } => cmd_config_show(&config),
            };
            if let Err(e) = result {
                eprintln!("[ERROR] {}", e);
                std::process::exit(1);
            }
        }
        Commands::Run { config, bind, peer } => match cmd_run(&config, bind, peer) {
            Ok(status) => std::process::exit(status.code()),
            Err(e) => {
                eprintln!("[ERROR] {}", e);
                std::process::exit(ExitStatus::FatalError.code());
            }
        },
    }
}

fn cmd_run(config_path: &Path, bind: SocketAddr, peer: SocketAddr) -> Result<ExitStatus, String> {
    let cfg = config::load(config_path).map_err(|e| format!("Failed to load config: {}", e))?;
    init_logging(Some(&cfg.log));

    let validation = config::validate(&cfg);
    for warning in &validation.warnings {
        warn!("{}", warning);
    }
    if validation.has_errors() {
        for e in &validation.errors {
            error!("{}", e);
        }
        return Ok(ExitStatus::OptionError);
    }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to create runtime: {}", e))?;

    rt.block_on(async move {
        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| format!("Failed to bind {}: {}", bind, e))?;
        socket
            .connect(peer)
            .await
            .map_err(|e| format!("Failed to connect to {}: {}", peer, e))?;

        let mut sigint = signal(SignalKind::interrupt()).map_err(|e| e.to_string())?;
        let mut sigterm = signal(SignalKind::terminate()).map_err(|e| e.to_string())?;
        let mut sighup = signal(SignalKind::hangup()).map_err(|e| e.to_string())?;

        let stats = Arc::new(LinkStats::new());
        let mut link = Link::with_stats(cfg.link_config(), Instant::now(), stats.clone());
        info!("pppd started, PPP over UDP {} <-> {}", bind, peer);
        link.open(Instant::now());

        let mut buf = vec![0u8; MAX_DATAGRAM];

        let status = loop {
            if let Some(status) = perform(&socket, link.drain_actions()).await {
                break status;
            }

            let deadline = link.next_deadline();
            let expiry = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                result = socket.recv(&mut buf) => match result {
                    Ok(len) => link.input(Instant::now(), &buf[..len]),
                    Err(e) => warn!("Receive error: {}", e),
                },
                _ = expiry => link.handle_timeouts(Instant::now()),
                _ = sigint.recv() => {
                    info!("Terminating on signal SIGINT");
                    link.close(Instant::now(), "User request");
                }
                _ = sigterm.recv() => {
                    info!("Terminating on signal SIGTERM");
                    link.close(Instant::now(), "User request");
                }
                _ = sighup.recv() => {
                    info!("Hangup (SIGHUP)");
                    link.lower_down(Instant::now());
                }
            }
        };

        info!("Exit: {}", status);
        info!("{}", stats);
        Ok(status)
    })
}

/// Carry out the link's actions; Some once the link wants the process to exit
async fn perform(socket: &UdpSocket, actions: Vec<Action>) -> Option<ExitStatus> {
    let mut exit = None;
    for action in actions {
        match action {
            Action::Send(frame) => {
                if let Err(e) = socket.send(&frame).await {
                    warn!("Failed to send {} octets: {}", frame.len(), e);
                }
            }
            Action::ConfigureLink(params) => info!(
                "MTU {}, MRU {}, asyncmap tx {:#010x} rx {:#010x}",
                params.mtu, params.mru, params.tx_asyncmap, params.rx_asyncmap
            ),
            Action::RunScript { path, args } => spawn_script(path, args),
            Action::IpUp { local, remote, dns } => {
                debug!("ip-up local {} remote {} dns {:?}", local, remote, dns)
            }
            Action::IpDown => debug!("ip-down"),
            Action::Deliver { protocol, payload } => debug!(
                "{} octets of {} received",
                payload.len(),
                protocol_name(protocol)
            ),
            Action::Exit(status) => exit = Some(status),
        }
    }
    exit
}

/// Start a script and log its exit status when it finishes
fn spawn_script(path: PathBuf, args: Vec<String>) {
    match tokio::process::Command::new(&path).args(&args).spawn() {
        Ok(mut child) => {
            tokio::spawn(async move {
                match child.wait().await {
                    Ok(status) if status.success() => {
                        debug!("Script {} finished", path.display())
                    }
                    Ok(status) => warn!("Script {} finished ({})", path.display(), status),
                    Err(e) => warn!("Script {}: {}", path.display(), e),
                }
            });
        }
        Err(e) => warn!("Failed to run {}: {}", path.display(), e),
    }
}

fn cmd_config_validate(config_path: &Path) -> Result<(), String> {
    println!("[INFO] Validating {}...", config_path.display());

    let cfg = config::load(config_path).map_err(|e| format!("Failed to parse config: {}", e))?;

    let validation = config::validate(&cfg);
    validation.print_diagnostics();

    if validation.has_errors() {
        Err("Validation failed".to_string())
    } else {
        println!("[INFO] Configuration is valid");
        Ok(())
    }
}

fn cmd_config_show(config_path: &Path) -> Result<(), String> {
    let cfg = config::load(config_path).map_err(|e| format!("Failed to parse config: {}", e))?;
    let text = config::render(&cfg).map_err(|e| format!("Failed to render config: {}", e))?;
    print!("{}", text);
    Ok(())
}
