mod cli;
mod error;
mod output;
mod server;

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use plcgw_config::Config;
use plcgw_core::{ControlRequest, ControlSurface, Gateway};

use crate::cli::{Cli, Command, ConfigCommand, GlobalOpts, ServeArgs};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose, cli.global.log_json);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, json: bool) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Serve(args) => serve(&cli.global, args).await,

        Command::Points(args) => {
            let mut points = load(&cli.global)?.points;
            if let Some(data_type) = args.data_type {
                points.retain(|p| p.data_type == data_type);
            }
            println!("{}", output::render_points(&points, args.output)?);
            Ok(())
        }

        Command::Config(args) => match args.command {
            ConfigCommand::Path => {
                let path = cli.global.config.unwrap_or_else(plcgw_config::config_path);
                println!("{}", path.display());
                Ok(())
            }
            ConfigCommand::Show => {
                print!("{}", load(&cli.global)?.to_toml()?);
                Ok(())
            }
        },

        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "plcgw", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(plcgw_config::load_config(global.config.as_deref())?)
}

async fn serve(global: &GlobalOpts, args: ServeArgs) -> Result<(), CliError> {
    let config = load(global)?;
    let gateway = Gateway::s7(config.to_gateway_config(), config.points.clone())?;
    let surface = Arc::new(ControlSurface::new(gateway));

    let addr = args.bind.unwrap_or(config.gateway.api_bind);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| CliError::Bind { addr, source })?;
    info!(
        %addr,
        points = config.points.len(),
        plc = %config.connection().target(),
        "control API listening"
    );

    let startup = if args.demo {
        Some(ControlRequest::ConnectDemo)
    } else if args.connect {
        Some(ControlRequest::Connect { config: None })
    } else {
        None
    };
    if let Some(request) = startup {
        let response = surface.handle(request).await;
        if let Some(error) = response.error.as_deref() {
            // Keep serving: the API can retry the connect.
            warn!(error, "startup connect failed");
        } else if let Some(message) = response.message.as_deref() {
            info!(message, "startup");
        }
    }

    let served = server::serve(listener, Arc::clone(&surface), shutdown_signal()).await;

    // The controller session and feed listener close even if serving failed.
    surface.shutdown().await;
    served?;
    info!("plcgw stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler, waiting for Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
}
