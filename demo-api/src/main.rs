use std::net::SocketAddr;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::{error, info};

use demo_api::config::{parse_listen_addr, Config, DEFAULT_LISTEN_ADDR};

#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// The address to listen on for web requests
    #[arg(
        long = "web.listen-addr",
        default_value = DEFAULT_LISTEN_ADDR,
        value_parser = parse_listen_addr
    )]
    pub listen_addr: SocketAddr,

    /// Set the output style of the logs
    #[arg(short, long, value_enum, default_value_t = Output::Text)]
    pub output: Output,
}

#[derive(Debug, Clone, ValueEnum)]
enum Output {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Args = Args::parse();
    set_up_logger(&args.output);

    info!(?args, "starting demo api");

    let cfg = Config {
        listen_addr: args.listen_addr,
        ..Config::default()
    };

    match demo_api::run(cfg).await {
        Ok(()) => {
            info!("shutting down");
            ExitCode::SUCCESS
        }
        Err(report) => {
            error!("{report:#}");

            // print detailed error report as the last output if in text mode
            if matches!(args.output, Output::Text) {
                eprintln!("{report:?}");
            }

            ExitCode::FAILURE
        }
    }
}

fn set_up_logger(output: &Output) {
    match output {
        Output::Json => {
            tracing_subscriber::fmt().json().flatten_event(true).init();
        }
        Output::Text => {
            tracing_subscriber::fmt().compact().init();
        }
    };
}
