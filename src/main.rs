#![doc = include_str!("../README.md")]

use std::{
    path::PathBuf,
    time::Duration,
};
use anyhow::{
    Context
};
use clap::{
    Parser, Subcommand
};
use env_logger::Env;
use log::{
    info, warn
};

use nillion_quickstart::{
    config::{
        self,
        Config,
    },
    devnet::LocalDevnet,
    program,
    telemetry::StdoutTelemetry,
    workflow::{
        self,
        QuickstartParams,
        DEFAULT_PROGRAM_DIR,
    },
};

// CLI
#[derive(Parser, Debug)]
#[command(name = "Nillion quickstart")]
#[command(version = "0.1")]
#[command(about = "Stores a Nada program and a secret on a Nillion cluster, \
                   then computes over them and prints the result.",
          long_about = None)
]
struct Cli {
    /// Devnet env file, defaults to ~/.config/nillion/nillion-devnet.env
    #[arg(short, long)]
    env_file: Option<PathBuf>,

    /// Where compiled `.nada.bin` programs live
    #[arg(short, long, default_value = DEFAULT_PROGRAM_DIR)]
    program_dir: PathBuf,

    /// Give up waiting for the computation after this many seconds
    #[arg(short, long)]
    timeout_secs: Option<u64>,

    /// Amount credited to the wallet on the local devnet, in unil
    #[arg(long, default_value_t = 1_000_000)]
    fund_unil: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the quickstart (default)
    Run,

    /// Compile a program description into a `.nada.bin` artifact
    Compile {
        /// The program description on disk
        #[arg(short, long)]
        source: PathBuf,

        /// Output directory
        #[arg(short, long)]
        out_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .init();
    let mut cli = Cli::parse();
    info!("<-> Nillion quickstart <->");

    match cli.command.take() {
        Some(Commands::Compile { source, out_dir }) => {
            let mir_path = program::compile(&source, &out_dir)
                .with_context(|| format!("Failed to compile `{}`", source.display()))?;
            info!("Program compiled to `{}`", mir_path.display());
            Ok(())
        },

        Some(Commands::Run) | None => run(cli).await,
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let env_file = match cli.env_file {
        Some(path) => path,
        None => config::default_env_path()?,
    };
    info!("Reading devnet configuration from `{}`", env_file.display());
    let config = Config::load(&env_file)
        .context("Failed to load the devnet configuration")?;
    let wallet = config.wallet()?;

    let mut params = QuickstartParams::default()
        .with_program_dir(&cli.program_dir);
    params.compute_timeout = cli.timeout_secs.map(Duration::from_secs);
    if false == params.program_path.exists() {
        warn!(
            "Program `{}` is missing, compile it first with the `compile` command.",
            params.program_path.display()
        );
    }

    // the cluster runs in process; the wallet starts with a fresh balance
    let devnet = LocalDevnet::new(config.cluster_id.as_str());
    devnet.fund(wallet.address(), cli.fund_unil).await;
    let telemetry = StdoutTelemetry::new(config.telemetry_api_key.clone());

    let result = workflow::run(
        &config,
        &params,
        &wallet,
        |user_key, node_key| devnet.client(user_key, node_key),
        &devnet,
        &telemetry,
    )
    .await
    .context("Quickstart failed")?;
    info!(
        "Done, `{}unil` left in wallet `{}`: {result}",
        devnet.balance(wallet.address()).await,
        wallet.address()
    );
    Ok(())
}
