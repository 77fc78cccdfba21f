use alloy::primitives::Address;
use clap::{
    Args,
    Parser,
    Subcommand,
};
use coinflip_client::{
    chain::DEFAULT_CONFIRMATION_TIMEOUT,
    wallets,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use deployments::DeploymentEnv;
use std::{
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};
use tracing_appender::rolling;
use tracing_subscriber::{
    EnvFilter,
    fmt,
};
use url::Url;

mod client;
mod ui;

#[derive(Parser, Debug)]
#[command(name = "coinflip", about = "Heads-or-tails wagers against the CoinFlip contract")]
struct Cli {
    #[command(flatten)]
    network: NetworkArgs,

    /// Keystore name under the wallet directory
    #[arg(long, global = true, conflicts_with = "external_signer")]
    wallet: Option<String>,

    /// Keystore directory (defaults to ~/.foundry/keystores)
    #[arg(long, global = true)]
    wallet_dir: Option<String>,

    /// Account the RPC node signs for via eth_sendTransaction
    #[arg(long, global = true)]
    external_signer: Option<Address>,

    #[arg(long, global = true, env = "COINFLIP_STATS_URL")]
    stats_url: Option<String>,

    #[arg(long, global = true, env = "COINFLIP_STATS_KEY", hide_env_values = true)]
    stats_key: Option<String>,

    /// Seconds to wait for a flip to be mined
    #[arg(long, global = true, default_value_t = DEFAULT_CONFIRMATION_TIMEOUT.as_secs())]
    confirmation_timeout: u64,

    #[arg(long, global = true, default_value = "./logs")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Debug)]
struct NetworkArgs {
    /// Monad testnet (default)
    #[arg(long, global = true, conflicts_with = "local")]
    testnet: bool,

    /// Local node on 127.0.0.1:8545
    #[arg(long, global = true)]
    local: bool,

    /// Override the RPC URL for the selected network
    #[arg(long, global = true)]
    rpc_url: Option<Url>,
}

impl NetworkArgs {
    fn env(&self) -> DeploymentEnv {
        if self.local {
            DeploymentEnv::Local
        } else {
            DeploymentEnv::Test
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open the game UI
    Play,
    /// Print on-chain and backend stats
    Stats,
    /// Record the contract deployed at an address for the selected network
    Register {
        #[arg(long)]
        contract: Address,
        #[arg(long)]
        explorer: Option<String>,
        #[arg(long)]
        ticker: Option<String>,
    },
}

impl Cli {
    fn wallet_config(&self) -> Result<client::WalletConfig> {
        if let Some(account) = self.external_signer {
            return Ok(client::WalletConfig::External(account));
        }
        match &self.wallet {
            Some(name) => Ok(client::WalletConfig::Keystore {
                name: name.clone(),
                dir: wallets::resolve_wallet_dir(self.wallet_dir.as_deref())?,
            }),
            None => Ok(client::WalletConfig::None),
        }
    }

    fn stats_config(&self) -> Result<Option<client::StatsConfig>> {
        match (&self.stats_url, &self.stats_key) {
            (Some(url), Some(key)) => Ok(Some(client::StatsConfig {
                url: url.clone(),
                key: key.clone(),
            })),
            (None, None) => Ok(None),
            _ => Err(eyre!("--stats-url and --stats-key must be given together")),
        }
    }

    /// Address whose stats `coinflip stats` prints. Keystores are read from
    /// their `address` field so no password is needed.
    fn stats_player(&self) -> Result<Option<Address>> {
        if let Some(account) = self.external_signer {
            return Ok(Some(account));
        }
        let Some(name) = &self.wallet else {
            return Ok(None);
        };
        let dir = wallets::resolve_wallet_dir(self.wallet_dir.as_deref())?;
        let descriptor = wallets::find_wallet(&dir, name)?;
        wallets::keystore_address(&descriptor).map(Some)
    }
}

fn init_tracing(log_dir: &Path) -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = rolling::daily(log_dir, "coinflip.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let _log_guard = init_tracing(&cli.log_dir);
    color_eyre::install()?;
    deployments::ensure_structure().map_err(|e| eyre!(e))?;
    tracing::info!("starting coinflip client");

    let env = cli.network.env();
    match &cli.command {
        None | Some(Command::Play) => {
            let config = client::AppConfig {
                env,
                rpc_url: cli.network.rpc_url.clone(),
                wallet: cli.wallet_config()?,
                stats: cli.stats_config()?,
                confirmation_timeout: Duration::from_secs(cli.confirmation_timeout),
            };
            client::run_app(config).await
        }
        Some(Command::Stats) => {
            client::print_stats(
                env,
                cli.network.rpc_url.clone(),
                cli.stats_player()?,
                cli.stats_config()?,
            )
            .await
        }
        Some(Command::Register {
            contract,
            explorer,
            ticker,
        }) => {
            let rpc_url = match (&cli.network.rpc_url, env) {
                (Some(url), _) => url.clone(),
                (None, DeploymentEnv::Test) => {
                    Url::parse(deployments::MONAD_TESTNET_RPC_URL).wrap_err("invalid testnet RPC URL")?
                }
                (None, DeploymentEnv::Local) => {
                    Url::parse(client::DEFAULT_LOCAL_RPC_URL).wrap_err("invalid local RPC URL")?
                }
            };
            let explorer = explorer.clone().or_else(|| match env {
                DeploymentEnv::Test => Some(deployments::MONAD_TESTNET_EXPLORER.to_string()),
                DeploymentEnv::Local => None,
            });
            client::register(env, rpc_url, *contract, explorer, ticker.clone()).await?;
            Ok(())
        }
    }
}
