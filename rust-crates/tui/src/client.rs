use crate::ui;
use alloy::primitives::Address;
use coinflip_client::{
    bet,
    chain::{
        AlloyChainGateway,
        ChainGateway,
        PlayerStats,
        alloy_gateway::Signing,
    },
    driver::{
        DriverEvent,
        GameDriver,
    },
    session::{
        CoinSide,
        RevealPhase,
        Session,
        SessionEvent,
    },
    stats::{
        RestStatsStore,
        StatsGateway,
        StatsOutbox,
        StatsSnapshot,
        outbox::STATS_POLL_INTERVAL,
        stats_worker,
    },
    wallets,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use deployments::{
    DeploymentEnv,
    DeploymentRecord,
    DeploymentStore,
};
use std::{
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};
use tokio::{
    sync::mpsc,
    time,
};
use tracing::{
    error,
    info,
    warn,
};
use url::Url;

pub const DEFAULT_LOCAL_RPC_URL: &str = "http://127.0.0.1:8545";
const ANIMATION_TICK: Duration = Duration::from_millis(150);
const MAX_ERRORS: usize = 50;

#[derive(Clone, Debug)]
pub enum WalletConfig {
    Keystore { name: String, dir: PathBuf },
    External(Address),
    None,
}

#[derive(Clone, Debug)]
pub struct StatsConfig {
    pub url: String,
    pub key: String,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub env: DeploymentEnv,
    pub rpc_url: Option<Url>,
    pub wallet: WalletConfig,
    pub stats: Option<StatsConfig>,
    pub confirmation_timeout: Duration,
}

/// On-chain player stats, formatted for display.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlayerStatsView {
    pub total_bets: String,
    pub total_wins: String,
    pub total_losses: String,
    pub win_rate: String,
    pub total_wagered: String,
    pub total_won: String,
    pub total_lost: String,
    pub best_win_streak: String,
}

impl From<&PlayerStats> for PlayerStatsView {
    fn from(stats: &PlayerStats) -> Self {
        Self {
            total_bets: stats.total_bets.to_string(),
            total_wins: stats.total_wins.to_string(),
            total_losses: stats.total_losses.to_string(),
            win_rate: stats.win_rate_percent(),
            total_wagered: bet::format_rounded(stats.total_wagered, 4),
            total_won: bet::format_rounded(stats.total_won, 4),
            total_lost: bet::format_rounded(stats.total_lost, 4),
            best_win_streak: stats.best_win_streak.to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppSnapshot {
    pub network: String,
    pub ticker: String,
    pub contract: String,
    pub wallet: Option<String>,
    pub signing: &'static str,
    pub phase: RevealPhase,
    pub chosen_side: Option<CoinSide>,
    pub bet_amount: String,
    pub min_bet: String,
    pub max_bet: String,
    pub payout_preview: Option<String>,
    pub can_submit: bool,
    pub result: Option<CoinSide>,
    pub did_win: Option<bool>,
    pub stake: Option<String>,
    pub win_amount: Option<String>,
    pub result_modal_open: bool,
    pub active_tx: Option<String>,
    pub explorer_link: Option<String>,
    pub anomaly: Option<String>,
    pub player_stats: PlayerStatsView,
    pub stats: StatsSnapshot,
    pub stats_enabled: bool,
    pub status: String,
    pub errors: Vec<String>,
    pub frame: u64,
}

pub struct AppController<C> {
    driver: GameDriver<C>,
    record: DeploymentRecord,
    env: DeploymentEnv,
    signing: &'static str,
    stats: StatsSnapshot,
    stats_enabled: bool,
    status: String,
    errors: Vec<String>,
    frame: u64,
}

impl<C> AppController<C>
where
    C: ChainGateway + Clone + Send + Sync + 'static,
{
    pub fn new(
        driver: GameDriver<C>,
        record: DeploymentRecord,
        env: DeploymentEnv,
        signing: &'static str,
        stats_enabled: bool,
    ) -> Self {
        Self {
            driver,
            record,
            env,
            signing,
            stats: StatsSnapshot::default(),
            stats_enabled,
            status: String::from("Pick heads or tails to start"),
            errors: Vec::new(),
            frame: 0,
        }
    }

    pub fn build_snapshot(&self) -> AppSnapshot {
        let session = self.driver.session();
        let active_tx = session.active_tx().map(|tx| tx.to_string());
        let explorer_link = match (session.phase(), active_tx.as_deref()) {
            (RevealPhase::Done, Some(tx)) => self.record.explorer_tx_url(tx),
            _ => None,
        };
        AppSnapshot {
            network: self.env.to_string(),
            ticker: self.record.ticker().to_string(),
            contract: self.record.contract_address.clone(),
            wallet: session.wallet().map(|w| w.to_checksum(None)),
            signing: self.signing,
            phase: session.phase(),
            chosen_side: session.chosen_side(),
            bet_amount: session.bet_amount().to_string(),
            min_bet: session.bounds().min().to_string(),
            max_bet: session.bounds().max().to_string(),
            payout_preview: session.payout_preview(),
            can_submit: session.can_submit(),
            result: session.result(),
            did_win: session.did_win(),
            stake: session.stake().map(str::to_string),
            win_amount: session.win_amount().map(str::to_string),
            result_modal_open: session.result_modal_open(),
            active_tx,
            explorer_link,
            anomaly: session.anomaly().map(|a| a.to_string()),
            player_stats: PlayerStatsView::from(self.driver.player_stats()),
            stats: self.stats.clone(),
            stats_enabled: self.stats_enabled,
            status: self.status.clone(),
            errors: self.errors.clone(),
            frame: self.frame,
        }
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status = message.into();
        self.errors.clear();
    }

    fn push_errors(&mut self, mut items: Vec<String>) {
        if items.is_empty() {
            return;
        }
        for item in &items {
            error!("{}", item);
        }
        self.errors.append(&mut items);
        if self.errors.len() > MAX_ERRORS {
            let drain = self.errors.len() - MAX_ERRORS;
            self.errors.drain(0..drain);
        }
    }

    fn dispatch(&mut self, event: SessionEvent) -> bool {
        match self.driver.dispatch(event) {
            Ok(()) => true,
            Err(err) => {
                self.push_errors(vec![err.to_string()]);
                false
            }
        }
    }

    /// Applies a player action. Quit and redraw are handled by the caller.
    pub fn apply(&mut self, event: ui::UserEvent) {
        match event {
            ui::UserEvent::ChooseSide(side) => {
                if self.dispatch(SessionEvent::SideChosen(side)) {
                    self.set_status(format!("Betting on {side}"));
                }
            }
            ui::UserEvent::Preset(index) => {
                if self.dispatch(SessionEvent::PresetChosen(index)) {
                    let amount = self.driver.session().bet_amount().to_string();
                    self.set_status(format!("Bet set to {amount} {}", self.record.ticker()));
                }
            }
            ui::UserEvent::CustomBet(amount) => {
                if self.dispatch(SessionEvent::BetEntered(amount)) {
                    let status = match self.driver.session().bet_amount() {
                        "" => String::from("Bet cleared"),
                        amount => format!("Bet set to {amount} {}", self.record.ticker()),
                    };
                    self.set_status(status);
                }
            }
            ui::UserEvent::Flip => {
                if self.dispatch(SessionEvent::SubmitRequested) {
                    self.set_status("Waiting for wallet signature...");
                }
            }
            ui::UserEvent::PlayAgain => {
                if self.dispatch(SessionEvent::ResetRequested) {
                    self.set_status("Pick heads or tails for the next round");
                }
            }
            ui::UserEvent::DismissResult => {
                self.dispatch(SessionEvent::ResultDismissed);
            }
            ui::UserEvent::Reset => {
                if self.dispatch(SessionEvent::ResetRequested) {
                    self.set_status("Round reset");
                }
            }
            ui::UserEvent::Refresh => {
                self.driver.refresh_player_stats();
                self.driver.outbox().request_refresh();
                self.set_status("Refreshing stats...");
            }
            ui::UserEvent::Quit | ui::UserEvent::Redraw => {}
        }
    }

    pub fn handle_driver_event(&mut self, event: DriverEvent) {
        let failure = match &event {
            DriverEvent::Session(
                SessionEvent::SubmissionFailed { error, .. }
                | SessionEvent::ConfirmationFailed { error, .. }
                | SessionEvent::ReceiptFailed { error, .. },
            ) => Some(error.to_string()),
            _ => None,
        };
        let before = self.driver.session().phase();
        let had_anomaly = self.driver.session().anomaly().is_some();

        self.driver.handle(event);

        let session = self.driver.session();
        let after = session.phase();
        if let Some(anomaly) = session.anomaly().filter(|_| !had_anomaly) {
            let message = format!("{anomaly}; press x to reset");
            self.push_errors(vec![message]);
            return;
        }
        if before == after {
            return;
        }
        match after {
            RevealPhase::Idle => {
                if let Some(err) = failure.filter(|_| before.is_in_flight()) {
                    self.status = String::from("Round aborted");
                    self.push_errors(vec![format!("Round aborted: {err}")]);
                }
            }
            RevealPhase::Confirming => {
                let tx = session
                    .pending_tx()
                    .map(|tx| tx.to_string())
                    .unwrap_or_default();
                self.set_status(format!("Transaction {tx} sent, waiting for confirmation"));
            }
            RevealPhase::Revealing => self.set_status("Flipping..."),
            RevealPhase::Done => {
                let face = session.result().map(|side| side.to_string()).unwrap_or_default();
                let message = match session.win_amount() {
                    Some(win) => format!("{face}! You won {win} {}", self.record.ticker()),
                    None => format!("{face}. You lost this one"),
                };
                self.set_status(message);
            }
            RevealPhase::AwaitingSignature => {}
        }
    }

    pub fn ingest_stats(&mut self, snapshot: StatsSnapshot) {
        self.stats = snapshot;
    }

    /// Advances the coin animation; returns whether a redraw is due.
    pub fn tick(&mut self) -> bool {
        if !self.driver.session().phase().is_in_flight() {
            return false;
        }
        self.frame = self.frame.wrapping_add(1);
        true
    }

    pub fn driver(&self) -> &GameDriver<C> {
        &self.driver
    }
}

pub fn resolve_deployment(
    env: DeploymentEnv,
    rpc_override: Option<Url>,
) -> Result<(DeploymentStore, DeploymentRecord, Url)> {
    let store = DeploymentStore::new(env).map_err(|e| eyre!(e))?;
    let record = store
        .load()
        .map_err(|e| eyre!(e))?
        .or_else(|| deployments::default_record(env))
        .ok_or_else(|| {
            eyre!(
                "No deployment recorded for {env}. Run `coinflip {} register --contract <address>` first",
                network_flag(env)
            )
        })?;
    let url = match rpc_override {
        Some(url) => url,
        None => Url::parse(&record.network_url)
            .wrap_err_with(|| format!("Invalid RPC URL in deployment record: {}", record.network_url))?,
    };
    Ok((store, record, url))
}

fn parse_contract_address(record: &DeploymentRecord) -> Result<Address> {
    record
        .contract_address
        .parse()
        .wrap_err_with(|| format!("Invalid contract address {}", record.contract_address))
}

fn unlock_signing(wallet: &WalletConfig) -> Result<(Signing, &'static str)> {
    match wallet {
        WalletConfig::Keystore { name, dir } => {
            let descriptor = wallets::find_wallet(dir, name)?;
            let signer = wallets::unlock_wallet(&descriptor)?;
            Ok((Signing::Local(signer), "keystore"))
        }
        WalletConfig::External(account) => Ok((Signing::External(*account), "external signer")),
        WalletConfig::None => Ok((Signing::ReadOnly, "read-only")),
    }
}

async fn verify_deployment(
    chain: &AlloyChainGateway,
    env: DeploymentEnv,
    url: &Url,
    store: &DeploymentStore,
    record: &DeploymentRecord,
) -> Result<()> {
    let code = chain
        .deployed_code()
        .await
        .wrap_err("Failed to fetch contract code")?;
    if code.is_empty() {
        return Err(eyre!(
            "No contract code at {} on {env}",
            record.contract_address
        ));
    }
    let current_hash = deployments::compute_code_hash(&code);
    if record.is_compatible_with_hash(&current_hash) {
        return Ok(());
    }
    Err(eyre!(format_deployment_summary(
        env,
        url.as_str(),
        store.path(),
        record,
        &current_hash,
    )))
}

fn format_deployment_summary(
    env: DeploymentEnv,
    url: &str,
    store_path: &Path,
    record: &DeploymentRecord,
    current_hash: &str,
) -> String {
    let recorded_hash = record.code_hash.as_deref().unwrap_or("(none)");
    let explorer = record.explorer_url.as_deref().unwrap_or("(no explorer)");
    format!(
        "Deployed code at {} does not match the record for {env} at {url}.\n\n\
         Recorded deployment ({}):\n  {} - {} (hash {}) explorer {} ticker {}\n\
         Current code hash: {}\n\n\
         Run `coinflip {} register --contract <address>` to record the current deployment.",
        record.contract_address,
        store_path.display(),
        record.recorded_at,
        record.contract_address,
        hash_preview(recorded_hash),
        explorer,
        record.ticker(),
        hash_preview(current_hash),
        network_flag(env),
    )
}

fn network_flag(env: DeploymentEnv) -> &'static str {
    match env {
        DeploymentEnv::Test => "--testnet",
        DeploymentEnv::Local => "--local",
    }
}

fn hash_preview(hash: &str) -> String {
    let preview_len = hash.len().min(16);
    let mut preview = hash[..preview_len].to_string();
    if hash.len() > preview_len {
        preview.push_str("...");
    }
    preview
}

pub async fn run_app(config: AppConfig) -> Result<()> {
    let (store, record, rpc_url) = resolve_deployment(config.env, config.rpc_url.clone())?;
    let contract_address = parse_contract_address(&record)?;
    let (signing, signing_label) = unlock_signing(&config.wallet)?;
    let chain = AlloyChainGateway::connect(rpc_url.clone(), contract_address, signing)
        .with_confirmation_timeout(config.confirmation_timeout);
    verify_deployment(&chain, config.env, &rpc_url, &store, &record).await?;

    let (stats_cmd_tx, stats_cmd_rx) = mpsc::unbounded_channel();
    let (stats_event_tx, stats_event_rx) = mpsc::unbounded_channel();
    let wallet_address = chain.account().map(|a| a.to_checksum(None));
    let stats_gateway = match &config.stats {
        Some(stats) => StatsGateway::new(
            RestStatsStore::new(stats.url.clone(), stats.key.clone())
                .wrap_err("Failed to build stats client")?,
        ),
        None => StatsGateway::disabled(),
    };
    let stats_enabled = stats_gateway.is_enabled();
    let stats_handle = tokio::spawn(stats_worker(
        stats_gateway,
        wallet_address,
        STATS_POLL_INTERVAL,
        stats_cmd_rx,
        stats_event_tx,
    ));

    let account = chain.account();
    let mut driver = GameDriver::new(Session::default(), chain, StatsOutbox::new(stats_cmd_tx));
    driver
        .dispatch(SessionEvent::WalletChanged(account))
        .wrap_err("Failed to attach wallet")?;
    driver.load_min_bet();
    driver.refresh_player_stats();
    let controller = AppController::new(driver, record, config.env, signing_label, stats_enabled);

    let mut ui_state = ui::UiState::default();
    let mut input_events = ui::input_event_stream();
    info!(env = %config.env, %contract_address, "starting UI");
    ui::terminal_enter(&mut ui_state)?;
    let res = run_loop(controller, &mut ui_state, &mut input_events, stats_event_rx).await;
    ui::terminal_exit()?;
    if let Err(err) = stats_handle.await {
        warn!(?err, "stats worker ended abnormally");
    }
    res
}

async fn run_loop<C>(
    mut controller: AppController<C>,
    ui_state: &mut ui::UiState,
    input_events: &mut ui::InputEventReceiver,
    mut stats_events: mpsc::UnboundedReceiver<StatsSnapshot>,
) -> Result<()>
where
    C: ChainGateway + Clone + Send + Sync + 'static,
{
    let mut animation = time::interval(ANIMATION_TICK);
    let mut stats_closed = false;
    ui::draw(ui_state, &controller.build_snapshot()).wrap_err("initial draw failed")?;

    let res = loop {
        tokio::select! {
            maybe_event = controller.driver.next_event() => {
                let Some(event) = maybe_event else {
                    break Err(eyre!("driver event channel closed"));
                };
                controller.handle_driver_event(event);
            }
            maybe_stats = stats_events.recv(), if !stats_closed => {
                match maybe_stats {
                    Some(snapshot) => controller.ingest_stats(snapshot),
                    None => {
                        warn!("stats worker channel closed");
                        stats_closed = true;
                    }
                }
            }
            _ = animation.tick() => {
                if !controller.tick() {
                    continue;
                }
            }
            _ = tokio::signal::ctrl_c() => break Ok(()),
            raw_ev = ui::next_raw_event(input_events) => {
                let event = match raw_ev {
                    Ok(event) => event,
                    Err(err) => break Err(err),
                };
                let Some(ev) = ui::interpret_event(ui_state, event) else {
                    continue;
                };
                if ev == ui::UserEvent::Quit {
                    break Ok(());
                }
                controller.apply(ev);
            }
        }
        if let Err(err) = ui::draw(ui_state, &controller.build_snapshot()) {
            break Err(err.wrap_err("draw failed"));
        }
    };
    controller.driver().outbox().shutdown();
    res
}

/// Prints on-chain and backend aggregates without entering the UI.
pub async fn print_stats(
    env: DeploymentEnv,
    rpc_url: Option<Url>,
    player: Option<Address>,
    stats: Option<StatsConfig>,
) -> Result<()> {
    let (_store, record, rpc_url) = resolve_deployment(env, rpc_url)?;
    let contract_address = parse_contract_address(&record)?;
    let chain = AlloyChainGateway::connect(rpc_url, contract_address, Signing::ReadOnly);
    let ticker = record.ticker();

    println!("CoinFlip on {env} ({contract_address})");
    let min_bet = chain.min_bet().await.wrap_err("Failed to read minBet")?;
    println!("  min bet: {} {ticker}", bet::format_amount(min_bet));

    if let Some(player) = player {
        let stats = chain
            .player_stats(Some(player))
            .await
            .wrap_err("Failed to read player stats")?;
        let view = PlayerStatsView::from(&stats);
        println!("\nPlayer {}", player.to_checksum(None));
        println!("  bets {} wins {} losses {} win rate {}", view.total_bets, view.total_wins, view.total_losses, view.win_rate);
        println!(
            "  wagered {} won {} lost {} {ticker}",
            view.total_wagered, view.total_won, view.total_lost
        );
        println!("  best win streak {}", view.best_win_streak);
    }

    let Some(stats) = stats else {
        println!("\nStats backend not configured");
        return Ok(());
    };
    let gateway = StatsGateway::new(
        RestStatsStore::new(stats.url, stats.key).wrap_err("Failed to build stats client")?,
    );
    let global = gateway.global_stats().await;
    println!(
        "\nAll players: {} games, {:.1}% won, heads {:.1}% / tails {:.1}%",
        global.total_games,
        global.win_rate_percent(),
        global.heads_percent(),
        global.tails_percent()
    );
    if let Some(player) = player {
        let mine = gateway.player_stats(&player.to_checksum(None)).await;
        println!(
            "Backend record for player: {} games, {} wins, {} losses",
            mine.total_games, mine.total_wins, mine.total_losses
        );
    }
    Ok(())
}

/// Records the contract at `contract_address` as the deployment for `env`.
pub async fn register(
    env: DeploymentEnv,
    rpc_url: Url,
    contract_address: Address,
    explorer_url: Option<String>,
    ticker: Option<String>,
) -> Result<DeploymentRecord> {
    let chain = AlloyChainGateway::connect(rpc_url.clone(), contract_address, Signing::ReadOnly);
    let code = chain
        .deployed_code()
        .await
        .wrap_err("Failed to fetch contract code")?;
    if code.is_empty() {
        return Err(eyre!("No contract code at {contract_address} on {env}"));
    }
    let store = DeploymentStore::new(env).map_err(|e| eyre!(e))?;
    let record = deployments::record_deployment(
        &store,
        contract_address.to_checksum(None),
        rpc_url.as_str(),
        explorer_url,
        ticker,
        &code,
    )
    .map_err(|e| eyre!(e))?;
    info!(%env, %contract_address, "deployment recorded");
    println!(
        "Recorded {} on {env} (hash {}) in {}",
        record.contract_address,
        hash_preview(record.code_hash.as_deref().unwrap_or_default()),
        store.path().display()
    );
    Ok(record)
}
