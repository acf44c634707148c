mod wallet;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use commander::checkin::DayStatus;
use commander::config::ConfigError;
use commander::cooldown::CooldownTimer;
use commander::missions::{MissionAvailability, MissionDesk, MissionError, MissionOutcome};
use commander::net::types::{MissionActionKind, MissionDirective, UserPublic};
use commander::net::api::{DEFAULT_ALLIES_LIMIT, DEFAULT_ALLIES_PAGE};
use commander::net::{ApiClient, ApiError};
use commander::oauth::{self, OAuthCallback, OAuthPlatform};
use commander::rank::RankTransitionDetector;
use commander::storage::{FileStore, KeyValueStore, PENDING_REFERRAL_CODE_KEY, StorageError};
use commander::{ClientConfig, Notice, NoticeLevel, SessionManager};
use reqwest::Url;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use crate::wallet::{PrintNavigator, PromptWallet, WALLET_ADDRESS_KEY};

/// `Cookie` header carried between invocations.
const SESSION_COOKIE_KEY: &str = "session_cookie";

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("local storage: {0}")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Mission(#[from] MissionError),
    #[error(transparent)]
    Platform(#[from] oauth::UnknownPlatform),
    #[error("not signed in; run `commander login --address <wallet>`")]
    NotSignedIn,
    #[error("sign-in failed")]
    SignInFailed,
    #[error("no mission with id `{0}`")]
    UnknownMission(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

#[derive(Parser, Debug)]
#[command(name = "commander", about = "Commander wallet session and mission CLI")]
struct Cli {
    #[arg(long, env = "COMMANDER_API_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "COMMANDER_STORAGE_PATH")]
    storage: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the current session and profile.
    Status,
    /// Sign in by signing a backend challenge with your wallet.
    Login {
        #[arg(long)]
        address: String,
        /// Referral code to attach to the first successful sign-in.
        #[arg(long)]
        referral: Option<String>,
    },
    Logout,
    /// Re-fetch the profile.
    Refresh,
    /// List mission directives and progress.
    Missions,
    Complete {
        mission_id: String,
    },
    Claim {
        mission_id: String,
    },
    /// Daily check-in, then the ten-day calendar.
    Checkin,
    Allies {
        #[arg(long, default_value_t = DEFAULT_ALLIES_PAGE)]
        page: u32,
        #[arg(long, default_value_t = DEFAULT_ALLIES_LIMIT)]
        limit: u32,
    },
    /// Start linking a third-party account (x, discord, telegram, github).
    Link {
        platform: String,
    },
    /// Report the outcome encoded in an OAuth redirect URL.
    Callback {
        url: String,
    },
}

struct App {
    api: Arc<ApiClient>,
    store: Arc<FileStore>,
    wallet: Arc<PromptWallet>,
    session: Arc<SessionManager>,
    desk: MissionDesk,
    notices: broadcast::Receiver<Notice>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env()?;
    if let Some(base_url) = &cli.base_url {
        config = config.with_base_url(base_url)?;
    }
    if let Some(path) = cli.storage {
        config.storage_path = path;
    }

    let interactive = matches!(cli.command, Command::Login { .. });
    let mut app = App::open(&config, interactive)?;
    let result = app.run(cli.command).await;
    app.print_notices();
    app.persist()?;
    result
}

impl App {
    fn open(config: &ClientConfig, interactive: bool) -> Result<Self, CliError> {
        let store = Arc::new(FileStore::open(&config.storage_path)?);
        let api = Arc::new(ApiClient::new(&config.api_base_url, config.timeouts)?);
        if let Some(cookie) = store.get(SESSION_COOKIE_KEY) {
            api.import_cookies(&cookie);
        }

        let wallet = Arc::new(if interactive { PromptWallet::prompt() } else { PromptWallet::saved(store.clone()) });
        let session = Arc::new(SessionManager::new(
            api.clone(),
            wallet.clone(),
            store.clone(),
            Arc::new(PrintNavigator),
        ));
        let notices = session.notices();
        let cooldown = CooldownTimer::new(store.clone(), config.cooldown);
        let desk = MissionDesk::new(api.clone(), session.clone(), store.clone(), cooldown);

        tracing::debug!(base_url = %api.base_url(), storage = %store.path().display(), "client ready");
        Ok(Self { api, store, wallet, session, desk, notices })
    }

    async fn run(&self, command: Command) -> Result<(), CliError> {
        if let Command::Login { address, referral } = &command {
            self.prepare_login(address, referral.as_deref())?;
        }

        self.session.hydrate().await;
        match command {
            Command::Login { address, .. } => self.login(&address).await,
            Command::Status => self.status(),
            Command::Logout => {
                self.session.logout().await;
                Ok(())
            }
            Command::Refresh => {
                self.require_session()?;
                self.session.refresh_profile().await;
                self.status()
            }
            Command::Missions => self.missions().await,
            Command::Complete { mission_id } => {
                let mission = self.find_mission(&mission_id).await?;
                if self.desk.complete_mission(&mission, None).await? == MissionOutcome::Opened
                    && mission.action.kind == MissionActionKind::RedirectAndVerify
                {
                    println!("Run `commander complete {mission_id}` again once done to verify.");
                }
                Ok(())
            }
            Command::Claim { mission_id } => {
                let mission = self.find_mission(&mission_id).await?;
                self.desk.claim_reward(&mission).await?;
                Ok(())
            }
            Command::Checkin => self.checkin().await,
            Command::Allies { page, limit } => {
                let page = self.desk.allies(page, limit).await?;
                println!("Allies: {} (page {}/{})", page.total_allies, page.page, page.total_pages.max(1));
                for ally in &page.allies {
                    println!("  {:<24} {:<14} joined {}", ally.username, ally.rank, ally.joined_at);
                }
                Ok(())
            }
            Command::Link { platform } => {
                let platform: OAuthPlatform = platform.parse()?;
                self.session.link_platform(platform.as_str()).await;
                Ok(())
            }
            Command::Callback { url } => self.callback(&url).await,
        }
    }

    /// Stash the referral code and point the wallet at `address` before
    /// hydration, so an anonymous result signs in right away.
    fn prepare_login(&self, address: &str, referral: Option<&str>) -> Result<(), CliError> {
        if let Some(code) = referral.map(str::trim).filter(|c| !c.is_empty()) {
            self.store.set(PENDING_REFERRAL_CODE_KEY, code)?;
        }
        self.wallet.set_address(Some(address.to_string()));
        Ok(())
    }

    async fn login(&self, address: &str) -> Result<(), CliError> {
        let state = self.session.state();
        if let Some(user) = state.user.as_ref().filter(|_| state.is_authenticated()) {
            if user.wallet_address.eq_ignore_ascii_case(address) {
                println!("Already signed in");
                print_profile(user);
                return Ok(());
            }
            tracing::info!(current = %user.wallet_address, requested = %address, "switching wallets");
            self.session.logout().await;
            self.wallet.set_address(Some(address.to_string()));
            self.session.sync_wallet().await;
        }

        let state = self.session.state();
        match state.user {
            Some(user) if state.is_authenticated() => {
                print_profile(&user);
                Ok(())
            }
            _ => Err(CliError::SignInFailed),
        }
    }

    fn status(&self) -> Result<(), CliError> {
        let state = self.session.state();
        let Some(user) = state.user.clone().filter(|_| state.is_authenticated()) else {
            println!("Not signed in");
            return Ok(());
        };
        print_profile(&user);

        let detector = RankTransitionDetector::new(self.store.clone());
        if let Some(transition) = detector.observe(Some(&user))? {
            println!("\nPROMOTED: {} -> {}", transition.old_rank, transition.new_rank);
            detector.dismiss(&user)?;
        }
        Ok(())
    }

    async fn missions(&self) -> Result<(), CliError> {
        let board = self.desk.board().await?;
        println!(
            "Missions: {}/{} complete, {} active signals",
            board.summary.completed_missions, board.summary.total_missions, board.summary.active_signals
        );
        for mission in &board.directives {
            let availability = match self.desk.availability(mission) {
                MissionAvailability::Ready => mission.action.label.clone(),
                MissionAvailability::Completed => "completed".to_string(),
                MissionAvailability::CoolingDown(status) => format!("wait {}", status.formatted()),
                MissionAvailability::NeedsAllies { missing } => format!("need {missing} more allies"),
                MissionAvailability::Unavailable => "unavailable".to_string(),
            };
            println!("  {:<28} {:>5} XP  {:<36} [{availability}]", mission.mission_id, mission.reward_xp, mission.title);
        }
        if !board.badges.is_empty() {
            let names: Vec<&str> = board.badges.iter().map(|b| b.name.as_str()).collect();
            println!("Badges: {}", names.join(", "));
        }
        Ok(())
    }

    async fn checkin(&self) -> Result<(), CliError> {
        match self.desk.daily_checkin().await {
            Ok(_) | Err(MissionError::AlreadyCheckedIn) => {}
            Err(e) => return Err(e.into()),
        }
        let days = self.desk.checkin_calendar().await?;
        let row: Vec<String> = days
            .iter()
            .map(|d| {
                let mark = match d.status {
                    DayStatus::CheckedIn => 'x',
                    DayStatus::Missed => '-',
                    DayStatus::Upcoming => '.',
                };
                if d.is_today { format!("[{mark}]") } else { format!(" {mark} ") }
            })
            .collect();
        println!("{}", row.join(""));
        Ok(())
    }

    async fn callback(&self, raw: &str) -> Result<(), CliError> {
        let url = Url::parse(raw).map_err(|e| CliError::InvalidUrl(e.to_string()))?;
        let Some(outcome) = OAuthCallback::from_url(&url) else {
            println!("No account-link result in this URL");
            return Ok(());
        };
        if let Some(notice) = outcome.notice() {
            print_notice(&notice);
        }
        println!("Clean URL: {}", oauth::strip_callback_params(&url));
        if self.session.state().is_authenticated() {
            self.session.refresh_profile().await;
        }
        Ok(())
    }

    async fn find_mission(&self, mission_id: &str) -> Result<MissionDirective, CliError> {
        let board = self.desk.board().await?;
        board
            .directives
            .into_iter()
            .find(|d| d.mission_id == mission_id || d.id == mission_id)
            .ok_or_else(|| CliError::UnknownMission(mission_id.to_string()))
    }

    fn require_session(&self) -> Result<(), CliError> {
        if self.session.state().is_authenticated() { Ok(()) } else { Err(CliError::NotSignedIn) }
    }

    fn print_notices(&mut self) {
        while let Ok(notice) = self.notices.try_recv() {
            print_notice(&notice);
        }
    }

    /// Carry the cookie and wallet address to the next invocation. Anything
    /// else the session cleared stays cleared.
    fn persist(&self) -> Result<(), CliError> {
        if !self.session.state().is_authenticated() {
            return Ok(());
        }
        if let Some(cookie) = self.api.export_cookies() {
            self.store.set(SESSION_COOKIE_KEY, &cookie)?;
        }
        if let Some(address) = self.wallet.address() {
            self.store.set(WALLET_ADDRESS_KEY, &address)?;
        }
        Ok(())
    }
}

fn print_profile(user: &UserPublic) {
    let name = if user.profile.commander_name.is_empty() { &user.username } else { &user.profile.commander_name };
    println!("Commander {name} ({})", user.wallet_address);
    println!("  Rank      {} ({:.0}% to {})", user.rank, user.profile.rank_progress_percent, user.profile.next_rank.as_deref().unwrap_or("max"));
    println!("  XP        {}", user.xp);
    println!("  Allies    {}", user.allies_count);
    println!("  Streak    {} days", user.daily_checkin_streak);
    if let Some(code) = &user.referral_code {
        println!("  Referral  {code}");
    }
    let linked: Vec<String> = OAuthPlatform::ALL
        .into_iter()
        .filter_map(|p| oauth::platform_connection(user, p).map(|c| format!("{} @{}", p.display_name(), c.username)))
        .collect();
    if !linked.is_empty() {
        println!("  Linked    {}", linked.join(", "));
    }
}

fn print_notice(notice: &Notice) {
    let tag = match notice.level {
        NoticeLevel::Success => "ok",
        NoticeLevel::Error => "error",
        NoticeLevel::Info => "info",
    };
    println!("[{tag}] {}", notice.message);
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
