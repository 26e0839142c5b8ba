mod cli;

use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands, LoginArgs};
use newsbridge::config::{Account, Config};
use newsbridge::login_flow::{LoginFlow, LoginFlowEvent, LoginFlowSettings};
use newsbridge::notify::TracingNotificator;
use newsbridge::observability::init_tracing;
use newsbridge::{AccountValidator, Configuration, Context, Outcome};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    let cli = Cli::parse();
    init_tracing(&cli.log);

    let config = match cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    let account = Arc::new(Account::from_config(&config));

    match cli.command {
        Commands::Login(args) => login(&config, account, args).await,
        Commands::Validate => validate(account).await,
    }
}

async fn login(config: &Config, account: Arc<Account>, args: LoginArgs) -> Result<(), AnyError> {
    if let Some(server) = args.server {
        if !account.set_server_url(&server) {
            return Err(format!("Invalid server URL: {server}").into());
        }
    }

    let context = Context::new(account.clone())?.with_notificator(Arc::new(TracingNotificator));
    let flow = LoginFlow::new(context);
    flow.set_settings(LoginFlowSettings::from(&config.login_flow))?;

    let mut events = flow.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(LoginFlowEvent::LoginUrl(url)) => {
                    println!("Open this URL in your browser to grant access:\n  {url}");
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut countdown = flow.watch_seconds_left();
    tokio::spawn(async move {
        while countdown.changed().await.is_ok() {
            let left = *countdown.borrow_and_update();
            if left > 0 && left % 30 == 0 {
                info!(remaining_secs = left, "Waiting for authorization");
            }
        }
    });

    let canceller = flow.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling login flow");
            canceller.cancel();
        }
    });

    match flow.start().await {
        Outcome::Succeeded(_) => {
            println!("Logged in as {}", account.username());
            Ok(())
        }
        Outcome::Failed(error) => Err(error.into()),
        Outcome::Cancelled => Err("Login flow cancelled".into()),
        Outcome::Rejected => Err("Login flow already running".into()),
    }
}

async fn validate(account: Arc<Account>) -> Result<(), AnyError> {
    let context = Context::new(account)?.with_notificator(Arc::new(TracingNotificator));
    let validator = AccountValidator::new(context);

    match validator.validate().await {
        Outcome::Succeeded(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Outcome::Failed(error) => Err(error.into()),
        Outcome::Cancelled | Outcome::Rejected => Err("Account validation did not run".into()),
    }
}
