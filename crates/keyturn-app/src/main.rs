//! keyturn application binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Open the SQLite database
//! 3. Build the action registry and register the built-in actions
//! 4. Serve the HTTP API, or run a one-shot token management command

mod cli;

use std::sync::Arc;

use clap::Parser;

use keyturn_action::{register_builtin_actions, ActionRegistry, LogNotifier, TargetResolvers};
use keyturn_api::routes;
use keyturn_api::state::AppState;
use keyturn_core::config::KeyturnConfig;
use keyturn_core::token::NewToken;
use keyturn_core::types::TargetRef;
use keyturn_storage::{Database, TokenFilters, UserRepository};

use cli::{CliArgs, Command};

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

async fn run_command(
    command: Command,
    config: &KeyturnConfig,
    state: AppState,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Serve => routes::start_server(config, state).await?,
        Command::Issue {
            email,
            action,
            first_name,
            last_name,
            target_type,
            target_id,
        } => {
            let mut new = NewToken::new(email, action).with_names(first_name, last_name);
            if let (Some(content_type), Some(object_id)) = (target_type, target_id) {
                new = new.with_target(TargetRef::new(content_type, object_id));
            }
            let token = state.lifecycle.create(&new).await?;
            println!("{}", token.key);
            println!(
                "{}/actions/{}",
                config.general.public_url.trim_end_matches('/'),
                token.key
            );
        }
        Command::List {
            action,
            pending,
            limit,
        } => {
            let mut filters = if pending {
                TokenFilters::pending()
            } else {
                TokenFilters::default()
            };
            filters.action = action;
            filters.limit = Some(limit);

            let policy = state.policy();
            for token in state.lifecycle.list(&filters)? {
                println!(
                    "{:<6} {:<40} {:<9} {:<24} {}",
                    token.id,
                    token.key,
                    token.status(policy).to_string(),
                    token.action,
                    token.email
                );
            }
        }
        Command::Cancel { keys } => {
            let count = state.lifecycle.cancel_keys(&keys)?;
            println!("Canceled {} token(s)", count);
        }
        Command::Uncancel { keys } => {
            let count = state.lifecycle.uncancel_keys(&keys)?;
            println!("Uncanceled {} token(s)", count);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = KeyturnConfig::load_or_default(&config_file);
    config.apply_env_overrides()?;
    args.apply_to(&mut config);

    // Tracing.
    init_tracing(&config.general.log_level);
    tracing::info!("Starting keyturn v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        path = %config_file.display(),
        validity_days = config.tokens.validity_duration_days,
        "Configuration loaded"
    );

    // Storage.
    let db_path = cli::expand_home(&config.general.db_path);
    let db = Arc::new(Database::new(&db_path)?);
    let users = Arc::new(UserRepository::new(Arc::clone(&db)));

    // Actions.
    let registry = Arc::new(ActionRegistry::new());
    register_builtin_actions(
        &registry,
        Arc::clone(&users),
        Arc::new(LogNotifier),
        &config.general.public_url,
    )?;
    tracing::info!(actions = ?registry.names(), "Account actions registered");

    let targets = TargetResolvers::new().with("user", users);
    let state = AppState::new(config.clone(), db, registry, targets);

    let command = args.command.clone().unwrap_or(Command::Serve);
    run_command(command, &config, state).await
}
