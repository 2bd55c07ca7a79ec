use std::path::PathBuf;

use clap::{Parser, Subcommand};
use st_protocol::{CupId, GameId, Side};
use tokio::sync::broadcast;
use tracker::config::{load_config, load_config_from_path};
use tracker::{Client, ConnectionState, GameScorers, TrackerConfig, WatchContext, WatchError};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "tracker", version, about = "Live client for the sports tracker server")]
struct Cli {
    /// Config file (TOML).  Defaults to the user config dir.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Server URL, overriding the config file.
    #[arg(long, global = true, value_name = "URL")]
    url: Option<String>,
    /// Log in as this user, overriding the config file.
    #[arg(long, global = true, value_name = "NAME")]
    user: Option<String>,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Follow watched games and print the feed until Ctrl-C.
    Live,
    /// List games.
    Games {
        /// Only running or paused games.
        #[arg(long)]
        live: bool,
    },
    /// List cups.
    Cups,
    /// Per-player scoring summary for one game.
    Scorers { game_id: GameId },
    WatchGame { game_id: GameId },
    UnwatchGame { game_id: GameId },
    WatchCup { cup_id: CupId },
    UnwatchCup { cup_id: CupId },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Needed for wss:// endpoints; a provider may already be installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    };
    let mut config = loaded.unwrap_or_else(|e| {
        eprintln!("FATAL: failed to load config: {e}");
        std::process::exit(1);
    });
    if let Some(url) = cli.url.clone() {
        config.server.url = url;
    }
    if let Some(user) = cli.user.clone() {
        config.session.username = Some(user);
    }

    let client = Client::connect(&config).await.unwrap_or_else(|e| {
        eprintln!("FATAL: {e}");
        std::process::exit(1);
    });
    client.set_error_hook(|verb, err| warn!(verb, error = %err, "call failed"));

    if let Err(e) = run(&client, &config, cli.command).await {
        eprintln!("error: {e}");
        client.shutdown();
        std::process::exit(1);
    }
    client.shutdown();
}

async fn login(client: &Client, config: &TrackerConfig) -> Result<(), WatchError> {
    if let Some(username) = &config.session.username {
        let greeting = client.login(username).await?;
        info!(username = %username, greeting = greeting.as_deref().unwrap_or(""), "logged in");
    }
    Ok(())
}

async fn run(client: &Client, config: &TrackerConfig, command: Cmd) -> Result<(), WatchError> {
    login(client, config).await?;

    match command {
        Cmd::Live => live(client, config).await?,
        Cmd::Games { live } => {
            let games = if live {
                client.live_games().await?
            } else {
                client.list_games().await?
            };
            for g in games {
                println!(
                    "{:>5}  {} {} - {} {}  [{}]",
                    g.id, g.home.name, g.score.home, g.score.away, g.away.name, g.state
                );
            }
        }
        Cmd::Cups => {
            for cup in client.list_cups().await? {
                println!(
                    "{:>5}  {}  {:?}  {} teams, {} games",
                    cup.id,
                    cup.name,
                    cup.cup_type,
                    cup.teams.len(),
                    cup.game_count
                );
            }
        }
        Cmd::Scorers { game_id } => {
            let game = client.get_game(game_id).await?;
            let board = game.scorer_board();
            println!(
                "{} {} - {} {}  [{}]",
                game.home.name, game.score.home, game.score.away, game.away.name, game.state
            );
            for side in [Side::Home, Side::Away] {
                let team = match side {
                    Side::Home => &game.home.name,
                    Side::Away => &game.away.name,
                };
                println!("{team}:");
                for s in board.side(side) {
                    println!(
                        "  {} x{}  {}",
                        s.player,
                        s.total_goals,
                        s.goal_timestamps.join(", ")
                    );
                }
            }
        }
        Cmd::WatchGame { game_id } => {
            let watch = loaded_context(client).await?;
            watch.watch_game(game_id).await?;
            println!("watching game {game_id}");
        }
        Cmd::UnwatchGame { game_id } => {
            let watch = loaded_context(client).await?;
            watch.unwatch_game(game_id).await?;
            println!("stopped watching game {game_id}");
        }
        Cmd::WatchCup { cup_id } => {
            let watch = loaded_context(client).await?;
            let games = watch.watch_cup(cup_id).await?;
            println!("watching cup {cup_id} ({} games added)", games.len());
        }
        Cmd::UnwatchCup { cup_id } => {
            let watch = loaded_context(client).await?;
            let removed = watch.unwatch_cup(cup_id).await?;
            println!("stopped watching cup {cup_id} ({} games removed)", removed.len());
        }
    }
    Ok(())
}

async fn loaded_context(client: &Client) -> Result<WatchContext<Client>, WatchError> {
    let watch = WatchContext::new(client.clone(), client.router());
    watch.load().await?;
    Ok(watch)
}

async fn restore_session(
    client: &Client,
    config: &TrackerConfig,
    watch: &WatchContext<Client>,
) -> Result<(), WatchError> {
    login(client, config).await?;
    watch.load().await
}

async fn live(client: &Client, config: &TrackerConfig) -> Result<(), WatchError> {
    let watch = loaded_context(client).await?;
    let state = watch.state();
    info!(
        games = state.watched_games.len(),
        cups = state.watched_cups.len(),
        "following watched games; Ctrl-C to stop"
    );

    let mut updates = watch.feed_updates();
    let mut connection = client.transport().subscribe_state();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            entry = updates.recv() => match entry {
                Ok(e) => println!(
                    "{}  game {:>4}  {}",
                    e.received_at.format("%H:%M:%S"),
                    e.game_id,
                    e.message
                ),
                Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "feed output lagged"),
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let now = *connection.borrow_and_update();
                info!(state = ?now, "connection state changed");
                // Session state lives on the server connection; restore it.
                if now == ConnectionState::Connected {
                    if let Err(err) = restore_session(client, config, &watch).await {
                        warn!(error = %err, "could not restore session; still following");
                    }
                }
            }
        }
    }

    watch.close();
    Ok(())
}
