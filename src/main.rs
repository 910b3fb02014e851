use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use agentdeck::app::App;
use agentdeck::cli::{Cli, Commands, Display, GoalAction};
use agentdeck::config::debug_enabled;
use agentdeck::error::{DeckError, Result};
use agentdeck::tool::Tool;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose || debug_enabled());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            Display::new().print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("agentdeck=debug")
    } else {
        EnvFilter::new("agentdeck=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let display = Display::new();
    let profile = cli.profile.as_deref();

    match cli.command {
        Commands::Run => cmd_run(profile).await,
        Commands::List => cmd_list(&display, profile).await,
        Commands::Doctor => cmd_doctor().await,
        Commands::Goals { action } => cmd_goals(profile, action).await,
    }
}

/// Headless core loop: schedulers, watchers and the notification bar keep
/// running until interrupted.
async fn cmd_run(profile: Option<&str>) -> Result<()> {
    let app = App::bootstrap(profile).await?;
    tracing::info!(sessions = app.registry.len(), "agentdeck core running");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| DeckError::Other(format!("signal handler failed: {e}")))?;

    tracing::info!("shutting down");
    app.shutdown().await;
    Ok(())
}

async fn cmd_list(display: &Display, profile: Option<&str>) -> Result<()> {
    let app = App::bootstrap(profile).await?;

    let instances = app.registry.snapshot();
    if instances.is_empty() {
        println!("no sessions");
    }
    for inst in &instances {
        println!(
            "{}",
            display.session_line(
                inst.status(),
                &inst.title(),
                inst.tool.label(),
                &inst.group_path(),
            )
        );
    }

    app.shutdown().await;
    Ok(())
}

async fn cmd_doctor() -> Result<()> {
    let tmux = which("tmux");
    println!(
        "tmux: {}",
        if tmux { "ok" } else { "NOT FOUND (required)" }
    );
    for tool in Tool::ALL {
        let found = which(tool.binary());
        println!(
            "{}: {}",
            tool.binary(),
            if found { "ok" } else { "not installed" }
        );
    }
    if !tmux {
        return Err(DeckError::BackendUnavailable("tmux binary not found".into()));
    }
    Ok(())
}

async fn cmd_goals(profile: Option<&str>, action: GoalAction) -> Result<()> {
    let app = App::bootstrap(profile).await?;
    let Some(watch) = &app.watch else {
        app.shutdown().await;
        return Err(DeckError::Config(
            "watch goals need a provider API key (ANTHROPIC_API_KEY or OPENAI_API_KEY)".into(),
        ));
    };

    let result = match action {
        GoalAction::List => {
            for goal in watch.get_goals() {
                let state = if goal.paused { "paused" } else { "active" };
                println!(
                    "{}  {:<20} {}  every {:?}  triggered {}",
                    goal.id, goal.name, state, goal.interval, goal.trigger_count
                );
            }
            Ok(())
        }
        GoalAction::Pause { id } => watch.pause_goal(&id),
        GoalAction::Resume { id } => watch.resume_goal(&id),
        GoalAction::Remove { id } => watch.remove_goal(&id),
    };
    if result.is_ok() {
        watch.save_goals().await?;
    }

    app.shutdown().await;
    result
}

fn which(binary: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(binary).is_file()))
        .unwrap_or(false)
}
