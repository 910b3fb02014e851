use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "agentdeck", version, about = "Multi-agent session orchestrator for tmux")]
pub struct Cli {
    /// Profile to operate on (defaults to $PROFILE, then "default").
    #[arg(long, global = true)]
    pub profile: Option<String>,

    /// Verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the orchestrator core until interrupted.
    Run,
    /// List sessions with their current status.
    List,
    /// Check that tmux and the supported tool binaries are reachable.
    Doctor,
    /// Manage watch goals.
    Goals {
        #[command(subcommand)]
        action: GoalAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum GoalAction {
    /// List configured watch goals.
    List,
    /// Pause a goal.
    Pause { id: String },
    /// Resume a paused goal.
    Resume { id: String },
    /// Remove a goal.
    Remove { id: String },
}
