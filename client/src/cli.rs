use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[clap(author, version)]
#[clap(name = "Pulsar Boost Client")]
#[clap(about = "Boosted reasoning over a chat-completion endpoint", long_about = None)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    Solve(SolveCommand),
    Complete(CompleteCommand),
}

#[derive(Args)]
#[clap(about = "Searches over reasoning trajectories before answering", long_about = None)]
pub struct SolveCommand {
    #[clap(short, long, default_value_t = String::from("pulsar.conf"))]
    pub config: String,

    /// The question to solve.
    pub question: String,

    #[clap(long)]
    pub rollouts: Option<usize>,

    #[clap(long)]
    pub depth: Option<usize>,

    /// Skip the search and forward the question as a plain completion.
    #[clap(long)]
    pub no_boost: bool,
}

#[derive(Args)]
#[clap(about = "Plain streamed chat completion", long_about = None)]
pub struct CompleteCommand {
    #[clap(short, long, default_value_t = String::from("pulsar.conf"))]
    pub config: String,

    pub question: String,
}
