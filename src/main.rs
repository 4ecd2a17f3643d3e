//! The pgit binary: argument parsing, deadlines, and error rendering.

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use pgit::command;
use pgit::errors::PgitError;
use pgit::internal::fetch::{HEAVY_DEADLINE_SECS, READ_DEADLINE_SECS, with_deadline};

#[derive(Parser, Debug)]
#[command(name = "pgit", version, about = "Version control over a relational database")]
struct Cli {
    /// Verbose diagnostics on stderr
    #[arg(long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Init(command::init::InitArgs),
    Add(command::add::AddArgs),
    Rm(command::rm::RmArgs),
    Mv(command::mv::MvArgs),
    Reset(command::reset::ResetArgs),
    Status(command::status::StatusArgs),
    Commit(command::commit::CommitArgs),
    Log(command::log::LogArgs),
    Diff(command::diff::DiffArgs),
    Show(command::show::ShowArgs),
    Checkout(command::checkout::CheckoutArgs),
    Blame(command::blame::BlameArgs),
    Remote(command::remote::RemoteArgs),
    Push(command::push::PushArgs),
    Pull(command::pull::PullArgs),
    Resolve(command::resolve::ResolveArgs),
    Clone(command::clone::CloneArgs),
    Search(command::search::SearchArgs),
    Clean(command::clean::CleanArgs),
    Stats(command::stats::StatsArgs),
    Config(command::config::ConfigArgs),
}

async fn dispatch(command: Commands) -> Result<(), PgitError> {
    match command {
        Commands::Init(args) => command::init::execute(args).await,
        Commands::Add(args) => command::add::execute(args).await,
        Commands::Rm(args) => command::rm::execute(args).await,
        Commands::Mv(args) => command::mv::execute(args).await,
        Commands::Reset(args) => command::reset::execute(args).await,
        Commands::Status(args) => {
            with_deadline(READ_DEADLINE_SECS, command::status::execute(args)).await
        }
        Commands::Commit(args) => command::commit::execute(args).await,
        Commands::Log(args) => with_deadline(READ_DEADLINE_SECS, command::log::execute(args)).await,
        Commands::Diff(args) => {
            with_deadline(READ_DEADLINE_SECS, command::diff::execute(args)).await
        }
        Commands::Show(args) => {
            with_deadline(READ_DEADLINE_SECS, command::show::execute(args)).await
        }
        Commands::Checkout(args) => {
            with_deadline(HEAVY_DEADLINE_SECS, command::checkout::execute(args)).await
        }
        Commands::Blame(args) => {
            with_deadline(HEAVY_DEADLINE_SECS, command::blame::execute(args)).await
        }
        Commands::Remote(args) => command::remote::execute(args).await,
        Commands::Push(args) => command::push::execute(args).await,
        Commands::Pull(args) => command::pull::execute(args).await,
        Commands::Resolve(args) => command::resolve::execute(args).await,
        Commands::Clone(args) => command::clone::execute(args).await,
        Commands::Search(args) => {
            with_deadline(READ_DEADLINE_SECS, command::search::execute(args)).await
        }
        Commands::Clean(args) => command::clean::execute(args).await,
        Commands::Stats(args) => {
            with_deadline(READ_DEADLINE_SECS, command::stats::execute(args)).await
        }
        Commands::Config(args) => command::config::execute(args).await,
    }
}

fn render_error(err: &PgitError) {
    eprintln!("{} {err}", "Error:".red().bold());
    if let Some(detail) = err.detail() {
        for line in detail.lines() {
            eprintln!("  {line}");
        }
    }
    if let Some(hint) = err.hint() {
        eprintln!("{} {hint}", "Hint:".cyan());
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if cli.no_color {
        colored::control::set_override(false);
    }
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pgit=debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pgit=warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(err) = dispatch(cli.command).await {
        render_error(&err);
        std::process::exit(err.exit_code());
    }
}
