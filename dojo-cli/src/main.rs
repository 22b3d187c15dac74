use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dojo_core::{KataView, Priority};

mod app;
mod auth;
mod config;
mod focus;
mod kata;
mod render;
mod state;

use app::App;

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("DOJO_BUILD_SHA"), ")");

#[derive(Parser, Debug)]
#[command(name = "dojo", version = VERSION, about = "Train in katas, strike the gong, earn your rank")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage ~/.dojo/config.toml
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Sign up, sign in and out
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },

    /// Create, schedule and finish katas
    Kata {
        #[command(subcommand)]
        command: KataCommand,
    },

    /// Show rank and XP
    Profile,

    /// Full-screen countdown for the active kata (g = gong, q = quit)
    Focus,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Write a default config file if none exists
    Init,
    /// Print the effective config (file plus environment)
    Show,
}

#[derive(Subcommand, Debug)]
enum AuthCommand {
    /// Create an account
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        username: String,
        /// Prompted when omitted
        #[arg(long)]
        password: Option<String>,
    },

    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        /// Prompted when omitted
        #[arg(long)]
        password: Option<String>,
    },

    /// Sign in with Google in the browser
    Google,

    Logout,

    /// Who is signed in
    Status,
}

#[derive(Subcommand, Debug)]
enum KataCommand {
    /// List katas
    List {
        /// today, upcoming or all
        #[arg(long, default_value = "today")]
        view: KataView,
    },

    /// Schedule a new kata
    Add {
        #[arg(long)]
        title: String,

        /// low, medium or high
        #[arg(long, default_value = "medium")]
        priority: Priority,

        /// Local time "YYYY-MM-DD HH:MM" (or RFC 3339)
        #[arg(long)]
        start: String,

        #[arg(long, conflicts_with = "length")]
        end: Option<String>,

        /// Length instead of an end time, e.g. 45m or 1h30m
        #[arg(long = "for", id = "length")]
        length: Option<String>,
    },

    /// Focus on a kata
    Start { id: String },

    /// Clear the focus
    Stop,

    /// Strike the gong: complete a kata (defaults to the active one)
    Gong { id: Option<String> },

    /// Mark a kata failed
    Fail { id: String },

    /// Change title or priority
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        priority: Option<Priority>,
    },

    Delete { id: String },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("DOJO_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("failed to install tracing subscriber: {err}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    if let Command::Config { command } = &cli.command {
        return match command {
            ConfigCommand::Init => config::init_config(),
            ConfigCommand::Show => config::show_config(),
        };
    }

    let app = App::open(config::load_config()?).await?;
    let outcome = dispatch(&app, cli.command).await;
    // a refreshed token or moved focus must survive a failed command too
    app.persist()?;
    outcome
}

async fn dispatch(app: &App, command: Command) -> Result<()> {
    match command {
        Command::Config { .. } => Ok(()),

        Command::Auth { command } => match command {
            AuthCommand::Register {
                email,
                username,
                password,
            } => auth::register(app, &email, &username, password).await,
            AuthCommand::Login { email, password } => auth::login(app, &email, password).await,
            AuthCommand::Google => auth::google(app).await,
            AuthCommand::Logout => auth::logout(app).await,
            AuthCommand::Status => {
                auth::status(app);
                Ok(())
            }
        },

        Command::Kata { command } => match command {
            KataCommand::List { view } => kata::list(app, view),
            KataCommand::Add {
                title,
                priority,
                start,
                end,
                length,
            } => {
                let args = kata::AddArgs {
                    title,
                    priority,
                    start,
                    end,
                    length,
                };
                kata::add(app, &args).await
            }
            KataCommand::Start { id } => kata::start(app, &id),
            KataCommand::Stop => kata::stop(app),
            KataCommand::Gong { id } => kata::gong(app, id).await,
            KataCommand::Fail { id } => kata::fail(app, &id).await,
            KataCommand::Edit {
                id,
                title,
                priority,
            } => kata::edit(app, &id, title, priority).await,
            KataCommand::Delete { id } => kata::delete(app, &id).await,
        },

        Command::Profile => kata::profile(app),

        Command::Focus => focus::run_focus(app).await,
    }
}
