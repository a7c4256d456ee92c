//! CLI module
//!
//! This module provides the command-line interface for mindflow: the dashboard
//! commands, an interactive discovery session and the API server.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use crate::{
    api::{serve, ServerConfig},
    app::{Core, CoreError},
    config::{self, Config},
    dialogue::DialogueSession,
    models::{self, Origin, Task, TaskId},
    store::StoreError,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// File holding the task list
    #[arg(long, env = "MINDFLOW_DATA")]
    data_file: Option<PathBuf>,

    /// How long the discovery dialogue thinks before replying, in milliseconds
    #[arg(long, env = "MINDFLOW_THINKING_MS", default_value_t = config::DEFAULT_THINKING_MS)]
    thinking_ms: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the mindflow API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 3000)]
        port: u16,
    },

    /// Show the dashboard
    Tasks,

    /// Add a task
    Add {
        /// Task title
        title: String,

        /// Origin label; defaults to the quick-add label
        #[arg(short, long)]
        context: Option<String>,
    },

    /// Toggle a task between done and not done
    Toggle {
        /// Task id
        id: String,
    },

    /// Delete a task
    Delete {
        /// Task id
        id: String,
    },

    /// Break a task down into subtasks
    Breakdown {
        /// Task id
        id: String,
    },

    /// List the example cases offered during discovery
    Catalog,

    /// Talk through what is on your mind and turn it into a task
    Discover,

    /// Generate shell completions
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    fn config(&self) -> Config {
        let mut config = Config {
            thinking_latency: Duration::from_millis(self.thinking_ms),
            ..Config::default()
        };
        if let Some(path) = &self.data_file {
            config.data_file = path.clone();
        }
        config
    }
}

/// Run the CLI application
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_filter = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    init_tracing(default_filter);

    let config = cli.config();

    match &cli.command {
        Commands::Serve { port } => {
            println!("Starting mindflow API server on port {}...", port);
            println!("Tasks are stored in {}", config.data_file.display());

            let core = Core::from_config(&config)?;
            let server_config = ServerConfig {
                address: ([127, 0, 0, 1], *port).into(),
            };

            serve(core, server_config).await?;
            Ok(())
        }

        Commands::Tasks => {
            let core = Core::from_config(&config)?;
            core.enter_dashboard();
            print_dashboard(&core.tasks());
            Ok(())
        }

        Commands::Add { title, context } => {
            let core = Core::from_config(&config)?;
            let task = match context {
                Some(context) => core.create_task(title, Some(context.as_str())),
                None => core.quick_add(title),
            }?;
            celebrate(&task);
            Ok(())
        }

        Commands::Toggle { id } => {
            let core = Core::from_config(&config)?;
            report(core.toggle_complete(&TaskId::new(id.as_str())), |task| {
                let state = if task.is_completed() { "done" } else { "not done" };
                println!("Marked \"{}\" as {}", task.title(), state);
            })
        }

        Commands::Delete { id } => {
            let core = Core::from_config(&config)?;
            report(core.delete_task(&TaskId::new(id.as_str())), |task| {
                println!("Deleted \"{}\"", task.title());
            })
        }

        Commands::Breakdown { id } => {
            let core = Core::from_config(&config)?;
            let result = core.breakdown(&TaskId::new(id.as_str())).await;
            report(result, print_task)
        }

        Commands::Catalog => {
            for case in models::catalog() {
                print_catalog_case(case);
            }
            Ok(())
        }

        Commands::Discover => {
            let core = Core::from_config(&config)?;
            discover(&core).await
        }

        Commands::Completions { shell } => {
            // Generate completions for the specified shell
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, bin_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Prints the outcome of a task operation. A missing task is only a warning.
fn report<F>(result: Result<Task, CoreError>, on_success: F) -> Result<(), Box<dyn std::error::Error>>
where
    F: FnOnce(&Task),
{
    match result {
        Ok(task) => {
            on_success(&task);
            Ok(())
        }
        Err(CoreError::Store(StoreError::NotFound(id))) => {
            println!("{} no task with id {}", "warning:".yellow(), id);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Runs a discovery session on stdin/stdout until the user acts or quits
async fn discover(core: &Core) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut printed = 0;

    core.start_discovery();

    loop {
        let session = match core.session() {
            Some(session) => session,
            None => return Ok(()),
        };

        printed = print_new_messages(&session, printed);
        print_choices(&session);

        let Some(line) = lines.next_line().await? else {
            core.close_discovery();
            return Ok(());
        };
        let input = line.trim();

        if input.eq_ignore_ascii_case("q") {
            core.close_discovery();
            println!("Closed.");
            return Ok(());
        }

        if input.eq_ignore_ascii_case("a") {
            match core.take_action() {
                Ok(task) => {
                    celebrate(&task);
                    print_dashboard(&core.tasks());
                    return Ok(());
                }
                Err(e) => {
                    println!("{} {}", "warning:".yellow(), e);
                    continue;
                }
            }
        }

        if let Some(case_id) = input
            .strip_prefix('c')
            .and_then(|rest| rest.parse::<u32>().ok())
        {
            match core.pick_catalog(case_id) {
                Ok(task) => {
                    celebrate(&task);
                    print_dashboard(&core.tasks());
                    return Ok(());
                }
                Err(e) => {
                    println!("{} {}", "warning:".yellow(), e);
                    continue;
                }
            }
        }

        let chosen = input
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| session.options().get(i))
            .filter(|option| !option.is_action())
            .map(|option| option.label().to_string());

        match chosen {
            Some(text) => {
                let pending = core.select_option(&text)?;
                println!("{}", "...".dimmed());
                pending.wait().await;
            }
            None => println!("{} pick one of the listed choices", "warning:".yellow()),
        }
    }
}

fn print_new_messages(session: &DialogueSession, already_printed: usize) -> usize {
    for message in session.messages().iter().skip(already_printed) {
        match message.origin {
            Origin::Ai => println!("{} {}", "mindflow:".cyan().bold(), message.text),
            Origin::User => println!("{} {}", "you:".bold(), message.text),
        }
    }
    session.messages().len()
}

fn print_choices(session: &DialogueSession) {
    println!();
    for (i, option) in session.options().iter().enumerate() {
        if option.is_action() {
            println!("  [a] {}", option.label().green().bold());
        } else {
            println!("  [{}] {}", i + 1, option.label());
        }
    }
    if session.catalog_available() {
        println!("\n  Or see what others are doing:");
        for case in models::catalog() {
            println!("  [c{}] {} {}", case.id, case.title, case.tags.join(" / ").dimmed());
        }
    }
    println!("  [q] close");
}

fn print_dashboard(tasks: &[Task]) {
    let done = tasks.iter().filter(|t| t.is_completed()).count();
    println!(
        "{} {} pending, {} done",
        "Today:".bold(),
        tasks.len() - done,
        done
    );

    if tasks.is_empty() {
        println!("  No tasks yet. Add some with 'mindflow add <title>'");
        return;
    }
    for task in tasks {
        print_task(task);
    }
}

fn print_task(task: &Task) {
    let marker = if task.is_completed() {
        "[x]".green()
    } else {
        "[ ]".normal()
    };
    let title = if task.is_completed() {
        task.title().strikethrough().dimmed()
    } else {
        task.title().normal()
    };
    print!("  {} {} {}", marker, title, format!("({})", task.id()).dimmed());
    if let Some(context) = task.context() {
        print!("  {}", format!("from: {}", context).dimmed());
    }
    println!();

    if let Some(subtasks) = task.subtasks() {
        for subtask in subtasks {
            println!("      • {}", subtask);
        }
    }
}

fn print_catalog_case(case: &models::CatalogCase) {
    println!(
        "{}. {} {}",
        case.id,
        case.title.bold(),
        case.tags.join(" / ").dimmed()
    );
    println!("   {}", case.description);
}

fn celebrate(task: &Task) {
    println!("{} {}", "✨ Added:".green().bold(), task.title());
}
