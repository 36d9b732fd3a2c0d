use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tree_updater::{
    init_logging, send_get, AssumeYes, NetworkHooks, Prompt, SessionState, SteamLocator,
    UpdateCheck, UpdateSession, UpdateStatus,
};

const DEFAULT_CONFIG: &str = "updater.yaml";

/// Keeps an installed game tree up to date with the latest build.
#[derive(Parser)]
#[command(name = "tree-updater")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to updater.yaml
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Answer yes to every question
    #[arg(short = 'y', long)]
    yes: bool,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,

    /// Without a command, an interactive menu is shown.
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Compare the installed version with the latest build
    Check,
    /// Install the latest build's changes, finishing an interrupted update first
    Update,
    /// Download the full build and replace the installed tree with it
    Install,
    /// Delete *.cache and *.tmp files from the installed tree
    CleanTemp,
}

/// Asks questions on stdin/stdout.
struct ConsolePrompt;

impl ConsolePrompt {
    fn read_line(&self) -> Option<String> {
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }
}

impl Prompt for ConsolePrompt {
    fn confirm(&self, message: &str) -> bool {
        print!("{} [y/N] ", message);
        let _ = std::io::stdout().flush();
        matches!(
            self.read_line().as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("y" | "yes")
        )
    }

    /// Asks until a listed option is picked. `None` only once stdin is closed.
    fn choose(&self, message: &str, options: &[&str]) -> Option<usize> {
        loop {
            println!("{}", message);
            for (index, option) in options.iter().enumerate() {
                println!("  {}) {}", index + 1, option);
            }
            print!("> ");
            let _ = std::io::stdout().flush();
            let answer = self.read_line()?;
            match answer.parse::<usize>() {
                Ok(choice) if (1..=options.len()).contains(&choice) => return Some(choice - 1),
                _ => println!("Please pick one of the listed options."),
            }
        }
    }
}

/// Like the library's default download, with a progress bar.
fn download_with_progress(url: &str, path: &Path) -> anyhow::Result<()> {
    let mut response = send_get(url).with_context(|| format!("Failed to download {url}"))?;

    let bar = match response.content_length() {
        Some(length) => ProgressBar::new(length),
        None => ProgressBar::no_length(),
    };
    bar.set_style(
        ProgressStyle::with_template("{msg} [{bar:40}] {bytes}/{total_bytes} ({eta})")?
            .progress_chars("=> "),
    );
    bar.set_message(url.rsplit('/').next().unwrap_or(url).to_string());

    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    response.copy_to(&mut bar.wrap_write(&mut writer))?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    bar.finish_and_clear();
    Ok(())
}

fn check(session: &mut UpdateSession) -> UpdateStatus {
    match session.check() {
        Ok(UpdateCheck::NotInstalled) => {
            println!(
                "Nothing installed at {}.",
                session.config().installed_tree().display()
            );
            UpdateStatus::NotInstalled
        }
        Ok(UpdateCheck::Interrupted(progress)) => {
            println!(
                "An update from {} to {} was interrupted. Run `update` to finish it.",
                progress.old_version, progress.new_version
            );
            UpdateStatus::NoUpdate
        }
        Ok(UpdateCheck::UpToDate { local }) => {
            println!("Up to date ({}).", local);
            UpdateStatus::NoUpdate
        }
        Ok(UpdateCheck::NeedsUpdate { local, remote }) => {
            println!("Update available: {} -> {}.", local, remote);
            UpdateStatus::NoUpdate
        }
        Err(err) => {
            log::error!("Update check failed: {:?}", err);
            UpdateStatus::UpdateHadError
        }
    }
}

fn run(command: Commands, session: &mut UpdateSession, prompt: &dyn Prompt) -> UpdateStatus {
    match command {
        Commands::Check => check(session),
        Commands::Update => session.update(),
        Commands::Install => session.install(prompt),
        Commands::CleanTemp => match session.delete_temp_files() {
            Ok(count) => {
                println!("Deleted {} temporary files.", count);
                UpdateStatus::NoUpdate
            }
            Err(err) => {
                log::error!("Failed to delete temporary files: {:?}", err);
                UpdateStatus::UpdateHadError
            }
        },
    }
}

fn menu(session: &mut UpdateSession, prompt: &dyn Prompt) {
    const OPTIONS: [&str; 3] = ["Check for updates", "Install the game", "Exit"];
    loop {
        let status = match prompt.choose("What would you like to do?", &OPTIONS) {
            Some(0) => match check(session) {
                UpdateStatus::NoUpdate => {
                    if session.state() == SessionState::NeedsUpdate
                        && prompt.confirm("Install it now?")
                    {
                        session.update()
                    } else {
                        UpdateStatus::NoUpdate
                    }
                }
                other => other,
            },
            Some(1) => session.install(prompt),
            _ => return,
        };
        println!("{}.", status);
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let yaml = match std::fs::read_to_string(&cli.config) {
        Ok(yaml) => yaml,
        Err(err) => {
            log::error!("Could not read {}: {}", cli.config.display(), err);
            return ExitCode::FAILURE;
        }
    };
    let hooks = NetworkHooks {
        download_file_fn: download_with_progress,
        ..NetworkHooks::default()
    };
    let steam = SteamLocator::new();
    let mut session = match UpdateSession::from_yaml(&yaml, &[&steam], hooks) {
        Ok(session) => session,
        Err(err) => {
            log::error!("Invalid configuration: {:?}", err);
            return ExitCode::FAILURE;
        }
    };

    let prompt: &dyn Prompt = if cli.yes { &AssumeYes } else { &ConsolePrompt };
    let Some(command) = cli.command else {
        if cli.yes {
            log::error!("--yes needs a command, the menu is interactive");
            return ExitCode::FAILURE;
        }
        menu(&mut session, prompt);
        return ExitCode::SUCCESS;
    };
    let status = run(command, &mut session, prompt);
    println!("{}.", status);
    match status {
        UpdateStatus::UpdateHadError
        | UpdateStatus::UpdateAlreadyInProgress
        | UpdateStatus::NotInstalled => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}
