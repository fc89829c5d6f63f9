use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
};

use filegate_server::{SqliteUserStore, UserManager};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the SQLite user database (created if missing).
    #[clap(value_parser = parse_path)]
    pub user_db: PathBuf,
}

#[derive(Parser)]
struct InnerCli {
    #[command(subcommand)]
    command: InnerCommand,
}

#[derive(Subcommand)]
enum InnerCommand {
    AddUser { handle: String },
    ListUsers,
    AddLogin { handle: String, password: String },
    UpdateLogin { handle: String, password: String },
    DeleteLogin { handle: String },
    Exit,
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();
    let user_store = SqliteUserStore::new(&cli_args.user_db)
        .with_context(|| format!("Could not open user database {:?}", cli_args.user_db))?;
    let mut user_manager = UserManager::new(Box::new(user_store));

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    loop {
        print!("> ");
        io::stdout().flush().context("Failed to flush stdout")?;

        let mut line = String::new();
        reader.read_line(&mut line).context("Failed to read line")?;
        let line = line.trim();

        if line.is_empty() {
            continue;
        }

        let args = shlex::split(line)
            .unwrap_or_else(|| line.split_whitespace().map(String::from).collect());
        let cli =
            InnerCli::try_parse_from(std::iter::once(" ").chain(args.iter().map(String::as_str)));

        match cli {
            Ok(cli) => match cli.command {
                InnerCommand::AddUser { handle } => {
                    if let Err(err) = user_manager.add_user(&handle) {
                        eprintln!("Something went wrong: {}", err);
                        continue;
                    }
                }
                InnerCommand::ListUsers => match user_manager.get_all_user_handles() {
                    Ok(handles) => {
                        for handle in handles {
                            println!("{}", handle);
                        }
                    }
                    Err(err) => {
                        eprintln!("Something went wrong: {}", err);
                        continue;
                    }
                },
                InnerCommand::AddLogin { handle, password } => {
                    if let Err(err) = user_manager.create_password_credentials(&handle, password) {
                        eprintln!("Something went wrong: {}", err);
                        continue;
                    }
                }
                InnerCommand::UpdateLogin { handle, password } => {
                    if let Err(err) = user_manager.update_password_credentials(&handle, password) {
                        eprintln!("Something went wrong: {}", err);
                        continue;
                    }
                }
                InnerCommand::DeleteLogin { handle } => {
                    if let Err(err) = user_manager.delete_password_credentials(&handle) {
                        eprintln!("Something went wrong: {}", err);
                        continue;
                    }
                }
                InnerCommand::Exit => break,
            },
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        }
        println!("Done.");
    }
    Ok(())
}
