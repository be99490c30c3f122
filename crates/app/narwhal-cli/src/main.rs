// Import and re-export the `error` module
pub use self::error::{Error, Result};
mod error;

use std::io::BufRead;
use std::path::Path;

use clap::Parser;
use cli::{Cli, Commands};
use narwhal_core::auth::password::PasswordHasher;
use narwhal_core::rbac::{PolicyEngine, dsl};

mod cli;
mod logging;

fn main() -> Result<()> {
    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<()> {
    logging::init()?;

    let args = Cli::parse();

    match args.command {
        Commands::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), narwhal_core::version());
        }
        Commands::HashPassword { password, cost } => {
            let password = match password {
                Some(p) => p,
                None => read_password()?,
            };
            let hasher = PasswordHasher::new(cost)?;
            println!("{}", hasher.hash(&password)?);
        }
        Commands::CheckPolicy { file, render } => check_policy(&file, render)?,
    }

    Ok(())
}

fn read_password() -> Result<String> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err(Error::Custom("no password given".into()));
    }
    Ok(password)
}

fn check_policy(file: &Path, render: bool) -> Result<()> {
    let text = std::fs::read_to_string(file)?;
    let snapshot = dsl::parse(&text)?;
    let engine = PolicyEngine::from_snapshot(snapshot)?;

    let roles = engine.list_roles();
    log::info!("{}: {} roles", file.display(), roles.len());
    if render {
        print!("{}", dsl::render(&engine.snapshot()));
    } else {
        for role in roles {
            println!(
                "{}\t{} permissions\tparents: {}",
                role.name,
                role.permissions.len(),
                role.parents.iter().cloned().collect::<Vec<_>>().join(",")
            );
        }
    }
    Ok(())
}
