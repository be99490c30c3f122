use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "narwhal", about = "Narwhal operator tooling", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the version.
    Version,

    /// Hash a password with bcrypt, for seeding users by hand.
    HashPassword {
        /// Password to hash. Read from stdin when omitted.
        password: Option<String>,

        /// bcrypt cost.
        #[arg(long, default_value_t = narwhal_core::auth::password::DEFAULT_COST)]
        cost: u32,
    },

    /// Validate a policy file and report its roles.
    CheckPolicy {
        file: PathBuf,

        /// Print the policy back in canonical form.
        #[arg(long)]
        render: bool,
    },
}
