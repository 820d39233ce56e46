//! Command-line surface for `chirp-cli`.

#![deny(clippy::all, clippy::pedantic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "chirp-cli", version, about = "Chirp RPC command-line client", long_about = None)]
pub struct Cli {
    /// Server base URL, e.g. <https://chirp.example.com>
    #[arg(long, env = "CHIRP_SITE_URL")]
    pub site: Option<String>,

    /// Path to a file containing a session token (takes precedence over env)
    #[arg(long, env = "CHIRP_SESSION_TOKEN_FILE")]
    pub token_file: Option<PathBuf>,

    /// Session token from env (no CLI flag to keep it out of shell history)
    #[arg(hide = true, env = "CHIRP_SESSION_TOKEN")]
    pub token_env: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the global feed, newest first
    Feed {
        /// Print one line per post instead of JSON
        #[arg(long)]
        plain: bool,
    },
    /// Show a single post
    Show { id: Uuid },
    /// Publish a new post (requires a session token)
    Create { content: String },
    /// Look up a public profile by username
    Profile { username: String },
    /// List a user's posts, newest first
    UserPosts {
        user_id: String,
        #[arg(long)]
        plain: bool,
    },
}
