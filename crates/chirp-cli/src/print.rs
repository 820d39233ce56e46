#![deny(clippy::all, clippy::pedantic)]

use chirp_api_types::PostWithAuthor;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;

use crate::client::CliError;

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::Server(format!("failed to render output: {e}")))?;
    println!("{out}");
    Ok(())
}

pub fn print_plain(posts: &[PostWithAuthor]) {
    for entry in posts {
        println!("{}", plain_line(entry));
    }
}

/// `<rfc3339 timestamp>  @<username>  <content>`
pub fn plain_line(entry: &PostWithAuthor) -> String {
    let when = entry
        .post
        .created_at
        .format(&Rfc3339)
        .unwrap_or_else(|_| entry.post.created_at.to_string());
    format!("{when}  @{}  {}", entry.author.username, entry.post.content)
}
