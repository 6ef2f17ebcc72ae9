//! Sign in through the browser.
//!
//! The authorization must be completed by the same process that started it,
//! so the command waits for the callback URL on stdin.

use anyhow::{Context, Result};
use std::io::{BufRead, Write};

use crate::app::App;
use crate::commands::login::explain;

/// Run the oauth command.
pub async fn run(app: &App, handle: &str, input: impl BufRead) -> Result<()> {
    let launch = app
        .sessions
        .begin_oauth_login(handle, Some(handle))
        .await
        .map_err(explain)?;

    println!("Open this URL in a browser and approve the request:");
    println!();
    println!("  {}", launch.authorization_url);
    println!();
    print!("Then paste the URL you were redirected to: ");
    std::io::stdout().flush().context("Failed to write prompt")?;

    let callback = read_callback(input)?;
    let session = app
        .sessions
        .complete_oauth_login(&callback)
        .await
        .map_err(explain)?;

    println!();
    println!("Signed in.");
    println!("  Handle: {}", session.handle());
    println!("  DID:    {}", session.did());

    Ok(())
}

/// Read one non-empty line.
fn read_callback(mut input: impl BufRead) -> Result<String> {
    let mut line = String::new();
    input
        .read_line(&mut line)
        .context("Failed to read callback URL")?;
    let callback = line.trim();
    if callback.is_empty() {
        anyhow::bail!("No callback URL given");
    }
    Ok(callback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_is_trimmed() {
        let input = b"  http://127.0.0.1/callback?code=abc&state=xyz \n" as &[u8];
        assert_eq!(
            read_callback(input).unwrap(),
            "http://127.0.0.1/callback?code=abc&state=xyz"
        );
    }

    #[test]
    fn empty_callback_is_rejected() {
        assert!(read_callback(b"\n" as &[u8]).is_err());
        assert!(read_callback(b"" as &[u8]).is_err());
    }
}
