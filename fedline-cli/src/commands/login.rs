//! Sign in with handle and password.

use anyhow::{Context, Result};

use fedline_client::ClientError;
use fedline_types::Secret;

use crate::app::App;

/// Run the login command.
pub async fn run(app: &App, handle: &str, password: Option<String>) -> Result<()> {
    let password = match password {
        Some(p) => Secret::new(p),
        None => prompt_password(&format!("Password for {}: ", handle))?,
    };

    let session = app
        .sessions
        .begin_credential_login(handle, password)
        .await
        .map_err(explain)?;

    println!("Signed in.");
    println!();
    println!("  Handle: {}", session.handle());
    println!("  DID:    {}", session.did());
    println!();
    println!("Next: fedline timeline");

    Ok(())
}

/// Turn a login failure into something a person can act on.
pub fn explain(error: ClientError) -> anyhow::Error {
    match error {
        ClientError::InvalidCredentials => anyhow::anyhow!("Wrong handle or password"),
        ClientError::NoConnectivity(detail) => {
            anyhow::anyhow!("No connection to the service ({detail})")
        }
        ClientError::AuthorizationDenied(reason) => {
            anyhow::anyhow!("Authorization was denied: {reason}")
        }
        ClientError::StateMismatch => {
            anyhow::anyhow!("The callback does not belong to this login attempt")
        }
        other => anyhow::Error::new(other).context("Login failed"),
    }
}

/// Prompt for a password with echo suppression.
fn prompt_password(prompt: &str) -> Result<Secret> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    if password.is_empty() {
        anyhow::bail!("Password must not be empty");
    }
    Ok(Secret::new(password))
}
