//! Show the current session.

use fedline_types::{Session, SessionKind};

use crate::app::App;

/// Run the whoami command.
pub fn run(app: &App) {
    match app.sessions.current_session() {
        Some(session) => {
            let now = app.clock.now_millis();
            print!("{}", describe(&session, now));
        }
        None => {
            println!("Not signed in.");
            println!();
            println!("Run 'fedline login --handle <handle>' to sign in.");
        }
    }
}

/// Session summary; never includes tokens.
fn describe(session: &Session, now_ms: i64) -> String {
    let method = match session.kind() {
        SessionKind::Credentials => "password",
        SessionKind::OAuth => "oauth",
    };
    let remaining = (session.tokens().expires_at - now_ms) / 1000;
    let expiry = if remaining > 0 {
        format!("in {} minutes", remaining / 60)
    } else {
        "expired, refreshes on next use".to_string()
    };

    format!(
        "Handle: {}\nDID:    {}\nLogin:  {}\nToken:  {}\n",
        session.handle(),
        session.did(),
        method,
        expiry
    )
}
