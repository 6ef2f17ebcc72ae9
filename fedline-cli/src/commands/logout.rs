//! Sign out and forget the session.

use crate::app::App;

/// Run the logout command.
pub async fn run(app: &App) {
    let was_signed_in = app.sessions.current_session().is_some();
    app.sessions.sign_out().await;

    if was_signed_in {
        println!("Signed out. Cached timelines are kept.");
    } else {
        println!("Not signed in.");
    }
}
