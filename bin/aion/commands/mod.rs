//! Subcommand implementations

pub mod agents;
pub mod config;
pub mod login;
pub mod logout;
pub mod run;
pub mod whoami;

use aion::{Access, Client, ClientConfig, Section, Session};
use anyhow::{bail, Result};

/// Build the client and resume the saved session
pub async fn restored(config: ClientConfig) -> Result<(Client, Session)> {
    let client = Client::new(config)?;
    let session = client.sessions.restore_session().await;
    Ok((client, session))
}

/// Refuse to continue unless `section` is reachable
pub fn require(section: Section, session: &Session) -> Result<()> {
    match Access::check(section, session) {
        Access::Allowed => Ok(()),
        Access::Redirect(Section::Login) => bail!("Not logged in. Run `aion login` first."),
        Access::Redirect(_) => bail!("{} requires an administrator account", section),
    }
}
