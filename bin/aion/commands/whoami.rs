//! Whoami command - show the restored identity

use crate::style::*;
use aion::{Access, ClientConfig, SessionStatus};
use anyhow::Result;

pub async fn run(config: ClientConfig) -> Result<()> {
    let (client, session) = super::restored(config).await?;
    client.shutdown();

    if session.status != SessionStatus::Authenticated {
        print_warning("Not logged in. Run `aion login` first.");
        return Ok(());
    }

    print_header("Session");
    if let Some(identity) = &session.identity {
        print_key_value("Username", &identity.username);
        print_key_value("Role", &identity.role);
        if let Some(name) = &identity.full_name {
            print_key_value("Name", name);
        }
        if let Some(email) = &identity.email {
            print_key_value("Email", email);
        }
    }
    print_key_value("Backend", client.sessions.api().base_url().as_str());
    print_navigation(&Access::navigation(&session));
    println!();
    Ok(())
}
