//! Logout command

use crate::style::*;
use aion::{Client, ClientConfig};
use anyhow::Result;

pub fn run(config: ClientConfig) -> Result<()> {
    let client = Client::new(config)?;
    client.sessions.logout();
    print_success("Logged out");
    Ok(())
}
