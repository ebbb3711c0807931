//! Login command - exchange username and password for a saved session

use crate::print_banner;
use crate::style::*;
use aion::{Access, Client, ClientConfig};
use anyhow::Result;
use console::style;
use dialoguer::{theme::ColorfulTheme, Input, Password};

pub async fn run(
    config: ClientConfig,
    username: Option<String>,
    password: Option<String>,
) -> Result<()> {
    print_banner();
    print_header("Login");

    let theme = ColorfulTheme::default();
    let username = match username {
        Some(username) => username,
        None => Input::with_theme(&theme)
            .with_prompt("  Username")
            .validate_with(|input: &String| -> Result<(), &str> {
                if input.trim().is_empty() {
                    return Err("Username cannot be empty");
                }
                Ok(())
            })
            .interact_text()?,
    };
    let password = match password {
        Some(password) => password,
        None => Password::with_theme(&theme)
            .with_prompt("  Password")
            .interact()?,
    };

    let client = Client::new(config)?;
    let session = client.sessions.login(username.trim(), &password).await?;

    println!();
    print_success(&format!(
        "Logged in as {}",
        style(session.username().unwrap_or(username.trim())).cyan()
    ));
    if let Some(identity) = &session.identity {
        print_key_value("Role", &identity.role);
    }
    print_navigation(&Access::navigation(&session));
    println!();
    Ok(())
}
