//! Agents command - list the agent directory

use crate::style::*;
use aion::{ClientConfig, Section};
use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};

pub async fn run(config: ClientConfig) -> Result<()> {
    let (client, session) = super::restored(config).await?;
    super::require(Section::Agents, &session)?;

    let listing = client.agents.fetch().await;
    if let Some(error) = &listing.error {
        print_error(&format!("Could not load agents: {}", error));
        return Ok(());
    }
    if listing.agents.is_empty() {
        print_warning("No agents available");
        return Ok(());
    }

    print_header("Agents");
    let default = listing.default_selection();
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["", "ID", "Name", "Description"]);
    for agent in &listing.agents {
        let marker = if Some(agent.id.as_str()) == default { "*" } else { "" };
        table.add_row(vec![
            marker,
            agent.id.as_str(),
            agent.name.as_str(),
            agent.description.as_deref().unwrap_or(""),
        ]);
    }
    println!("{table}");
    println!("  {}", style_dim("* used by `aion run` when no --agent is given"));
    Ok(())
}
