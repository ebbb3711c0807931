//! Config command - print the effective configuration

use crate::style::*;
use aion::ClientConfig;
use anyhow::Result;

pub fn run(config: &ClientConfig) -> Result<()> {
    print_header("Configuration");
    print_key_value("API", config.base_url()?.as_str());
    if config.push_enabled {
        print_key_value("Updates", config.push_endpoint()?.as_str());
    } else {
        print_key_value_colored("Updates", "disabled (polling only)", colors::YELLOW);
    }
    print_key_value("Poll interval", &format!("{} ms", config.poll_interval_ms));
    print_key_value("Request timeout", &format!("{} s", config.request_timeout_secs));
    print_key_value("Poll failures tolerated", &config.max_poll_failures.to_string());
    print_key_value("Credentials", &config.credentials_file().display().to_string());

    print_section("TOML");
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
