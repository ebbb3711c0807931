//! Terminal styling for CLI output

use aion::{EngineState, Metrics, Section};

/// ANSI color codes
pub mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";

    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const CYAN: &str = "\x1b[36m";
    pub const WHITE: &str = "\x1b[37m";
    pub const GRAY: &str = "\x1b[90m";
}

use colors::*;

pub fn style_bold(s: &str) -> String {
    format!("{}{}{}", BOLD, s, RESET)
}

pub fn style_dim(s: &str) -> String {
    format!("{}{}{}", DIM, s, RESET)
}

pub fn style_cyan(s: &str) -> String {
    format!("{}{}{}", CYAN, s, RESET)
}

pub fn icon_success() -> String {
    format!("{}✓{}", GREEN, RESET)
}

pub fn icon_error() -> String {
    format!("{}✗{}", RED, RESET)
}

pub fn icon_warning() -> String {
    format!("{}⚠{}", YELLOW, RESET)
}

pub fn icon_info() -> String {
    format!("{}ℹ{}", CYAN, RESET)
}

pub fn print_success(msg: &str) {
    println!("{} {}", icon_success(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}{}{}", icon_error(), RED, msg, RESET);
}

pub fn print_warning(msg: &str) {
    println!("{} {}{}{}", icon_warning(), YELLOW, msg, RESET);
}

pub fn print_info(msg: &str) {
    println!("{} {}", icon_info(), msg);
}

pub fn print_header(title: &str) {
    println!();
    println!(
        "{}{} {} {}{}",
        BOLD,
        CYAN,
        title,
        "─".repeat(50usize.saturating_sub(title.len())),
        RESET
    );
    println!();
}

pub fn print_section(title: &str) {
    println!();
    println!("  {}{}{}", BOLD, title, RESET);
    println!("  {}", style_dim(&"─".repeat(40)));
}

pub fn print_key_value(key: &str, value: &str) {
    println!("  {}{}:{} {}", GRAY, key, RESET, value);
}

pub fn print_key_value_colored(key: &str, value: &str, color: &str) {
    println!("  {}{}:{} {}{}{}", GRAY, key, RESET, color, value, RESET);
}

pub fn state_color(state: EngineState) -> &'static str {
    match state {
        EngineState::Idle => WHITE,
        EngineState::Submitting | EngineState::AwaitingResult => YELLOW,
        EngineState::Completed => GREEN,
        EngineState::Failed => RED,
    }
}

/// Numeric scores at one decimal, evaluator diagnostic shown apart
pub fn print_metrics(metrics: &Metrics) {
    let rendered = metrics.render();
    if rendered.is_empty() && metrics.diagnostic().is_none() {
        return;
    }

    print_section("Metrics");
    for metric in rendered {
        print_key_value_colored(&metric.label, &metric.value, GREEN);
    }
    if let Some(diagnostic) = metrics.diagnostic() {
        print_key_value_colored("Evaluator note", &diagnostic, YELLOW);
    }
}

pub fn print_navigation(sections: &[Section]) {
    let names: Vec<String> = sections.iter().map(|s| style_cyan(s.title())).collect();
    print_key_value("Sections", &names.join(&style_dim(" · ")));
}
