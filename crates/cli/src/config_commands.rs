//! `herald check-config`: print validation diagnostics.

use std::path::Path;

use {
    anyhow::Result,
    herald_config::{HeraldConfig, Severity, ValidationResult, validate},
};

const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const GREEN: &str = "\x1b[32m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

pub fn handle_check_config(config: &HeraldConfig, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => eprintln!("{BOLD}config:{RESET} {}", path.display()),
        None => eprintln!("{BOLD}config:{RESET} (none found, defaults + environment)"),
    }

    let result = validate(config);
    print_report(&result);

    let errors = result.count(Severity::Error);
    if errors > 0 {
        anyhow::bail!("configuration has {errors} error(s)");
    }
    Ok(())
}

fn print_report(result: &ValidationResult) {
    if result.diagnostics.is_empty() {
        eprintln!("  [{GREEN}ok{RESET}]  no problems found");
        return;
    }
    for diagnostic in &result.diagnostics {
        let color = match diagnostic.severity {
            Severity::Error => RED,
            Severity::Warning => YELLOW,
        };
        eprintln!(
            "  [{color}{}{RESET}]  {}: {}",
            diagnostic.severity, diagnostic.path, diagnostic.message
        );
    }
    eprintln!(
        "\n{BOLD}Summary:{RESET} {} error(s), {} warning(s)",
        result.count(Severity::Error),
        result.count(Severity::Warning)
    );
}
