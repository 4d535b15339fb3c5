use console::style;
use keel_config::{KeelConfig, WarningSeverity};
use keel_core::{Boundary, KeelError};
use keel_governance::{BoundaryClassifier, sanitize_text};
use std::io::Read;

use super::ConfigAction;

pub(super) fn cmd_sanitize(text: Option<String>, json: bool) -> keel_core::Result<()> {
    let input = match text {
        Some(text) => text,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let clean = sanitize_text(&input);

    if json {
        let out = serde_json::json!({
            "text": clean.text,
            "notes": clean.notes,
            "report": clean.report,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}", clean.text);
    eprintln!();
    for note in &clean.notes {
        eprintln!("  {} {note}", style("note:").dim());
    }
    if clean.report.is_clean() {
        eprintln!("  {}", style("no threats detected").green());
        return Ok(());
    }
    for threat in &clean.report.threats {
        eprintln!("  {} {threat}", style("threat:").yellow());
    }
    match &clean.report.review_reason {
        Some(reason) => eprintln!("  {} {reason}", style("review required:").red().bold()),
        None => eprintln!("  {}", style("no review required").yellow()),
    }
    Ok(())
}

pub(super) fn cmd_policy() -> keel_core::Result<()> {
    for (boundary, members) in BoundaryClassifier.table() {
        let label = match boundary {
            Boundary::Forbidden => style(boundary.as_str()).red().bold(),
            Boundary::AutoExecute => style(boundary.as_str()).green().bold(),
            Boundary::HoldQueue => style(boundary.as_str()).yellow().bold(),
            Boundary::RequiresApproval => style(boundary.as_str()).cyan().bold(),
        };
        println!("{label}");
        for action_type in members {
            println!("  {action_type}");
        }
    }
    Ok(())
}

pub(super) fn cmd_config(config: &KeelConfig, action: ConfigAction) -> keel_core::Result<()> {
    match action {
        ConfigAction::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!(
                    "{}",
                    toml::to_string_pretty(config).map_err(|e| KeelError::Config(e.to_string()))?
                );
            }
        }
        ConfigAction::Validate => {
            // Loading already rejected hard errors; only warnings can remain.
            let warnings = config.validate().map_err(KeelError::Config)?;
            if warnings.is_empty() {
                println!("{} configuration is valid", style("ok").green().bold());
            }
            for w in &warnings {
                let marker = match w.severity {
                    WarningSeverity::Error => style("error").red().bold(),
                    WarningSeverity::Warning => style("warning").yellow(),
                };
                println!("  {marker}: {}: {}", w.field, w.message);
                if let Some(hint) = &w.hint {
                    println!("    {}", style(hint).dim());
                }
            }
        }
    }
    Ok(())
}
