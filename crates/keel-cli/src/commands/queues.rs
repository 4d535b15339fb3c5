use console::style;
use keel_core::KeelError;
use keel_governance::{Escalation, Governance, HeldAction, HoldStatus};

use super::{EscalationAction, HoldAction, parse_id, parse_project, truncate_output};

pub(super) async fn cmd_holds(gov: &Governance, action: HoldAction) -> keel_core::Result<()> {
    match action {
        HoldAction::List { project, status } => {
            let project = parse_project(&project)?;
            let status = status.as_deref().map(parse_hold_status).transpose()?;
            let holds = gov.holds.list_for_project(&project, status).await?;
            if holds.is_empty() {
                println!("No held actions for {project}.");
                return Ok(());
            }
            println!("{} ({})", style("Held actions").bold(), holds.len());
            for held in &holds {
                print_hold(held);
            }
        }
        HoldAction::Approve { project, id, by } => {
            let held = gov
                .holds
                .approve(&parse_project(&project)?, parse_id(&id)?, &by)
                .await?;
            println!("{} {} executed", style("ok").green().bold(), held.id);
        }
        HoldAction::Cancel {
            project,
            id,
            by,
            reason,
        } => {
            let held = gov
                .holds
                .cancel(&parse_project(&project)?, parse_id(&id)?, &by, reason)
                .await?;
            println!("{} {} cancelled", style("ok").green().bold(), held.id);
        }
    }
    Ok(())
}

pub(super) async fn cmd_escalations(
    gov: &Governance,
    action: EscalationAction,
) -> keel_core::Result<()> {
    match action {
        EscalationAction::List { limit, json } => {
            let pending = gov.escalations.list_pending(limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&pending)?);
                return Ok(());
            }
            if pending.is_empty() {
                println!("No pending escalations.");
                return Ok(());
            }
            println!("{} ({})", style("Pending escalations").bold(), pending.len());
            for escalation in &pending {
                print_escalation_line(escalation);
            }
        }
        EscalationAction::Count => {
            println!("{}", gov.escalations.pending_count().await?);
        }
        EscalationAction::Show { project, id } => {
            let escalation = gov
                .escalations
                .get(&parse_project(&project)?, parse_id(&id)?)
                .await?;
            println!("{}", serde_json::to_string_pretty(&escalation)?);
        }
        EscalationAction::Decide {
            project,
            id,
            option,
            notes,
        } => {
            let escalation = gov
                .escalations
                .record_decision(&parse_project(&project)?, parse_id(&id)?, &option, notes)
                .await?;
            let chosen = escalation
                .decision
                .as_ref()
                .map(|d| d.option.as_str())
                .unwrap_or(option.as_str());
            println!(
                "{} {} decided: {}",
                style("ok").green().bold(),
                escalation.id,
                style(chosen).cyan()
            );
        }
        EscalationAction::Decided { days } => {
            let decided = gov.escalations.list_decided_within(days).await?;
            if decided.is_empty() {
                println!("No escalations decided in the last {days} day(s).");
                return Ok(());
            }
            println!(
                "{} in the last {days} day(s) ({})",
                style("Decided escalations").bold(),
                decided.len()
            );
            for escalation in &decided {
                print_escalation_line(escalation);
            }
        }
    }
    Ok(())
}

fn parse_hold_status(raw: &str) -> keel_core::Result<HoldStatus> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "pending" => Ok(HoldStatus::Pending),
        "executed" => Ok(HoldStatus::Executed),
        "cancelled" | "canceled" => Ok(HoldStatus::Cancelled),
        other => Err(KeelError::validation(
            "status",
            format!("'{other}' is not one of: pending, executed, cancelled"),
        )),
    }
}

fn print_hold(held: &HeldAction) {
    let status = match held.status {
        HoldStatus::Pending => style(held.status.as_str()).yellow(),
        HoldStatus::Executed => style(held.status.as_str()).green(),
        HoldStatus::Cancelled => style(held.status.as_str()).red(),
    };
    println!(
        "  {}  {:<22} {} until {}  tier {}",
        style(held.id).dim(),
        held.action_type.as_str(),
        status,
        held.held_until.format("%Y-%m-%d %H:%M UTC"),
        held.trust_tier
    );
}

fn print_escalation_line(escalation: &Escalation) {
    let options: Vec<&str> = escalation.options.iter().map(|o| o.label.as_str()).collect();
    println!(
        "  {}  [{}] {}",
        style(escalation.id).dim(),
        escalation.project_id,
        style(truncate_output(&escalation.title, 80)).bold()
    );
    println!(
        "      expires {}  options: {}",
        escalation.expires_at.format("%Y-%m-%d %H:%M UTC"),
        options.join(" / ")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hold_status_parsing() {
        assert_eq!(parse_hold_status(" Pending ").unwrap(), HoldStatus::Pending);
        assert_eq!(parse_hold_status("canceled").unwrap(), HoldStatus::Cancelled);
        assert!(parse_hold_status("done").is_err());
    }
}
