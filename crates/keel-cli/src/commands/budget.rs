use console::style;
use keel_governance::{BudgetLedger, DegradationTier, Governance};

use super::BudgetAction;

pub(super) async fn cmd_budget(gov: &Governance, action: BudgetAction) -> keel_core::Result<()> {
    match action {
        BudgetAction::Status { json } => {
            let ledger = gov.budget.get_status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&ledger)?);
                return Ok(());
            }
            print_ledger(&ledger);
            let permit = gov.budget.can_make_call().await?;
            match permit.reason {
                Some(reason) => println!("  {} {reason}", style("blocked:").red().bold()),
                None => println!("  {}", style("calls permitted").green()),
            }
        }
        BudgetAction::Spend { amount, attempts } => {
            let ledger = gov.budget.record_spend_retrying(amount, attempts.max(1)).await?;
            println!("{} recorded ${amount:.4}", style("ok").green().bold());
            print_ledger(&ledger);
        }
    }
    Ok(())
}

fn print_ledger(ledger: &BudgetLedger) {
    let tier = match ledger.degradation_tier {
        DegradationTier::Normal => style("0 (normal)").green(),
        DegradationTier::Conserve => style("1 (conserve)").yellow(),
        DegradationTier::Essential => style("2 (essential only)").yellow().bold(),
        DegradationTier::Exhausted => style("3 (daily ceiling reached)").red().bold(),
    };
    println!("{}", style("Budget").bold());
    println!(
        "  today {}    ${:.4} of ${:.2} (hard ${:.2}, ${:.4} left)",
        ledger.daily_date,
        ledger.daily_spend_usd,
        ledger.daily_ceiling_usd,
        ledger.daily_hard_ceiling_usd,
        ledger.daily_remaining_usd()
    );
    println!(
        "  month {}       ${:.4} of ${:.2} (${:.4} left)",
        ledger.monthly_month,
        ledger.monthly_spend_usd,
        ledger.monthly_ceiling_usd,
        ledger.monthly_remaining_usd()
    );
    println!("  tier  {tier}");
}
