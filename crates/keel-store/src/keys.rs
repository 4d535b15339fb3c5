//! Partition and sort key builders.
//!
//! Agent-wide records live in the [`AGENT_PK`] partition; everything scoped to a
//! project lives in `PROJECT#<id>`. Sort keys are `#`-separated and sort in the
//! order the queries over them need.

use chrono::{DateTime, Utc};
use keel_core::{ActionType, ProjectId};
use uuid::Uuid;

use crate::item::ItemKey;

pub const AGENT_PK: &str = "AGENT";

pub const HOLD_PREFIX: &str = "HOLD#";
pub const HOLD_DUE_PREFIX: &str = "HOLD_DUE#";
pub const ESCALATION_PREFIX: &str = "ESCALATION#";
pub const ESCALATION_PENDING_PREFIX: &str = "ESCALATION_PENDING#";
pub const ESCALATION_DECIDED_PREFIX: &str = "ESCALATION_DECIDED#";
pub const PRECEDENT_PREFIX: &str = "PRECEDENT#";
pub const DECISION_PREFIX: &str = "DECISION#";
pub const GRADUATION_PREFIX: &str = "GRADUATION#";

/// Fixed-width UTC timestamp; lexicographic order equals time order.
pub fn sortable(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

pub fn project_pk(project: &ProjectId) -> String {
    format!("PROJECT#{project}")
}

pub fn budget_ledger() -> ItemKey {
    ItemKey::new(AGENT_PK, "BUDGET#LEDGER")
}

pub fn graduation(action_type: ActionType) -> ItemKey {
    ItemKey::new(AGENT_PK, format!("{GRADUATION_PREFIX}{action_type}"))
}

pub fn hold(project: &ProjectId, id: Uuid) -> ItemKey {
    ItemKey::new(project_pk(project), format!("{HOLD_PREFIX}{id}"))
}

/// Agent-wide index entry ordered by due time, so a sweep reads only what is due.
pub fn hold_due(held_until: DateTime<Utc>, project: &ProjectId, id: Uuid) -> ItemKey {
    ItemKey::new(
        AGENT_PK,
        format!("{HOLD_DUE_PREFIX}{}#{project}#{id}", sortable(held_until)),
    )
}

pub fn escalation(project: &ProjectId, id: Uuid) -> ItemKey {
    ItemKey::new(project_pk(project), format!("{ESCALATION_PREFIX}{id}"))
}

pub fn escalation_pending(id: Uuid) -> ItemKey {
    ItemKey::new(AGENT_PK, format!("{ESCALATION_PENDING_PREFIX}{id}"))
}

/// Agent-wide index of decided escalations ordered by decision time.
pub fn escalation_decided(decided_at: DateTime<Utc>, project: &ProjectId, id: Uuid) -> ItemKey {
    ItemKey::new(
        AGENT_PK,
        format!(
            "{ESCALATION_DECIDED_PREFIX}{}#{project}#{id}",
            sortable(decided_at)
        ),
    )
}

pub fn escalation_pending_counter() -> ItemKey {
    ItemKey::new(AGENT_PK, "COUNTER#ESCALATION_PENDING")
}

/// Pointer from a concern to the escalation currently open for it.
pub fn concern(project: &ProjectId, concern: &str) -> ItemKey {
    ItemKey::new(project_pk(project), format!("CONCERN#{concern}"))
}

pub fn precedent_prefix(action_type: ActionType) -> String {
    format!("{PRECEDENT_PREFIX}{action_type}#")
}

pub fn precedent(
    project: &ProjectId,
    action_type: ActionType,
    recorded_at: DateTime<Utc>,
    id: Uuid,
) -> ItemKey {
    ItemKey::new(
        project_pk(project),
        format!("{}{}#{id}", precedent_prefix(action_type), sortable(recorded_at)),
    )
}

pub fn decision(project: &ProjectId, id: Uuid) -> ItemKey {
    ItemKey::new(project_pk(project), format!("{DECISION_PREFIX}{id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn due_index_sorts_by_time() {
        let project = ProjectId::new("alpha").unwrap();
        let early = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let late = early + Duration::milliseconds(1500);
        let a = hold_due(late, &project, Uuid::nil());
        let b = hold_due(early, &project, Uuid::max());
        assert!(b.sk < a.sk);
        assert!(a.sk.starts_with(HOLD_DUE_PREFIX));
    }

    #[test]
    fn project_keys_share_partition() {
        let project = ProjectId::new("alpha").unwrap();
        assert_eq!(hold(&project, Uuid::nil()).pk, "PROJECT#alpha");
        assert_eq!(escalation(&project, Uuid::nil()).pk, "PROJECT#alpha");
        assert_eq!(budget_ledger().pk, AGENT_PK);
        assert_eq!(
            graduation(ActionType::EmailStakeholder).sk,
            "GRADUATION#email_stakeholder"
        );
    }
}
