#[cfg(test)]
mod tests {
    // ── Errors ─────────────────────────────────────────────────

    mod error {
        use keel_core::{BudgetLimit, KeelError};

        #[test]
        fn test_budget_exceeded_display() {
            let err = KeelError::BudgetExceeded {
                limit: BudgetLimit::DailyHardCeiling,
                attempted_usd: 0.35,
                limit_usd: 0.25,
            };
            let msg = err.to_string();
            assert!(msg.contains("would exceed daily hard ceiling"));
            assert!(msg.contains("0.3500"));
        }

        #[test]
        fn test_monthly_limit_display() {
            let err = KeelError::BudgetExceeded {
                limit: BudgetLimit::MonthlyCeiling,
                attempted_usd: 6.0,
                limit_usd: 5.0,
            };
            assert!(err.to_string().contains("would exceed monthly limit"));
        }

        #[test]
        fn test_only_conflicts_are_retryable() {
            assert!(KeelError::conflict("AGENT/BUDGET#LEDGER", "version moved").is_retryable());
            assert!(
                !KeelError::BudgetExceeded {
                    limit: BudgetLimit::MonthlyCeiling,
                    attempted_usd: 1.0,
                    limit_usd: 0.5,
                }
                .is_retryable()
            );
            assert!(!KeelError::not_found("hold", "x").is_retryable());
            assert!(!KeelError::validation("f", "r").is_retryable());
        }

        #[test]
        fn test_io_error_from() {
            let io = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
            let err: KeelError = io.into();
            assert!(err.to_string().contains("file missing"));
        }
    }

    // ── Project ids ────────────────────────────────────────────

    mod project {
        use keel_core::{KeelError, ProjectId};

        #[test]
        fn test_trims_and_accepts() {
            let id = ProjectId::new("  apollo ").unwrap();
            assert_eq!(id.as_str(), "apollo");
            assert_eq!(id.to_string(), "apollo");
        }

        #[test]
        fn test_rejects_empty() {
            match ProjectId::new("   ") {
                Err(KeelError::ValidationFailure { field, .. }) => assert_eq!(field, "project_id"),
                other => panic!("expected ValidationFailure, got {other:?}"),
            }
        }

        #[test]
        fn test_rejects_key_separator() {
            assert!(ProjectId::new("a#b").is_err());
        }

        #[test]
        fn test_serializes_as_plain_string() {
            let id = ProjectId::new("apollo").unwrap();
            assert_eq!(serde_json::to_string(&id).unwrap(), "\"apollo\"");
        }
    }

    // ── Action types & policy table ────────────────────────────

    mod action {
        use keel_core::{ActionPayload, ActionType, Boundary, KeelError};

        #[test]
        fn test_parse_round_trips_every_variant() {
            for t in ActionType::ALL {
                let parsed: ActionType = t.as_str().parse().unwrap();
                assert_eq!(parsed, t);
            }
        }

        #[test]
        fn test_unknown_action_type_is_validation_failure() {
            match "launch_rockets".parse::<ActionType>() {
                Err(KeelError::ValidationFailure { field, reason }) => {
                    assert_eq!(field, "action_type");
                    assert!(reason.contains("launch_rockets"));
                }
                other => panic!("expected ValidationFailure, got {other:?}"),
            }
        }

        #[test]
        fn test_policy_buckets() {
            assert_eq!(ActionType::ArtefactUpdate.boundary(), Boundary::AutoExecute);
            assert_eq!(ActionType::EmailStakeholder.boundary(), Boundary::HoldQueue);
            assert_eq!(ActionType::TicketStatusChange.boundary(), Boundary::HoldQueue);
            assert_eq!(ActionType::ScopeChange.boundary(), Boundary::RequiresApproval);
            assert_eq!(ActionType::DeleteData.boundary(), Boundary::Forbidden);
        }

        #[test]
        fn test_compliance_scores() {
            assert_eq!(Boundary::Forbidden.compliance_score(), 0.0);
            assert_eq!(Boundary::AutoExecute.compliance_score(), 1.0);
            assert_eq!(Boundary::HoldQueue.compliance_score(), 0.7);
            assert_eq!(Boundary::RequiresApproval.compliance_score(), 0.5);
            assert!(!Boundary::Forbidden.is_compliant());
        }

        #[test]
        fn test_payload_determines_action_type() {
            let payload = ActionPayload::TicketStatusChange {
                ticket_key: "APL-12".into(),
                from_status: Some("In Progress".into()),
                to_status: "Done".into(),
            };
            assert_eq!(payload.action_type(), ActionType::TicketStatusChange);
        }

        #[test]
        fn test_payload_serde_is_tagged() {
            let payload = ActionPayload::HeartbeatLog {
                note: "cycle ok".into(),
            };
            let json = serde_json::to_value(&payload).unwrap();
            assert_eq!(json["action_type"], "heartbeat_log");
            let restored: ActionPayload = serde_json::from_value(json).unwrap();
            assert_eq!(restored, payload);
        }

        #[test]
        fn test_payload_validation() {
            let empty_subject = ActionPayload::EmailStakeholder {
                to: vec!["pm@example.com".into()],
                subject: "  ".into(),
                body: "hi".into(),
            };
            assert!(empty_subject.validate().is_err());

            let no_recipient = ActionPayload::EmailExternal {
                to: vec![],
                subject: "Status".into(),
                body: "hi".into(),
            };
            assert!(no_recipient.validate().is_err());

            let negative = ActionPayload::CommitBudget {
                amount_usd: -1.0,
                purpose: "licences".into(),
            };
            assert!(negative.validate().is_err());

            let ok = ActionPayload::TicketComment {
                ticket_key: "APL-3".into(),
                body: "Blocked on vendor".into(),
            };
            assert!(ok.validate().is_ok());
        }
    }

    // ── Event bus ──────────────────────────────────────────────

    mod events {
        use keel_core::{EventBus, GovernanceEvent};

        #[tokio::test]
        async fn test_publish_subscribe() {
            let bus = EventBus::new(16);
            let mut rx = bus.subscribe();
            bus.publish(GovernanceEvent::BudgetTierChanged {
                from: 0,
                to: 1,
                daily_spend_usd: 0.16,
            });
            match rx.recv().await.unwrap() {
                GovernanceEvent::BudgetTierChanged { from, to, .. } => {
                    assert_eq!((from, to), (0, 1));
                }
                other => panic!("unexpected event {other:?}"),
            }
        }

        #[test]
        fn test_publish_without_subscribers_is_silent() {
            let bus = EventBus::default();
            bus.publish(GovernanceEvent::HoldCancelled {
                hold_id: uuid::Uuid::nil(),
            });
        }
    }
}
