use keel_core::{ActionType, Boundary};

/// Classifies action types against the static policy table.
///
/// The table itself is [`ActionType::boundary`]: an exhaustive match, so every
/// action type sits in exactly one bucket and a new variant cannot compile until
/// it is given one.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundaryClassifier;

impl BoundaryClassifier {
    pub fn classify(&self, action_type: ActionType) -> Boundary {
        action_type.boundary()
    }

    /// Classify an identifier arriving from outside the type system. `None` means
    /// the identifier names no known action type.
    pub fn classify_raw(&self, raw: &str) -> Option<(ActionType, Boundary)> {
        raw.parse::<ActionType>()
            .ok()
            .map(|action_type| (action_type, self.classify(action_type)))
    }

    /// Action types grouped by bucket, forbidden first.
    pub fn table(&self) -> Vec<(Boundary, Vec<ActionType>)> {
        [
            Boundary::Forbidden,
            Boundary::AutoExecute,
            Boundary::HoldQueue,
            Boundary::RequiresApproval,
        ]
        .into_iter()
        .map(|bucket| {
            let members = ActionType::ALL
                .iter()
                .copied()
                .filter(|t| self.classify(*t) == bucket)
                .collect();
            (bucket, members)
        })
        .collect()
    }
}
