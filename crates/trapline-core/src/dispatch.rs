//! Interaction dispatcher: one physical action against one trap.
//!
//! The dispatcher picks candidate actions from the trap's life state, asks
//! the [`Actuator`] to perform one of them, and classifies the result. It
//! never retries beyond `max_attempts` and never reports a service it did
//! not see matched.
//!
//! Matching runs in two tiers per attempt:
//!
//! 1. The actuator is given the exact candidate labels.
//! 2. If nothing matched but a menu was shown, each entry is compared to the
//!    candidates by case-insensitive prefix. A hit is re-performed with the
//!    exact menu entry.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use trapline_types::{EntityRecord, LifeState, Outcome, Position};

/// Where an action is aimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetArea {
    /// A trap on a tile.
    Tile(Position),
    /// An item in the player's inventory (used for laying).
    Inventory,
}

/// What the actuator reports after attempting an action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuationOutcome {
    /// The action text that was actually clicked, if any.
    pub matched: Option<String>,
    /// The menu entries seen while looking for a candidate.
    pub menu_entries: Vec<String>,
    /// Tile the action landed on, captured at action time.
    pub acted_at: Option<Position>,
}

/// Low-level input boundary.
pub trait Actuator: Send {
    /// Open the menu on `target` and click the first entry matching one of
    /// `candidates` exactly.
    fn perform_action(&mut self, target: TargetArea, candidates: &[&str]) -> ActuationOutcome;

    /// Start walking to `destination`. Returns `false` if the move could not
    /// be issued.
    fn move_to(&mut self, destination: Position) -> bool;
}

/// A menu action the dispatcher knows how to interpret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Collect a successful trap's catch.
    Check,
    /// Re-arm the trap in place.
    Reset,
    /// Pick up a failed or armed trap.
    Dismantle,
    /// Pick up a collapsed trap.
    Take,
    /// Re-lay a collapsed trap in place.
    Lay,
}

impl Action {
    /// Every action, in fallback order.
    pub const ALL: [Self; 5] = [Self::Reset, Self::Check, Self::Dismantle, Self::Lay, Self::Take];

    /// The menu text of the action.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Check => "Check",
            Self::Reset => "Reset",
            Self::Dismantle => "Dismantle",
            Self::Take => "Take",
            Self::Lay => "Lay",
        }
    }

    /// What performing the action does to the trap.
    pub const fn service_kind(self) -> ServiceKind {
        match self {
            Self::Reset | Self::Lay => ServiceKind::Reset,
            Self::Check | Self::Dismantle | Self::Take => ServiceKind::Collected,
        }
    }

    /// Parse an exact menu label.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.label() == label)
    }
}

/// Candidate actions for a trap, most preferred first.
///
/// While draining only removing actions are offered, so the trap count
/// runs down to zero.
pub const fn candidates(state: LifeState, draining: bool) -> &'static [Action] {
    match (state, draining) {
        (LifeState::Resolved(Outcome::Success), false) => &[Action::Reset, Action::Check],
        (LifeState::Resolved(Outcome::Success), true) => &[Action::Check],
        (LifeState::Resolved(Outcome::Failure) | LifeState::Armed, false) => {
            &[Action::Reset, Action::Dismantle]
        }
        (LifeState::Resolved(Outcome::Failure) | LifeState::Armed, true) => &[Action::Dismantle],
        (LifeState::Collapsed, false) => &[Action::Lay, Action::Take],
        (LifeState::Collapsed, true) => &[Action::Take],
        (_, false) => &Action::ALL,
        (_, true) => &[Action::Check, Action::Dismantle, Action::Take],
    }
}

/// How a trap was serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// The trap was picked up; it no longer exists.
    Collected,
    /// The trap was re-armed in place.
    Reset,
}

/// Classification of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "service")]
pub enum InteractionOutcome {
    /// An action was matched and performed.
    Serviced(ServiceKind),
    /// The player is out of reach; nothing was attempted.
    MovementRequired,
    /// Nothing was there to interact with.
    VerificationNeeded,
    /// A menu was shown but no candidate matched.
    Failed,
}

/// Full result of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    /// The classification.
    pub outcome: InteractionOutcome,
    /// The tile actually acted upon.
    pub position: Position,
    /// The action performed, if one matched.
    pub action: Option<Action>,
    /// Attempts used.
    pub attempts: u32,
}

/// Executes interactions through an [`Actuator`].
pub struct InteractionDispatcher {
    /// The input boundary.
    actuator: Box<dyn Actuator>,
    /// Upper bound on attempts per dispatch.
    max_attempts: u32,
    /// Maximum Chebyshev distance to act from.
    interaction_range: u32,
}

impl core::fmt::Debug for InteractionDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InteractionDispatcher")
            .field("max_attempts", &self.max_attempts)
            .field("interaction_range", &self.interaction_range)
            .finish_non_exhaustive()
    }
}

impl InteractionDispatcher {
    /// Create a dispatcher. A zero attempt budget is raised to one.
    pub fn new(actuator: Box<dyn Actuator>, max_attempts: u32, interaction_range: u32) -> Self {
        Self {
            actuator,
            max_attempts: max_attempts.max(1),
            interaction_range,
        }
    }

    /// Service `entity` from `player`.
    ///
    /// An unknown player position is treated as in range.
    pub fn dispatch(&mut self, entity: &EntityRecord, player: Option<Position>, draining: bool) -> DispatchResult {
        let target = entity.position;
        if let Some(player) = player {
            let distance = player.chebyshev_distance(target);
            if distance > self.interaction_range {
                debug!(%target, %player, distance, "trap out of reach");
                return DispatchResult {
                    outcome: InteractionOutcome::MovementRequired,
                    position: target,
                    action: None,
                    attempts: 0,
                };
            }
        }

        let actions = candidates(entity.life_state, draining);
        let labels: Vec<&str> = actions.iter().map(|action| action.label()).collect();
        let mut menu_seen = false;
        let mut acted_at = target;
        let mut attempts: u32 = 0;

        while attempts < self.max_attempts {
            attempts = attempts.saturating_add(1);

            let first = self.actuator.perform_action(TargetArea::Tile(target), &labels);
            acted_at = first.acted_at.unwrap_or(target);
            if let Some(action) = first.matched.as_deref().and_then(Action::from_label) {
                return self.serviced(entity, action, acted_at, attempts);
            }
            if first.menu_entries.is_empty() {
                continue;
            }
            menu_seen = true;

            let Some((entry, action)) = prefix_match(&first.menu_entries, actions) else {
                continue;
            };
            let second = self
                .actuator
                .perform_action(TargetArea::Tile(target), &[entry.as_str()]);
            if second.matched.is_some() {
                acted_at = second.acted_at.unwrap_or(acted_at);
                return self.serviced(entity, action, acted_at, attempts);
            }
        }

        let outcome = if menu_seen {
            InteractionOutcome::Failed
        } else {
            InteractionOutcome::VerificationNeeded
        };
        warn!(
            %target,
            state = %entity.life_state,
            attempts,
            ?outcome,
            "interaction ambiguous"
        );
        DispatchResult {
            outcome,
            position: acted_at,
            action: None,
            attempts,
        }
    }

    fn serviced(&self, entity: &EntityRecord, action: Action, acted_at: Position, attempts: u32) -> DispatchResult {
        let kind = action.service_kind();
        info!(
            position = %acted_at,
            state = %entity.life_state,
            action = action.label(),
            ?kind,
            attempts,
            max_attempts = self.max_attempts,
            "trap serviced"
        );
        DispatchResult {
            outcome: InteractionOutcome::Serviced(kind),
            position: acted_at,
            action: Some(action),
            attempts,
        }
    }

    /// Lay a trap from the inventory onto the tile underfoot.
    ///
    /// Returns `true` if the lay action was matched.
    pub fn lay(&mut self) -> bool {
        self.actuator
            .perform_action(TargetArea::Inventory, &[Action::Lay.label()])
            .matched
            .is_some()
    }

    /// Start walking to `destination`.
    pub fn move_to(&mut self, destination: Position) -> bool {
        self.actuator.move_to(destination)
    }
}

/// Menu entry for the most preferred candidate whose label it starts
/// with, ignoring case.
fn prefix_match(entries: &[String], actions: &[Action]) -> Option<(String, Action)> {
    actions.iter().find_map(|action| {
        let label = action.label().to_lowercase();
        entries
            .iter()
            .find(|entry| entry.to_lowercase().starts_with(&label))
            .map(|entry| (entry.clone(), *action))
    })
}
