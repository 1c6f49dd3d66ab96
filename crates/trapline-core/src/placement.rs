//! Placement strategies.
//!
//! A strategy proposes the next tile to lay a trap on and validates tiles
//! proposed elsewhere. The scheduler holds one as a trait object chosen by
//! [`StrategyKind`] when the session settings are confirmed.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use trapline_types::{Position, Zone};

/// Picks placement sites.
pub trait PlacementStrategy: Send + core::fmt::Debug {
    /// Short identifier used in configuration and logs.
    fn name(&self) -> &'static str;

    /// One-line human description.
    fn describe(&self) -> String;

    /// Propose the next site, or `None` if nothing is available.
    fn propose_next(&self, player: Position, zones: &[Zone], occupied: &BTreeSet<Position>) -> Option<Position>;

    /// Whether `position` is an acceptable site right now.
    fn is_valid(&self, position: Position, zones: &[Zone], occupied: &BTreeSet<Position>) -> bool;
}

/// Selectable strategies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Nearest free tile to the player.
    #[default]
    Nearest,
    /// Nearest free tile not touching another trap.
    Spaced,
}

impl StrategyKind {
    /// Instantiate the strategy.
    pub fn build(self) -> Box<dyn PlacementStrategy> {
        match self {
            Self::Nearest => Box::new(NearestStrategy),
            Self::Spaced => Box::new(SpacedStrategy),
        }
    }
}

/// Base validity shared by every strategy: inside a zone and unoccupied.
fn in_zone_and_free(position: Position, zones: &[Zone], occupied: &BTreeSet<Position>) -> bool {
    !occupied.contains(&position) && zones.iter().any(|zone| zone.contains(position))
}

/// The valid tile nearest to `player`, ties broken by position.
fn nearest_where<F>(player: Position, zones: &[Zone], valid: F) -> Option<Position>
where
    F: Fn(Position) -> bool,
{
    zones
        .iter()
        .flat_map(Zone::tiles)
        .filter(|tile| valid(*tile))
        .min_by_key(|tile| (player.chebyshev_distance(*tile), *tile))
}

/// Lays on the free in-zone tile nearest the player.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestStrategy;

impl PlacementStrategy for NearestStrategy {
    fn name(&self) -> &'static str {
        "nearest"
    }

    fn describe(&self) -> String {
        "nearest free tile to the player".to_owned()
    }

    fn propose_next(&self, player: Position, zones: &[Zone], occupied: &BTreeSet<Position>) -> Option<Position> {
        nearest_where(player, zones, |tile| self.is_valid(tile, zones, occupied))
    }

    fn is_valid(&self, position: Position, zones: &[Zone], occupied: &BTreeSet<Position>) -> bool {
        in_zone_and_free(position, zones, occupied)
    }
}

/// Like [`NearestStrategy`] but never lays next to another trap.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpacedStrategy;

impl PlacementStrategy for SpacedStrategy {
    fn name(&self) -> &'static str {
        "spaced"
    }

    fn describe(&self) -> String {
        "nearest free tile with no adjacent trap".to_owned()
    }

    fn propose_next(&self, player: Position, zones: &[Zone], occupied: &BTreeSet<Position>) -> Option<Position> {
        nearest_where(player, zones, |tile| self.is_valid(tile, zones, occupied))
    }

    fn is_valid(&self, position: Position, zones: &[Zone], occupied: &BTreeSet<Position>) -> bool {
        in_zone_and_free(position, zones, occupied)
            && occupied
                .iter()
                .all(|other| position.chebyshev_distance(*other) > 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone() -> Zone {
        Zone::from_corners(Position::new(0, 0, 0), Position::new(4, 4, 0))
    }

    #[test]
    fn nearest_picks_player_tile_first() {
        let strategy = StrategyKind::Nearest.build();
        let player = Position::new(2, 2, 0);
        let proposed = strategy.propose_next(player, &[zone()], &BTreeSet::new());
        assert_eq!(proposed, Some(player));
    }

    #[test]
    fn nearest_skips_occupied_and_breaks_ties_by_position() {
        let strategy = NearestStrategy;
        let player = Position::new(2, 2, 0);
        let occupied: BTreeSet<Position> = [player].into_iter().collect();
        let proposed = strategy.propose_next(player, &[zone()], &occupied);
        assert_eq!(proposed, Some(Position::new(1, 1, 0)));
    }

    #[test]
    fn outside_zone_is_invalid() {
        let strategy = NearestStrategy;
        assert!(!strategy.is_valid(Position::new(5, 0, 0), &[zone()], &BTreeSet::new()));
        assert!(!strategy.is_valid(Position::new(1, 1, 1), &[zone()], &BTreeSet::new()));
    }

    #[test]
    fn spaced_rejects_neighbours() {
        let strategy = StrategyKind::Spaced.build();
        let occupied: BTreeSet<Position> = [Position::new(2, 2, 0)].into_iter().collect();
        assert!(!strategy.is_valid(Position::new(3, 3, 0), &[zone()], &occupied));
        assert!(strategy.is_valid(Position::new(4, 2, 0), &[zone()], &occupied));
        let proposed = strategy
            .propose_next(Position::new(2, 2, 0), &[zone()], &occupied)
            .map(|tile| tile.chebyshev_distance(Position::new(2, 2, 0)));
        assert_eq!(proposed, Some(2));
    }

    #[test]
    fn full_zone_proposes_nothing() {
        let tiny = Zone::from_corners(Position::new(0, 0, 0), Position::new(0, 0, 0));
        let occupied: BTreeSet<Position> = [Position::new(0, 0, 0)].into_iter().collect();
        assert_eq!(
            NearestStrategy.propose_next(Position::new(0, 0, 0), &[tiny], &occupied),
            None
        );
    }

    #[test]
    fn kind_names_round_trip_through_yaml() {
        let kind: StrategyKind = serde_yml::from_str("spaced").unwrap_or_default();
        assert_eq!(kind, StrategyKind::Spaced);
        assert_eq!(kind.build().name(), "spaced");
    }
}
