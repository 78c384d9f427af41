// Win detection: a pure function over the current state.
//
// A player is eliminated when they own zero base buildings, or when the
// room manager injected an elimination flag (surrender, disconnect
// forfeit). The arbiter itself keeps no timers and mutates nothing.

use super::entities::{BuildingKind, PlayerId};
use super::game::GameState;

/// Terminal outcome of a match.
#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
    pub winner: Option<PlayerId>,
    pub reason: String,
}

fn eliminated(state: &GameState, player: &PlayerId) -> bool {
    if state.forced_eliminations.contains(player) {
        return true;
    }
    !state
        .buildings
        .values()
        .any(|b| &b.owner == player && b.kind == BuildingKind::Base)
}

/// Returns a verdict once the match is decided, None while it is live.
pub fn evaluate(state: &GameState) -> Option<Verdict> {
    if state.players.is_empty() {
        return None;
    }

    let standing: Vec<&PlayerId> = state
        .players
        .keys()
        .filter(|p| !eliminated(state, p))
        .collect();

    // Everyone is still in: nothing to decide.
    if standing.len() == state.players.len() {
        return None;
    }

    if standing.is_empty() {
        return Some(Verdict {
            winner: None,
            reason: "draw: all players eliminated simultaneously".to_string(),
        });
    }

    let human_standing: Vec<&PlayerId> = standing
        .iter()
        .copied()
        .filter(|p| !state.players[p.as_str()].is_ai())
        .collect();

    match human_standing.as_slice() {
        [winner] => {
            let winner = (*winner).clone();
            let name = state
                .players
                .get(&winner)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| winner.clone());
            let losers: Vec<String> = state
                .players
                .values()
                .filter(|p| p.id != winner)
                .map(|p| p.name.clone())
                .collect();
            Some(Verdict {
                winner: Some(winner),
                reason: format!("{name} wins by elimination ({} eliminated)", losers.join(", ")),
            })
        }
        [] => {
            // Only AI players remain standing.
            Some(Verdict {
                winner: None,
                reason: "all human players eliminated".to_string(),
            })
        }
        _ => None,
    }
}
