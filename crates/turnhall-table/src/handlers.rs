//! The action handler table.
//!
//! Each [`ActionKind`] maps to a [`Handler`]: a `check` that decides
//! legality without touching state, and an `apply` that performs the
//! transition and cannot fail. Dispatch always runs `check` to completion
//! before `apply`, so a rejected action leaves the table untouched.
//!
//! The mapping is built once per variant from [`ActionKind::iter`] and an
//! exhaustive `match`, so adding a kind without deciding how it is handled
//! doesn't compile.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use strum::IntoEnumIterator;
use turnhall_protocol::{Action, ActionBody, ActionKind, Hint, TableId, TableOptions, TableStatus, UserId};

use crate::TableError;
use crate::game::GameState;

/// Longest accepted note, in characters.
pub const MAX_NOTE_CHARS: usize = 256;

/// What a handler can see besides the game state.
pub struct Rules<'a> {
    pub table_id: TableId,
    pub options: &'a TableOptions,
    /// Seated users in seat order.
    pub seats: &'a [UserId],
}

type Check = fn(&Rules<'_>, &GameState, usize, &ActionBody) -> Result<(), String>;
type Apply = fn(&Rules<'_>, &mut GameState, usize, &ActionBody);

/// Legality check and state transition for one action kind.
#[derive(Clone, Copy)]
pub struct Handler {
    pub kind: ActionKind,
    check: Check,
    apply: Apply,
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler").field("kind", &self.kind).finish()
    }
}

/// The closed mapping from action kind to handler for one variant.
#[derive(Debug)]
pub struct HandlerTable {
    handlers: BTreeMap<ActionKind, Handler>,
}

static STANDARD: LazyLock<HandlerTable> = LazyLock::new(|| HandlerTable::build(true));
static WITHOUT_CLUES: LazyLock<HandlerTable> = LazyLock::new(|| HandlerTable::build(false));

impl HandlerTable {
    fn build(allow_clues: bool) -> Self {
        let handlers = ActionKind::iter()
            .filter_map(|kind| handler_for(kind, allow_clues))
            .map(|h| (h.kind, h))
            .collect();
        Self { handlers }
    }

    /// The handler table a table with these options uses.
    pub fn for_options(options: &TableOptions) -> &'static HandlerTable {
        if options.allow_clues { &STANDARD } else { &WITHOUT_CLUES }
    }

    pub fn get(&self, kind: ActionKind) -> Option<&Handler> {
        self.handlers.get(&kind)
    }
}

fn handler_for(kind: ActionKind, allow_clues: bool) -> Option<Handler> {
    let (check, apply): (Check, Apply) = match kind {
        ActionKind::Play => (check_play, apply_play),
        ActionKind::Discard => (check_discard, apply_discard),
        ActionKind::Clue if allow_clues => (check_clue, apply_clue),
        ActionKind::Clue => return None,
        ActionKind::Note => (check_note, apply_note),
        ActionKind::Terminate => (check_terminate, apply_terminate),
        ActionKind::Vacate => (check_vacate, apply_vacate),
        ActionKind::Reclaim => (check_reclaim, apply_reclaim),
    };
    Some(Handler { kind, check, apply })
}

// ---------------------------------------------------------------------------
// Validate and apply
// ---------------------------------------------------------------------------

impl Rules<'_> {
    pub fn seat_of(&self, user: UserId) -> Option<usize> {
        self.seats.iter().position(|&u| u == user)
    }

    /// Runs every check for `actor` submitting `body` against `state`.
    ///
    /// On success returns the actor's seat and the handler to apply.
    pub fn validate(
        &self,
        state: &GameState,
        actor: UserId,
        body: &ActionBody,
    ) -> Result<(usize, &'static Handler), TableError> {
        let kind = body.kind();
        let handler = HandlerTable::for_options(self.options)
            .get(kind)
            .ok_or(TableError::UnknownActionType(kind))?;
        let seat = self.seat_of(actor).ok_or(TableError::NotSeated {
            user_id: actor,
            table_id: self.table_id,
        })?;
        if state.outcome.is_some() {
            return Err(TableError::TableClosed(self.table_id));
        }
        if kind.is_turn_bound() && state.turn != seat {
            return Err(TableError::IllegalAction(format!(
                "it is seat {}'s turn, not seat {seat}'s",
                state.turn
            )));
        }
        (handler.check)(self, state, seat, body).map_err(TableError::IllegalAction)?;
        Ok((seat, handler))
    }

    /// Applies a validated action.
    pub fn apply(&self, handler: &Handler, state: &mut GameState, seat: usize, body: &ActionBody) {
        (handler.apply)(self, state, seat, body);
    }

    /// Folds `log` over `initial`, validating every entry on the way.
    pub fn replay(&self, initial: GameState, log: &[Action]) -> Result<GameState, TableError> {
        let mut state = initial;
        for action in log {
            let (seat, handler) = self
                .validate(&state, action.actor, &action.body)
                .map_err(|e| TableError::IllegalAction(format!("action {}: {e}", action.seq)))?;
            self.apply(handler, &mut state, seat, &action.body);
        }
        Ok(state)
    }
}

fn mismatch(kind: &str) -> String {
    format!("payload is not a {kind}")
}

fn check_slot(state: &GameState, seat: usize, slot: usize) -> Result<(), String> {
    let held = state.hands[seat].len();
    if slot >= held {
        return Err(format!("slot {slot} is empty (hand holds {held})"));
    }
    Ok(())
}

fn check_play(_: &Rules<'_>, state: &GameState, seat: usize, body: &ActionBody) -> Result<(), String> {
    let ActionBody::Play { slot } = body else {
        return Err(mismatch("play"));
    };
    check_slot(state, seat, *slot)
}

fn apply_play(rules: &Rules<'_>, state: &mut GameState, seat: usize, body: &ActionBody) {
    let ActionBody::Play { slot } = body else { return };
    let card = state.hands[seat].remove(*slot);
    let stack = &mut state.stacks[usize::from(card.suit)];
    if *stack + 1 == card.rank {
        *stack = card.rank;
        if card.rank == rules.options.max_rank && state.clues < rules.options.max_clues {
            state.clues += 1;
        }
    } else {
        state.strikes += 1;
        state.discards.push(card);
    }
    state.draw(seat);

    if state.strikes >= rules.options.max_strikes || state.stacks_complete(rules.options.max_rank) {
        state.outcome = Some(TableStatus::Finished);
    } else {
        state.end_turn();
    }
}

fn check_discard(rules: &Rules<'_>, state: &GameState, seat: usize, body: &ActionBody) -> Result<(), String> {
    let ActionBody::Discard { slot } = body else {
        return Err(mismatch("discard"));
    };
    if state.clues >= rules.options.max_clues {
        return Err("cannot discard while clue tokens are full".into());
    }
    check_slot(state, seat, *slot)
}

fn apply_discard(_: &Rules<'_>, state: &mut GameState, seat: usize, body: &ActionBody) {
    let ActionBody::Discard { slot } = body else { return };
    let card = state.hands[seat].remove(*slot);
    state.discards.push(card);
    state.clues += 1;
    state.draw(seat);
    state.end_turn();
}

fn check_clue(rules: &Rules<'_>, state: &GameState, seat: usize, body: &ActionBody) -> Result<(), String> {
    let ActionBody::Clue { target, hint } = body else {
        return Err(mismatch("clue"));
    };
    if state.clues == 0 {
        return Err("no clue tokens left".into());
    }
    let target_seat = rules
        .seat_of(*target)
        .ok_or_else(|| format!("{target} is not seated here"))?;
    if target_seat == seat {
        return Err("cannot clue yourself".into());
    }
    let touches = match *hint {
        Hint::Suit(suit) if suit < rules.options.suits => {
            state.hands[target_seat].iter().any(|c| c.suit == suit)
        }
        Hint::Rank(rank) if (1..=rules.options.max_rank).contains(&rank) => {
            state.hands[target_seat].iter().any(|c| c.rank == rank)
        }
        _ => return Err(format!("{hint:?} is out of range")),
    };
    if !touches {
        return Err(format!("{hint:?} touches no card in {target}'s hand"));
    }
    Ok(())
}

fn apply_clue(_: &Rules<'_>, state: &mut GameState, _: usize, _: &ActionBody) {
    state.clues -= 1;
    state.end_turn();
}

fn check_note(_: &Rules<'_>, _: &GameState, _: usize, body: &ActionBody) -> Result<(), String> {
    let ActionBody::Note { text } = body else {
        return Err(mismatch("note"));
    };
    let chars = text.chars().count();
    if chars > MAX_NOTE_CHARS {
        return Err(format!("note is {chars} characters, limit is {MAX_NOTE_CHARS}"));
    }
    Ok(())
}

// Notes live in the log only.
fn apply_note(_: &Rules<'_>, _: &mut GameState, _: usize, _: &ActionBody) {}

fn check_terminate(_: &Rules<'_>, _: &GameState, _: usize, body: &ActionBody) -> Result<(), String> {
    match body {
        ActionBody::Terminate => Ok(()),
        _ => Err(mismatch("terminate")),
    }
}

fn apply_terminate(_: &Rules<'_>, state: &mut GameState, _: usize, _: &ActionBody) {
    state.outcome = Some(TableStatus::Aborted);
}

fn check_vacate(_: &Rules<'_>, state: &GameState, seat: usize, body: &ActionBody) -> Result<(), String> {
    if !matches!(body, ActionBody::Vacate) {
        return Err(mismatch("vacate"));
    }
    if !state.present[seat] {
        return Err(format!("seat {seat} is already vacant"));
    }
    Ok(())
}

fn apply_vacate(_: &Rules<'_>, state: &mut GameState, seat: usize, _: &ActionBody) {
    state.present[seat] = false;
    if state.present_count() == 0 {
        state.outcome = Some(TableStatus::Aborted);
        return;
    }
    if state.turn == seat {
        state.end_turn();
    }
    state.forfeit_final_turn(seat);
}

fn check_reclaim(_: &Rules<'_>, state: &GameState, seat: usize, body: &ActionBody) -> Result<(), String> {
    if !matches!(body, ActionBody::Reclaim) {
        return Err(mismatch("reclaim"));
    }
    if state.present[seat] {
        return Err(format!("seat {seat} is not vacant"));
    }
    Ok(())
}

fn apply_reclaim(_: &Rules<'_>, state: &mut GameState, seat: usize, _: &ActionBody) {
    state.present[seat] = true;
}
