//! Game state for the built-in reference variant.
//!
//! A cooperative stack-building card game: every suit has cards ranked
//! `1..=max_rank`, and players take turns playing cards onto per-suit
//! stacks in ascending order, discarding for clue tokens, or spending
//! tokens on clues. Wrong plays cost a strike.
//!
//! The initial state is a pure function of the table options (which carry
//! the shuffle seed) and the number of seats. Everything after that comes
//! from the action log, so folding the log over [`GameState::deal`]
//! always lands on the same state.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use turnhall_protocol::{TableOptions, TableStatus};

/// One card. Suits are numbered from 0, ranks from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Card {
    pub suit: u8,
    pub rank: u8,
}

/// Full game state of an ongoing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    /// Draw pile; the next card drawn is the last element.
    pub deck: Vec<Card>,
    /// One hand per seat, in seat order.
    pub hands: Vec<Vec<Card>>,
    /// Highest rank played per suit (`0` = nothing played yet).
    pub stacks: Vec<u8>,
    pub discards: Vec<Card>,
    pub clues: u8,
    pub strikes: u8,
    /// `false` for seats vacated after their owner's grace period ran out.
    pub present: Vec<bool>,
    /// Seat index whose turn it is.
    pub turn: usize,
    /// Turns each seat still has once the deck has run out.
    pub final_turns: Option<Vec<u8>>,
    /// Set when the game has reached a terminal status.
    pub outcome: Option<TableStatus>,
}

impl GameState {
    /// Shuffles a fresh deck with the options' seed and deals every seat
    /// a hand, round-robin. Seat 0 moves first.
    pub fn deal(options: &TableOptions, seats: usize) -> Self {
        let mut deck: Vec<Card> = (0..options.suits)
            .flat_map(|suit| (1..=options.max_rank).map(move |rank| Card { suit, rank }))
            .collect();
        let mut rng = StdRng::seed_from_u64(options.seed.unwrap_or_default());
        deck.shuffle(&mut rng);

        let hand_size = options.hand_size_for(seats);
        let mut hands = vec![Vec::with_capacity(hand_size); seats];
        for _ in 0..hand_size {
            for hand in &mut hands {
                if let Some(card) = deck.pop() {
                    hand.push(card);
                }
            }
        }

        Self {
            deck,
            hands,
            stacks: vec![0; usize::from(options.suits)],
            discards: Vec::new(),
            clues: options.max_clues,
            strikes: 0,
            present: vec![true; seats],
            turn: 0,
            final_turns: None,
            outcome: None,
        }
    }

    /// The state as sent to observers.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    pub fn present_count(&self) -> usize {
        self.present.iter().filter(|&&p| p).count()
    }

    /// `true` when every stack has reached `max_rank`.
    pub fn stacks_complete(&self, max_rank: u8) -> bool {
        self.stacks.iter().all(|&r| r == max_rank)
    }

    /// The next present seat after `seat`, wrapping around. Returns `seat`
    /// itself if it is the only one present, `None` if nobody is.
    pub fn next_present_after(&self, seat: usize) -> Option<usize> {
        let n = self.present.len();
        (1..=n).map(|i| (seat + i) % n).find(|&s| self.present[s])
    }

    /// Moves the top card of the deck into `seat`'s hand.
    ///
    /// When this empties the deck the final round starts: every present
    /// seat gets one more turn.
    pub(crate) fn draw(&mut self, seat: usize) {
        if let Some(card) = self.deck.pop() {
            self.hands[seat].push(card);
            if self.deck.is_empty() && self.final_turns.is_none() {
                let mut owed: Vec<u8> = self.present.iter().map(|&p| u8::from(p)).collect();
                // The drawing turn itself doesn't count.
                owed[seat] += 1;
                self.final_turns = Some(owed);
            }
        }
    }

    /// Finishes the current turn and hands it to the next present seat.
    pub(crate) fn end_turn(&mut self) {
        if let Some(owed) = self.final_turns.as_mut() {
            owed[self.turn] = owed[self.turn].saturating_sub(1);
            if owed.iter().all(|&n| n == 0) {
                self.outcome = Some(TableStatus::Finished);
                return;
            }
        }
        match self.next_present_after(self.turn) {
            Some(next) => self.turn = next,
            None => self.outcome = Some(TableStatus::Aborted),
        }
    }

    /// Drops whatever final-round turn `seat` still had. Ends the game if
    /// nobody is owed one any more.
    pub(crate) fn forfeit_final_turn(&mut self, seat: usize) {
        if let Some(owed) = self.final_turns.as_mut() {
            owed[seat] = 0;
            if owed.iter().all(|&n| n == 0) && self.outcome.is_none() {
                self.outcome = Some(TableStatus::Finished);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(seed: u64) -> TableOptions {
        TableOptions {
            seed: Some(seed),
            ..TableOptions::default()
        }
    }

    #[test]
    fn test_deal_is_deterministic_for_a_seed() {
        assert_eq!(GameState::deal(&options(5), 3), GameState::deal(&options(5), 3));
        assert_ne!(
            GameState::deal(&options(5), 3).hands,
            GameState::deal(&options(6), 3).hands
        );
    }

    #[test]
    fn test_deal_distributes_every_card_once() {
        let state = GameState::deal(&options(1), 4);
        assert_eq!(state.hands.len(), 4);
        assert!(state.hands.iter().all(|h| h.len() == 4));
        assert_eq!(state.deck.len(), 25 - 16);

        let mut all: Vec<Card> = state.deck.clone();
        all.extend(state.hands.iter().flatten().copied());
        all.sort_by_key(|c| (c.suit, c.rank));
        all.dedup();
        assert_eq!(all.len(), 25);
    }

    #[test]
    fn test_deal_starts_with_full_clues_and_seat_zero() {
        let state = GameState::deal(&options(1), 2);
        assert_eq!(state.clues, 8);
        assert_eq!(state.strikes, 0);
        assert_eq!(state.turn, 0);
        assert_eq!(state.stacks, vec![0; 5]);
        assert!(state.outcome.is_none());
    }

    #[test]
    fn test_next_present_after_skips_absent_seats() {
        let mut state = GameState::deal(&options(1), 4);
        state.present = vec![true, false, false, true];
        assert_eq!(state.next_present_after(0), Some(3));
        assert_eq!(state.next_present_after(3), Some(0));

        state.present = vec![false, false, true, false];
        assert_eq!(state.next_present_after(2), Some(2));

        state.present = vec![false; 4];
        assert_eq!(state.next_present_after(0), None);
    }

    #[test]
    fn test_end_turn_counts_down_final_round() {
        let mut state = GameState::deal(&options(1), 2);
        state.deck.truncate(1);
        state.draw(0);
        assert_eq!(state.final_turns, Some(vec![2, 1]));

        state.end_turn(); // the drawing turn
        assert_eq!(state.turn, 1);
        state.end_turn();
        assert_eq!(state.turn, 0);
        assert!(state.outcome.is_none());
        state.end_turn();
        assert_eq!(state.outcome, Some(TableStatus::Finished));
    }

    #[test]
    fn test_forfeit_final_turn_ends_game_when_nobody_is_owed() {
        let mut state = GameState::deal(&options(1), 2);
        state.forfeit_final_turn(1);
        assert!(state.outcome.is_none());

        state.final_turns = Some(vec![0, 1]);
        state.forfeit_final_turn(1);
        assert_eq!(state.outcome, Some(TableStatus::Finished));
    }
}
