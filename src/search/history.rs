use std::sync::atomic::{AtomicI32, Ordering};

use crate::board::position::{Color, PieceType};

// Ordering scores never leave [-HISTORY_MAX, HISTORY_MAX]; the picker relies
// on this bound when it ranks killers above any history score.
pub const HISTORY_MAX: i32 = 16384;

// Butterfly-style history shared by all search threads. Entries are plain
// relaxed atomics: a lost update only costs ordering quality.
pub struct History {
    table: Box<[[[AtomicI32; 64]; 7]; 2]>,
}

impl History {
    pub fn new() -> Self {
        Self {
            table: Box::new(std::array::from_fn(|_| {
                std::array::from_fn(|_| std::array::from_fn(|_| AtomicI32::new(0)))
            })),
        }
    }

    #[inline(always)]
    pub fn ordering_score(&self, color: Color, piece: PieceType, to: u8) -> i32 {
        self.table[color as usize][piece as usize][to as usize].load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn update(&self, color: Color, piece: PieceType, to: u8, bonus: i32) {
        if piece == PieceType::None {
            return;
        }
        let h = &self.table[color as usize][piece as usize][to as usize];
        let old = h.load(Ordering::Relaxed);
        let new = old + bonus - old * bonus.abs() / HISTORY_MAX;
        h.store(new.clamp(-HISTORY_MAX, HISTORY_MAX), Ordering::Relaxed);
    }

    pub fn clear(&self) {
        for color in self.table.iter() {
            for piece in color.iter() {
                for to in piece.iter() {
                    to.store(0, Ordering::Relaxed);
                }
            }
        }
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_and_clear() {
        let h = History::new();
        h.update(Color::White, PieceType::Knight, 18, 500);
        assert_eq!(h.ordering_score(Color::White, PieceType::Knight, 18), 500);
        assert_eq!(h.ordering_score(Color::Black, PieceType::Knight, 18), 0);

        h.clear();
        assert_eq!(h.ordering_score(Color::White, PieceType::Knight, 18), 0);
    }

    #[test]
    fn test_saturates_at_history_max() {
        let h = History::new();
        for _ in 0..100 {
            h.update(Color::White, PieceType::Rook, 0, 4000);
        }
        assert!(h.ordering_score(Color::White, PieceType::Rook, 0) <= HISTORY_MAX);
    }
}
