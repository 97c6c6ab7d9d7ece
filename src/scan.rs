//! Word-parallel signature scanning.
//!
//! Given a row's signature bytes and a target signature, [`SigScan`] yields
//! the slot indices whose signature equals the target, in ascending order.
//! The probe reads eight signature bytes at a time and uses the classic
//! zero-byte trick on `word ^ broadcast(target)` to reject whole spans in a
//! handful of instructions. The subtraction in that trick can flag a byte
//! adjacent to a real match, so every flagged lane is confirmed against the
//! actual byte before it is yielded; the iterator's output is bit-for-bit
//! identical to the reference byte loop it is tested against.

const LANE_LO: u64 = 0x0101_0101_0101_0101;
const LANE_HI: u64 = 0x8080_8080_8080_8080;

/// High-bit flags for the lanes of `x` that may be zero. Exact on whether
/// any lane is zero; individual flags may spill into the lane above a true
/// zero and need confirmation.
#[inline(always)]
fn zero_lane_flags(x: u64) -> u64 {
    x.wrapping_sub(LANE_LO) & !x & LANE_HI
}

/// Iterator over the indices in `sigs` holding `target`, ascending.
pub(crate) struct SigScan<'a> {
    sigs: &'a [u8],
    target: u8,
    broadcast: u64,
    /// First index not yet covered by `flags`.
    cursor: usize,
    /// Start index of the word `flags` describes.
    base: usize,
    /// Unconsumed candidate flags for the current word (0x80 per lane).
    flags: u64,
}

impl<'a> SigScan<'a> {
    #[inline]
    pub(crate) fn new(sigs: &'a [u8], target: u8) -> Self {
        SigScan {
            sigs,
            target,
            broadcast: LANE_LO * target as u64,
            cursor: 0,
            base: 0,
            flags: 0,
        }
    }
}

impl<'a> Iterator for SigScan<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            // Drain confirmed candidates from the current word first.
            while self.flags != 0 {
                let lane = (self.flags.trailing_zeros() >> 3) as usize;
                self.flags &= self.flags - 1;
                let idx = self.base + lane;
                if self.sigs[idx] == self.target {
                    return Some(idx);
                }
            }

            if self.cursor + 8 <= self.sigs.len() {
                let chunk: [u8; 8] = self.sigs[self.cursor..self.cursor + 8]
                    .try_into()
                    .unwrap();
                let word = u64::from_le_bytes(chunk);
                self.flags = zero_lane_flags(word ^ self.broadcast);
                self.base = self.cursor;
                self.cursor += 8;
            } else if self.cursor < self.sigs.len() {
                // Tail shorter than a word: plain byte test.
                let idx = self.cursor;
                self.cursor += 1;
                if self.sigs[idx] == self.target {
                    return Some(idx);
                }
            } else {
                return None;
            }
        }
    }
}

/// Reference scanner: the naive byte loop the word-parallel probe must agree
/// with exactly.
#[cfg(test)]
pub(crate) fn scan_byte_by_byte(sigs: &[u8], target: u8) -> Vec<usize> {
    sigs.iter()
        .enumerate()
        .filter(|(_, &s)| s == target)
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scan_swar(sigs: &[u8], target: u8) -> Vec<usize> {
        SigScan::new(sigs, target).collect()
    }

    #[test]
    fn empty_and_short_inputs() {
        assert_eq!(scan_swar(&[], 7), Vec::<usize>::new());
        assert_eq!(scan_swar(&[7], 7), vec![0]);
        assert_eq!(scan_swar(&[1, 2, 3], 7), Vec::<usize>::new());
        // Shorter than one word: pure tail path.
        assert_eq!(scan_swar(&[7, 1, 7, 1, 7], 7), vec![0, 2, 4]);
    }

    #[test]
    fn matches_across_word_boundaries() {
        let mut sigs = vec![0u8; 20];
        sigs[0] = 9;
        sigs[7] = 9;
        sigs[8] = 9;
        sigs[15] = 9;
        sigs[19] = 9;
        assert_eq!(scan_swar(&sigs, 9), vec![0, 7, 8, 15, 19]);
    }

    #[test]
    fn zero_signature_is_an_ordinary_target() {
        // Holes carry signature 0; scanning for 0 must still be exact.
        let sigs = [0u8, 5, 0, 5, 0, 5, 0, 5, 0];
        assert_eq!(scan_swar(&sigs, 0), vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn adjacent_lane_spill_is_confirmed_away() {
        // target ^ sig == 0x01 in the lane above a true match is the classic
        // false-flag shape for the zero-byte trick.
        let target = 0x10u8;
        let sigs = [target, target ^ 0x01, 0, 0, 0, 0, 0, 0];
        assert_eq!(scan_swar(&sigs, target), vec![0]);
    }

    #[test]
    fn all_lanes_matching() {
        let sigs = [3u8; 24];
        let expect: Vec<usize> = (0..24).collect();
        assert_eq!(scan_swar(&sigs, 3), expect);
    }

    proptest! {
        /// Word-parallel scan ≡ byte-by-byte scan on arbitrary signature
        /// arrays, including targets that appear nowhere.
        #[test]
        fn swar_equals_byte_loop(
            sigs in proptest::collection::vec(any::<u8>(), 0..512),
            target in any::<u8>(),
        ) {
            prop_assert_eq!(scan_swar(&sigs, target), scan_byte_by_byte(&sigs, target));
        }

        /// Low-entropy signatures stress runs of matches and near-matches.
        #[test]
        fn swar_equals_byte_loop_low_entropy(
            sigs in proptest::collection::vec(0u8..4, 0..512),
            target in 0u8..4,
        ) {
            prop_assert_eq!(scan_swar(&sigs, target), scan_byte_by_byte(&sigs, target));
        }
    }
}
