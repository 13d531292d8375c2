// borrowed from smoltcp
// https://github.com/smoltcp-rs/smoltcp/blob/774b375cb04e694199e27c7b9e36628436a4fac3/src/rand.rs

/// Lower bound (inclusive) of the symmetric retransmit jitter, in seconds.
pub(crate) const DHCP_RAND_MIN: i32 = -1;
/// Upper bound (inclusive) of the symmetric retransmit jitter, in seconds.
pub(crate) const DHCP_RAND_MAX: i32 = 1;

#[cfg(feature = "defmt")]
use dfmt as defmt;

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct Rand {
    state: u64,
}

impl Rand {
    pub(crate) const fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub(crate) fn next_u32(&mut self) -> u32 {
        // sPCG32 from https://www.pcg-random.org/paper.html
        // see also https://nullprogram.com/blog/2017/09/21/
        const M: u64 = 0xbb2efcec3c39611d;
        const A: u64 = 0x7590ef39;

        let s = self.state.wrapping_mul(M).wrapping_add(A);
        self.state = s;

        let shift = 29 - (s >> 61);
        (s >> shift) as u32
    }

    /// A jitter value in `[DHCP_RAND_MIN, DHCP_RAND_MAX]` seconds, per the
    /// retransmission schedule's symmetric jitter requirement.
    pub(crate) fn jitter_secs(&mut self) -> i32 {
        let span = (DHCP_RAND_MAX - DHCP_RAND_MIN + 1) as u32;
        DHCP_RAND_MIN + (self.next_u32() % span) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_is_in_range() {
        let mut rand = Rand::new(0xdead_beef);
        for _ in 0..1000 {
            let j = rand.jitter_secs();
            assert!((DHCP_RAND_MIN..=DHCP_RAND_MAX).contains(&j));
        }
    }

    #[test]
    fn deterministic_for_seed() {
        let mut a = Rand::new(42);
        let mut b = Rand::new(42);
        for _ in 0..8 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }
}
