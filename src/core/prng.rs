// Small seedable PRNG for per-trial draws (placement delay).
//
// Not cryptographically secure. A run seeded with the same value draws the
// same delays, which lets a session be replayed exactly.

const ZERO_STATE_SUBSTITUTE: u64 = 0x9E37_79B9_7F4A_7C15;

#[derive(Debug, Clone)]
pub struct Prng {
    state: u64,
}

impl Prng {
    pub fn new(seed: u64) -> Self {
        // xorshift never leaves the zero state.
        let state = if seed == 0 {
            ZERO_STATE_SUBSTITUTE
        } else {
            seed
        };
        Self { state }
    }

    /// Seed from the session identity so each (participant, trial) pair gets
    /// its own stream without the caller tracking state across processes.
    pub fn for_trial(base_seed: u64, trial_index: u32) -> Self {
        let mixed = base_seed ^ (trial_index as u64).wrapping_mul(0xD1B5_4A32_D192_ED03);
        let mut p = Self::new(mixed);
        // Discard a few outputs so nearby seeds decorrelate.
        for _ in 0..4 {
            p.next_u64();
        }
        p
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform integer in `low..=high`.
    pub fn gen_range_inclusive(&mut self, low: u32, high: u32) -> u32 {
        if high <= low {
            return low;
        }
        let span = (high - low) as u64 + 1;
        low + (self.next_u64() % span) as u32
    }
}
