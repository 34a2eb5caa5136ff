// Shared helpers for unit tests that need to steer random draws.

use std::collections::VecDeque;

use rand::{Error, RngCore};

/// An RNG that replays scripted values, then yields zeros.
///
/// `rng.gen::<f64>()` on this RNG returns the next scripted unit value
/// (up to 2^-53 rounding), which lets a test force every masking branch.
pub struct ScriptedRng {
    words: VecDeque<u64>,
}

impl ScriptedRng {
    /// Script a sequence of uniform [0, 1) draws
    pub fn units(values: &[f64]) -> Self {
        let words = values
            .iter()
            .map(|&p| {
                assert!((0.0..1.0).contains(&p), "scripted draw {p} outside [0, 1)");
                ((p * (1u64 << 53) as f64) as u64) << 11
            })
            .collect();
        Self { words }
    }
}

impl RngCore for ScriptedRng {
    fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.words.pop_front().unwrap_or(0)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let bytes = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}
