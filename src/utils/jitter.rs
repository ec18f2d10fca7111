//! Thread-local jitter randomness.
//!
//! Each thread owns its own generator, seeded on first touch from a global
//! seeder behind a mutex, so no PRNG state is ever shared across threads
//! without synchronization. Used to spread periodic maintenance work across
//! a fleet that boots together.

use std::cell::RefCell;
use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

static SEEDER: Mutex<Option<StdRng>> = Mutex::new(None);

thread_local! {
    static THREAD_RNG: RefCell<StdRng> = RefCell::new(seeded_rng());
}

fn seeded_rng() -> StdRng {
    let mut seeder = SEEDER.lock().unwrap_or_else(|e| e.into_inner());
    let seeder = seeder.get_or_insert_with(StdRng::from_os_rng);
    StdRng::from_seed(seeder.random())
}

/// A uniformly jittered duration in `[base - variation, base + variation]`,
/// clamped at zero.
pub fn jittered(base: Duration, variation: Duration) -> Duration {
    let variation_ms = variation.as_millis() as i128;
    if variation_ms == 0 {
        return base;
    }
    let base_ms = base.as_millis() as i128;
    let offset = THREAD_RNG.with(|rng| rng.borrow_mut().random_range(-variation_ms..=variation_ms));
    Duration::from_millis((base_ms + offset).max(0) as u64)
}
