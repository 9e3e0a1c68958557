//! Locally generated server passwords.
//!
//! Passwords come from a `SmallRng` seeded once from the thread RNG. The
//! generator is fast but not cryptographically strong; these passwords only
//! gate joining a game server for a few hours.

use std::sync::{Mutex, PoisonError};

use rand::distr::Alphanumeric;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Length of generated passwords.
pub const PASSWORD_LENGTH: usize = 10;

/// Process-seeded password source.
pub struct PasswordGenerator {
    rng: Mutex<SmallRng>,
}

impl PasswordGenerator {
    /// Seed from the thread RNG.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(SmallRng::from_rng(&mut rand::rng())),
        }
    }

    /// Deterministic generator for tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        }
    }

    /// A fresh alphanumeric password.
    pub fn generate(&self) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        std::iter::repeat_with(|| char::from(rng.sample(Alphanumeric)))
            .take(PASSWORD_LENGTH)
            .collect()
    }
}

impl Default for PasswordGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_shape() {
        let generator = PasswordGenerator::new();
        let password = generator.generate();
        assert_eq!(password.len(), PASSWORD_LENGTH);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_seeded_is_deterministic() {
        let a = PasswordGenerator::seeded(7);
        let b = PasswordGenerator::seeded(7);
        assert_eq!(a.generate(), b.generate());
        assert_ne!(a.generate(), a.generate());
    }
}
