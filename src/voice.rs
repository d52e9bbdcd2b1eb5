//! Voice-selection policy.
//!
//! Pure and stateless: given the currently available voices and the voice
//! used last time, pick one at random while avoiding immediate repetition
//! whenever an alternative exists.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::TtsError;

/// Pick a voice from `available`, excluding `previous` when it is present
/// and alternatives remain.
///
/// The random source is supplied by the caller so selection is
/// reproducible under a seeded generator.
pub fn pick_voice<R: Rng + ?Sized>(
    available: &[String],
    previous: Option<&str>,
    rng: &mut R,
) -> Result<String, TtsError> {
    if available.is_empty() {
        return Err(TtsError::EmptyCandidateSet);
    }

    let candidates: Vec<&String> = match previous {
        Some(prev) if available.iter().any(|v| v == prev) => {
            available.iter().filter(|v| v.as_str() != prev).collect()
        }
        _ => available.iter().collect(),
    };

    candidates
        .choose(rng)
        .map(|v| (*v).clone())
        .ok_or(TtsError::NoAlternativeVoice)
}

/// [`pick_voice`] with the thread-local generator.
pub fn pick_random_voice(
    available: &[String],
    previous: Option<&str>,
) -> Result<String, TtsError> {
    pick_voice(available, previous, &mut rand::thread_rng())
}
