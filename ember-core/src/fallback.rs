//! Deterministic local reply generation.
//!
//! When no provider credential exists, or the provider reports quota
//! exhaustion, replies come from small personality-keyed canned sets with
//! humanlike pacing: a per-personality base delay plus random jitter.

use crate::character::Personality;
use rand::Rng;
use std::time::Duration;

const FRIENDLY_REPLIES: &[&str] = &[
    "It's so good to hear from you! Tell me more about that.",
    "I was hoping you'd stop by. What's on your mind?",
    "That's really interesting! How did that make you feel?",
    "You always have the best stories. Go on!",
    "I'm glad you told me that. What happened next?",
];

const SARCASTIC_REPLIES: &[&str] = &[
    "Oh, fascinating. Do go on, I'm positively riveted.",
    "Wow. Groundbreaking stuff. Truly.",
    "Let me guess, you want my honest opinion? Bold move.",
    "Sure, because that worked out so well last time.",
    "I'd act surprised, but we both know I saw that coming.",
];

const WISE_REPLIES: &[&str] = &[
    "Patience. The answer you seek often arrives once you stop chasing it.",
    "Consider this: the obstacle in your path may be the path.",
    "I have seen many face the same crossroads. Few regret choosing kindness.",
    "Sit with that thought a while longer. It has more to teach you.",
    "A question well asked is already half answered.",
];

const MYSTERIOUS_REPLIES: &[&str] = &[
    "There are things about that I cannot tell you. Not yet.",
    "Curious that you mention it. The timing is... notable.",
    "Some doors are better left closed. This may be one of them.",
    "I knew you would ask. I know more than I let on.",
    "The shadows keep their own counsel. As do I.",
];

const CHEERFUL_REPLIES: &[&str] = &[
    "That's amazing!! I love it!",
    "Best news I've heard all day! Tell me everything!",
    "Yes! This is exactly the kind of thing I live for!",
    "You just made my whole week, honestly!",
    "Ooh ooh ooh, and then what?!",
];

/// The canned-reply set for a personality. Personalities without a
/// dedicated set use the friendly one.
pub fn reply_set(personality: Personality) -> &'static [&'static str] {
    match personality {
        Personality::Friendly => FRIENDLY_REPLIES,
        Personality::Sarcastic => SARCASTIC_REPLIES,
        Personality::Wise => WISE_REPLIES,
        Personality::Mysterious => MYSTERIOUS_REPLIES,
        Personality::Cheerful => CHEERFUL_REPLIES,
        _ => FRIENDLY_REPLIES,
    }
}

/// Base thinking/typing delay per personality.
pub fn base_delay(personality: Personality) -> Duration {
    let millis = match personality {
        Personality::Cheerful => 700,
        Personality::Friendly => 900,
        Personality::Adventurous => 1100,
        Personality::Romantic => 1300,
        Personality::Serious => 1500,
        Personality::Sarcastic => 1600,
        Personality::Mysterious => 1900,
        Personality::Wise => 2300,
        Personality::Unknown => 900,
    };
    Duration::from_millis(millis)
}

/// Maximum random jitter added on top of the base delay.
pub const DELAY_JITTER_MS: u64 = 700;

/// Pick one canned reply uniformly at random.
pub fn pick_reply<R: Rng>(personality: Personality, rng: &mut R) -> &'static str {
    let set = reply_set(personality);
    set[rng.gen_range(0..set.len())]
}

/// The full simulated typing delay: base plus jitter.
pub fn typing_delay<R: Rng>(personality: Personality, rng: &mut R) -> Duration {
    base_delay(personality) + Duration::from_millis(rng.gen_range(0..DELAY_JITTER_MS))
}
