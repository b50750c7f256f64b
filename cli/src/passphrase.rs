//! Pronounceable random passphrases, each carrying 35 bits of entropy:
//! log2(24 templates * 5^4 vowels * 22^4 consonants * 10 digits).

use rand::rngs::OsRng;
use rand::{Rng, TryRngCore};

/// Each template alternates 4 vowel slots and 4 consonant slots.
const TEMPLATES: [&str; 24] = [
    "aababbab", "aabbabab", "aabbabba", "abaabbab", "abababab", "abababba",
    "ababbaab", "ababbaba", "abbaabab", "abbaabba", "abbabaab", "abbababa",
    "abbabbaa", "baababab", "baababba", "baabbaab", "baabbaba", "babaabab",
    "babaabba", "bababaab", "babababa", "bababbaa", "babbaaba", "babbabaa",
];

const VOWELS: [&str; 5] = ["a", "e", "i", "o", "u"];

const CONSONANTS: [&str; 22] = [
    "b", "c", "d", "f", "g", "h", "j", "k", "l", "m", "n", "p", "r", "s", "v",
    "w", "x", "y", "z", "ch", "ph", "st",
];

pub fn generate(rng: &mut impl Rng) -> String {
    let template = TEMPLATES[rng.random_range(0..TEMPLATES.len())];
    let mut word = String::new();
    for slot in template.chars() {
        let part = if slot == 'a' {
            VOWELS[rng.random_range(0..VOWELS.len())]
        } else {
            CONSONANTS[rng.random_range(0..CONSONANTS.len())]
        };
        word.push_str(part);
    }
    let mut out = String::with_capacity(word.len() + 1);
    let mut chars = word.chars();
    if let Some(first) = chars.next() {
        out.push(first.to_ascii_uppercase());
        out.push_str(chars.as_str());
    }
    out.push(char::from(b'0' + rng.random_range(0..10u8)));
    out
}

/// Three independent passphrases from the system rng, so the user can
/// pick one they can remember.
#[must_use]
pub fn generate_three() -> [String; 3] {
    let mut rng = OsRng.unwrap_err();
    std::array::from_fn(|_| generate(&mut rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn templates_have_four_slots_of_each_kind() {
        for template in TEMPLATES {
            assert_eq!(template.len(), 8);
            assert_eq!(template.chars().filter(|&c| c == 'a').count(), 4, "{template}");
        }
    }

    #[test]
    fn passphrases_are_well_formed() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let passphrase = generate(&mut rng);
            // 8 slots of 1-2 letters plus the digit
            assert!((9..=13).contains(&passphrase.len()), "{passphrase}");
            assert!(passphrase.chars().next().is_some_and(|c| c.is_ascii_uppercase()));
            assert!(passphrase.chars().last().is_some_and(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn passphrases_vary() {
        let mut rng = StdRng::seed_from_u64(7);
        let a = generate(&mut rng);
        let b = generate(&mut rng);
        assert_ne!(a, b);
    }
}
