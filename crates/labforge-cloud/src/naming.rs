//! Unique resource names and node passwords

use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::HashSet;

const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"()`~!@#$%^&*-+=_|{}[]:;<>,.?/";

/// Generates `<prefix>-<suffix>` names that avoid a set of taken names
#[derive(Debug, Clone)]
pub struct NameGenerator {
    prefix: String,
    alphabet: Vec<char>,
    suffix_len: usize,
    rolls_per_length: u32,
}

impl NameGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            alphabet: LOWERCASE.iter().map(|&b| b as char).collect(),
            suffix_len: 6,
            rolls_per_length: 16,
        }
    }

    /// Restrict the suffix alphabet (mostly useful to force collisions)
    pub fn with_alphabet(mut self, alphabet: &str) -> Self {
        let chars: Vec<char> = alphabet.chars().collect();
        if !chars.is_empty() {
            self.alphabet = chars;
        }
        self
    }

    pub fn with_suffix_len(mut self, len: usize) -> Self {
        self.suffix_len = len.max(1);
        self
    }

    /// Number of random draws at one suffix length before growing the suffix
    pub fn with_rolls_per_length(mut self, rolls: u32) -> Self {
        self.rolls_per_length = rolls.max(1);
        self
    }

    /// Produce a name not contained in `taken`.
    ///
    /// Draws at the configured suffix length first; once `rolls_per_length`
    /// draws in a row collide, the suffix grows by one character. `taken` is
    /// finite, so this always terminates.
    pub fn generate<R: Rng + ?Sized>(&self, taken: &HashSet<String>, rng: &mut R) -> String {
        let mut len = self.suffix_len;
        loop {
            for _ in 0..self.rolls_per_length {
                let suffix: String = (0..len)
                    .map(|_| self.alphabet[rng.gen_range(0..self.alphabet.len())])
                    .collect();
                let candidate = format!("{}-{}", self.prefix, suffix);
                if !taken.contains(&candidate) {
                    return candidate;
                }
                tracing::trace!("name {} already taken, re-rolling", candidate);
            }
            len += 1;
        }
    }
}

/// Random password accepted by common cloud password policies: at least one
/// lowercase, uppercase, digit and symbol character.
pub fn generate_password<R: Rng + ?Sized>(len: usize, rng: &mut R) -> String {
    let len = len.max(8);
    let classes = [LOWERCASE, UPPERCASE, DIGITS, SYMBOLS];

    let mut chars: Vec<char> = classes
        .iter()
        .map(|class| class[rng.gen_range(0..class.len())] as char)
        .collect();

    let pool: Vec<u8> = [LOWERCASE, UPPERCASE, DIGITS].concat();
    while chars.len() < len {
        chars.push(pool[rng.gen_range(0..pool.len())] as char);
    }

    chars.shuffle(rng);
    chars.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_name_has_prefix_and_lowercase_suffix() {
        let mut rng = StdRng::seed_from_u64(7);
        let name = NameGenerator::new("lab-vpc").generate(&HashSet::new(), &mut rng);

        let suffix = name.strip_prefix("lab-vpc-").unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn test_name_avoids_exhausted_suffix_space() {
        // With a one-letter alphabet every length has exactly one candidate.
        let taken: HashSet<String> = ["lab-a", "lab-aa", "lab-aaa"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let generator = NameGenerator::new("lab")
            .with_alphabet("a")
            .with_suffix_len(1)
            .with_rolls_per_length(4);

        let mut rng = StdRng::seed_from_u64(1);
        let name = generator.generate(&taken, &mut rng);
        assert_eq!(name, "lab-aaaa");
    }

    #[test]
    fn test_name_never_collides_with_two_letter_alphabet() {
        let mut taken: HashSet<String> = HashSet::new();
        for a in ["x", "y"] {
            taken.insert(format!("sg-{}", a));
            for b in ["x", "y"] {
                taken.insert(format!("sg-{}{}", a, b));
            }
        }
        let generator = NameGenerator::new("sg")
            .with_alphabet("xy")
            .with_suffix_len(1)
            .with_rolls_per_length(2);

        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let name = generator.generate(&taken, &mut rng);
            assert!(!taken.contains(&name));
            taken.insert(name);
        }
    }

    #[test]
    fn test_password_contains_every_class() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let password = generate_password(16, &mut rng);
            assert_eq!(password.chars().count(), 16);
            assert!(password.chars().any(|c| c.is_ascii_lowercase()));
            assert!(password.chars().any(|c| c.is_ascii_uppercase()));
            assert!(password.chars().any(|c| c.is_ascii_digit()));
            assert!(password.chars().any(|c| SYMBOLS.contains(&(c as u8))));
        }
    }
}
