//! Password entropy estimation and strength warnings.
//!
//! Estimates the entropy of a passphrase used to encrypt a keychain's seed or
//! private key, based on character-class analysis and common-password detection.
//!
//! # Entropy Levels
//!
//! | Level     | Bits   | Meaning                                    |
//! |-----------|--------|--------------------------------------------|
//! | Dangerous | < 28   | Trivially brute-forceable                  |
//! | Weak      | 28–35  | Vulnerable to targeted attack              |
//! | Fair      | 36–59  | Adequate for casual threats                |
//! | Strong    | 60–127 | Resistant to well-funded attackers         |
//! | Excellent | ≥ 128  | Beyond brute-force for foreseeable future   |
//!
//! This is a warning system, not a gate: a keychain can still be encrypted with
//! a weak passphrase if the caller chooses to ignore the warning.

use std::collections::HashSet;

/// Minimum recommended entropy for seed/privkey encryption (bits)
pub const MIN_RECOMMENDED_ENTROPY: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PasswordStrength {
    Dangerous,
    Weak,
    Fair,
    Strong,
    Excellent,
}

impl PasswordStrength {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Dangerous => "Dangerous — trivially crackable, do not use for seed encryption",
            Self::Weak => "Weak — vulnerable to targeted attacks",
            Self::Fair => {
                "Fair — adequate for casual threats but not recommended for seed encryption"
            }
            Self::Strong => "Strong — resistant to well-funded attackers",
            Self::Excellent => "Excellent — beyond brute-force for the foreseeable future",
        }
    }

    pub fn is_recommended(&self) -> bool {
        *self >= Self::Strong
    }
}

#[derive(Debug, Clone)]
pub struct PasswordAnalysis {
    pub entropy_bits: f64,
    pub strength: PasswordStrength,
    pub warnings: Vec<String>,
    pub meets_minimum: bool,
}

const COMMON_PASSWORDS: &[&str] = &[
    "password",
    "123456",
    "12345678",
    "qwerty",
    "abc123",
    "monkey",
    "1234567",
    "letmein",
    "trustno1",
    "dragon",
    "baseball",
    "iloveyou",
    "master",
    "sunshine",
    "ashley",
    "bailey",
    "shadow",
    "123456789",
    "1234567890",
    "password1",
    "bitcoin",
    "satoshi",
    "nakamoto",
    "hodl",
    "moon",
    "lambo",
    "seed",
    "wallet",
    "crypto",
];

/// Estimate the entropy of a password in bits.
///
/// Penalizes common passwords, short length, repeated characters, and
/// sequential runs; gives a small bonus to multi-word passphrases.
pub fn estimate_entropy(password: &str) -> PasswordAnalysis {
    let mut warnings = Vec::new();

    if password.is_empty() {
        return PasswordAnalysis {
            entropy_bits: 0.0,
            strength: PasswordStrength::Dangerous,
            warnings: vec!["Password is empty".to_string()],
            meets_minimum: false,
        };
    }

    let lower = password.to_lowercase();
    if COMMON_PASSWORDS
        .iter()
        .any(|&cp| lower == cp || lower.contains(cp))
    {
        warnings.push("Contains a commonly used password or word".to_string());
    }

    let mut has_lower = false;
    let mut has_upper = false;
    let mut has_digit = false;
    let mut has_symbol = false;
    let mut has_unicode = false;

    for ch in password.chars() {
        if ch.is_ascii_lowercase() {
            has_lower = true;
        } else if ch.is_ascii_uppercase() {
            has_upper = true;
        } else if ch.is_ascii_digit() {
            has_digit = true;
        } else if ch.is_ascii_punctuation() || ch == ' ' {
            has_symbol = true;
        } else {
            has_unicode = true;
        }
    }

    let mut charset_size: f64 = 0.0;
    if has_lower {
        charset_size += 26.0;
    }
    if has_upper {
        charset_size += 26.0;
    }
    if has_digit {
        charset_size += 10.0;
    }
    if has_symbol {
        charset_size += 33.0;
    }
    if has_unicode {
        charset_size += 100.0;
    }
    if charset_size < 1.0 {
        charset_size = 1.0;
    }

    let len = password.chars().count() as f64;
    let mut entropy = len * charset_size.log2();

    let unique_chars: HashSet<char> = password.chars().collect();
    let unique_ratio = unique_chars.len() as f64 / len;
    if unique_ratio < 0.5 {
        let penalty = (1.0 - unique_ratio) * entropy * 0.3;
        entropy -= penalty;
        warnings.push("Too many repeated characters".to_string());
    }

    let sequential_count = count_sequential(password);
    if sequential_count > 2 {
        let penalty = sequential_count as f64 * 2.0;
        entropy -= penalty;
        warnings.push("Contains sequential patterns".to_string());
    }

    if (has_lower != has_upper) && !has_digit && !has_symbol {
        entropy *= 0.85;
        if password.len() < 12 {
            warnings
                .push("Single character class — add numbers, symbols, or mixed case".to_string());
        }
    }

    let word_count = password.split_whitespace().count();
    if word_count >= 4 {
        let word_bonus = (word_count as f64 - 3.0) * 3.0;
        entropy += word_bonus;
    }

    if entropy < 0.0 {
        entropy = 0.0;
    }

    if password.len() < 8 {
        warnings.push("Password is very short (< 8 characters)".to_string());
    } else if password.len() < 12 {
        warnings.push("Consider a longer password (12+ characters recommended)".to_string());
    }

    let strength = if entropy < 28.0 {
        PasswordStrength::Dangerous
    } else if entropy < 36.0 {
        PasswordStrength::Weak
    } else if entropy < 60.0 {
        PasswordStrength::Fair
    } else if entropy < 128.0 {
        PasswordStrength::Strong
    } else {
        PasswordStrength::Excellent
    };

    PasswordAnalysis {
        entropy_bits: entropy,
        strength,
        warnings,
        meets_minimum: strength >= PasswordStrength::Strong,
    }
}

fn count_sequential(password: &str) -> usize {
    let chars: Vec<u32> = password.chars().map(|c| c as u32).collect();
    let mut count = 0;

    for window in chars.windows(3) {
        let (a, b, c) = (window[0], window[1], window[2]);
        if b == a + 1 && c == b + 1 {
            count += 1;
        }
        if a > 1 && b == a - 1 && c == b - 1 {
            count += 1;
        }
    }

    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_password() {
        let analysis = estimate_entropy("");
        assert_eq!(analysis.entropy_bits, 0.0);
        assert_eq!(analysis.strength, PasswordStrength::Dangerous);
        assert!(!analysis.meets_minimum);
    }

    #[test]
    fn common_password_detected() {
        let analysis = estimate_entropy("bitcoin");
        assert!(analysis
            .warnings
            .iter()
            .any(|w| w.contains("commonly used")));
        assert!(!analysis.meets_minimum);
    }

    #[test]
    fn short_password_warned() {
        let analysis = estimate_entropy("abc");
        assert!(analysis.warnings.iter().any(|w| w.contains("very short")));
        assert_eq!(analysis.strength, PasswordStrength::Dangerous);
    }

    #[test]
    fn passphrase_strong() {
        let analysis = estimate_entropy("correct horse battery staple");
        assert!(
            analysis.strength >= PasswordStrength::Strong,
            "classic passphrase should be Strong, got {:?} ({:.1} bits)",
            analysis.strength,
            analysis.entropy_bits
        );
        assert!(analysis.meets_minimum);
    }

    #[test]
    fn repeated_chars_penalized() {
        let analysis = estimate_entropy("aaaaaaaaaa");
        assert!(analysis.warnings.iter().any(|w| w.contains("repeated")));
        let unique_analysis = estimate_entropy("qxmtpjwrkz");
        assert!(analysis.entropy_bits < unique_analysis.entropy_bits);
    }

    #[test]
    fn sequential_patterns_penalized() {
        let analysis = estimate_entropy("abcdefgh");
        assert!(analysis.warnings.iter().any(|w| w.contains("sequential")));
    }

    #[test]
    fn strength_ordering() {
        assert!(PasswordStrength::Dangerous < PasswordStrength::Weak);
        assert!(PasswordStrength::Weak < PasswordStrength::Fair);
        assert!(PasswordStrength::Fair < PasswordStrength::Strong);
        assert!(PasswordStrength::Strong < PasswordStrength::Excellent);
    }

    #[test]
    fn realistic_passwords() {
        assert!(estimate_entropy("letmein").strength <= PasswordStrength::Weak);
        assert!(estimate_entropy("purple-monkey-dishwasher-42").meets_minimum);
    }
}
