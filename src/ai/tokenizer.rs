//! Token Estimation
//!
//! Heuristic sizing of text into model tokens, used to decide when content
//! must be segmented before it is sent to a backend.
//!
//! ## Strategy
//! - CJK characters weigh ~1.5 tokens each
//! - Latin letters weigh ~0.25 tokens each
//! - Everything else (digits, punctuation, whitespace) weighs ~0.5
//!
//! The result is an upper-bound estimate, never a billing figure.

use crate::ai::provider::ChatMessage;
use crate::constants::tokens;

/// Character class used for weighting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharClass {
    Cjk,
    Latin,
    Other,
}

impl CharClass {
    pub fn of(c: char) -> Self {
        if is_cjk(c) {
            CharClass::Cjk
        } else if is_latin_letter(c) {
            CharClass::Latin
        } else {
            CharClass::Other
        }
    }

    /// Weight in quarter tokens, so sums stay exact before the final ceil
    fn quarters(self) -> u64 {
        let weight = match self {
            CharClass::Cjk => tokens::CJK_WEIGHT,
            CharClass::Latin => tokens::LATIN_WEIGHT,
            CharClass::Other => tokens::OTHER_WEIGHT,
        };
        (weight * 4.0).round() as u64
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3000..=0x303F     // CJK symbols and punctuation
        | 0x3040..=0x30FF   // Hiragana, Katakana
        | 0x3400..=0x4DBF   // CJK extension A
        | 0x4E00..=0x9FFF   // CJK unified ideographs
        | 0xAC00..=0xD7AF   // Hangul syllables
        | 0xF900..=0xFAFF   // CJK compatibility ideographs
        | 0xFF00..=0xFFEF   // Halfwidth and fullwidth forms
        | 0x20000..=0x2FA1F // CJK extensions B-F, compatibility supplement
    )
}

fn is_latin_letter(c: char) -> bool {
    c.is_ascii_alphabetic() || (matches!(c as u32, 0x00C0..=0x024F) && c.is_alphabetic())
}

/// Token estimator for context management
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenEstimator;

impl TokenEstimator {
    pub fn new() -> Self {
        Self
    }

    /// Estimate token count for a string
    pub fn estimate(&self, text: &str) -> usize {
        let quarters: u64 = text.chars().map(|c| CharClass::of(c).quarters()).sum();
        quarters.div_ceil(4) as usize
    }

    /// Estimate tokens across the content of every message
    pub fn estimate_messages(&self, messages: &[ChatMessage]) -> usize {
        messages.iter().map(|m| self.estimate(&m.content)).sum()
    }
}

/// Estimate token count with the default estimator
#[inline]
pub fn estimate_tokens(text: &str) -> usize {
    TokenEstimator.estimate(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_latin_weight() {
        // 8 letters * 0.25 = 2
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        // 5 letters * 0.25 = 1.25 -> 2
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn test_cjk_weight() {
        // 4 ideographs * 1.5 = 6
        assert_eq!(estimate_tokens("平安银行"), 6);
        // kana and hangul count as CJK too
        assert_eq!(estimate_tokens("カナ"), 3);
        assert_eq!(estimate_tokens("안녕"), 3);
    }

    #[test]
    fn test_other_weight() {
        // 4 digits * 0.5 = 2
        assert_eq!(estimate_tokens("1234"), 2);
        // 1 space * 0.5 -> 1
        assert_eq!(estimate_tokens(" "), 1);
    }

    #[test]
    fn test_mixed_content() {
        // "PE 12.5倍": P,E = 0.5; " ", "1","2",".","5" = 2.5; 倍 = 1.5 -> 4.5 -> 5
        assert_eq!(estimate_tokens("PE 12.5倍"), 5);
    }

    #[test]
    fn test_char_classes() {
        assert_eq!(CharClass::of('a'), CharClass::Latin);
        assert_eq!(CharClass::of('é'), CharClass::Latin);
        assert_eq!(CharClass::of('银'), CharClass::Cjk);
        assert_eq!(CharClass::of('。'), CharClass::Cjk);
        assert_eq!(CharClass::of('7'), CharClass::Other);
        assert_eq!(CharClass::of('\n'), CharClass::Other);
    }

    #[test]
    fn test_estimate_messages() {
        let messages = vec![
            ChatMessage::system("abcd"),
            ChatMessage::user("平安"),
        ];
        assert_eq!(TokenEstimator.estimate_messages(&messages), 1 + 3);
    }

    proptest! {
        #[test]
        fn prop_latin_only_is_quarter_ceiling(s in "[a-zA-Z]{0,200}") {
            prop_assert_eq!(estimate_tokens(&s), s.len().div_ceil(4));
        }

        #[test]
        fn prop_subadditive(a in ".{0,64}", b in ".{0,64}") {
            let joined = format!("{}{}", a, b);
            prop_assert!(estimate_tokens(&joined) <= estimate_tokens(&a) + estimate_tokens(&b));
            prop_assert!(estimate_tokens(&joined) >= estimate_tokens(&a).max(estimate_tokens(&b)));
        }

        #[test]
        fn prop_bounded_by_weights(s in ".{0,128}") {
            let chars = s.chars().count();
            let estimate = estimate_tokens(&s);
            prop_assert!(estimate <= (chars * 3).div_ceil(2));
            prop_assert!(estimate >= chars.div_ceil(4));
        }
    }
}
