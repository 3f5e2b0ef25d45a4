//! チャットメッセージ分類
//!
//! ランキング対象（Counted）とノイズ（Filtered）を判定する純粋関数群。
//! ルールは順序付きのリストで、最初にマッチしたルールがメッセージを除外する。

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// 分類結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageClass {
    Counted,
    Filtered,
}

impl MessageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageClass::Counted => "counted",
            MessageClass::Filtered => "filtered",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "counted" => Some(MessageClass::Counted),
            "filtered" => Some(MessageClass::Filtered),
            _ => None,
        }
    }

    pub fn is_counted(&self) -> bool {
        matches!(self, MessageClass::Counted)
    }
}

/// 除外ルール
#[derive(Debug, Clone, Copy)]
pub struct FilterRule {
    pub name: &'static str,
    pub matches: fn(&str) -> bool,
}

/// 適用順の除外ルール一覧
pub const RULES: &[FilterRule] = &[
    FilterRule {
        name: "too_short",
        matches: is_too_short,
    },
    FilterRule {
        name: "spam",
        matches: is_spam,
    },
    FilterRule {
        name: "low_content",
        matches: is_low_content,
    },
];

/// 最小文字数（コードポイント単位）
pub const MIN_MESSAGE_CHARS: usize = 2;

/// 同一文字の連続でスパム扱いになる長さ
const REPEATED_CHAR_RUN: usize = 5;

/// 1〜3文字の単位が何回繰り返されたらスパム扱いか
const REPEATED_UNIT_TIMES: usize = 4;

/// 空白と組み合わせてこれだけで構成されるメッセージは低情報量扱い
pub const LOW_CONTENT_GLYPHS: &str = "!@#$%^&*(),.?ㅋㅎㅠㅜㄷㄱㅡ";

struct SpamPatterns {
    symbol_run: Regex,
    url: Regex,
}

struct LowContentPatterns {
    glyphs_only: Regex,
    any_letter: Regex,
    digits_only: Regex,
}

fn spam_patterns() -> Result<&'static SpamPatterns, &'static regex::Error> {
    static PATTERNS: OnceLock<Result<SpamPatterns, regex::Error>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Ok(SpamPatterns {
                symbol_run: Regex::new(r"[!@#$%^&*]{3,}")?,
                url: Regex::new(r"https?://")?,
            })
        })
        .as_ref()
}

fn low_content_patterns() -> Result<&'static LowContentPatterns, &'static regex::Error> {
    static PATTERNS: OnceLock<Result<LowContentPatterns, regex::Error>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            let glyphs = regex::escape(LOW_CONTENT_GLYPHS);
            Ok(LowContentPatterns {
                glyphs_only: Regex::new(&format!(r"^[\s{}]+$", glyphs))?,
                any_letter: Regex::new(r"\p{L}")?,
                digits_only: Regex::new(r"^\d+$")?,
            })
        })
        .as_ref()
}

/// メッセージを分類する
pub fn classify(_author: &str, text: &str) -> MessageClass {
    match matching_rule(text) {
        Some(_) => MessageClass::Filtered,
        None => MessageClass::Counted,
    }
}

/// メッセージを除外する最初のルールを返す
pub fn matching_rule(text: &str) -> Option<&'static FilterRule> {
    RULES.iter().find(|rule| (rule.matches)(text))
}

pub fn is_too_short(text: &str) -> bool {
    text.chars().count() < MIN_MESSAGE_CHARS
}

/// スパム判定。パターン異常時は「スパムではない」とみなす。
pub fn is_spam(text: &str) -> bool {
    match spam_patterns() {
        Ok(patterns) => {
            has_repeated_char(text, REPEATED_CHAR_RUN)
                || is_repeated_unit(text)
                || patterns.symbol_run.is_match(text)
                || patterns.url.is_match(text)
        }
        Err(e) => {
            tracing::warn!("⚠️ Spam patterns unavailable: {}", e);
            false
        }
    }
}

/// 絵文字・記号だけのメッセージ判定。パターン異常時は「除外」とみなす。
pub fn is_low_content(text: &str) -> bool {
    match low_content_patterns() {
        Ok(patterns) => {
            if patterns.glyphs_only.is_match(text) {
                return true;
            }
            if patterns.any_letter.is_match(text) {
                return false;
            }
            !patterns.digits_only.is_match(text)
        }
        Err(e) => {
            tracing::warn!("⚠️ Low-content patterns unavailable: {}", e);
            true
        }
    }
}

/// 改行以外の同一文字が `run` 回以上連続しているか
fn has_repeated_char(text: &str, run: usize) -> bool {
    let mut previous: Option<char> = None;
    let mut count = 0;

    for c in text.chars() {
        if c == '\n' {
            previous = None;
            count = 0;
            continue;
        }
        if previous == Some(c) {
            count += 1;
        } else {
            previous = Some(c);
            count = 1;
        }
        if count >= run {
            return true;
        }
    }

    false
}

/// メッセージ全体が1〜3文字の単位の4回以上の繰り返しか
fn is_repeated_unit(text: &str) -> bool {
    if text.contains('\n') {
        return false;
    }

    let chars: Vec<char> = text.chars().collect();
    (1..=3).any(|unit| {
        chars.len() % unit == 0
            && chars.len() / unit >= REPEATED_UNIT_TIMES
            && chars
                .chunks(unit)
                .all(|chunk| chunk == &chars[..unit])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_name(text: &str) -> Option<&'static str> {
        matching_rule(text).map(|rule| rule.name)
    }

    #[test]
    fn test_short_messages_are_filtered() {
        for text in ["", "a", "ㅋ", "😀", " "] {
            assert_eq!(classify("user", text), MessageClass::Filtered, "{:?}", text);
            assert_eq!(rule_name(text), Some("too_short"));
        }
    }

    #[test]
    fn test_length_counts_code_points() {
        // 2コードポイント（UTF-8では6バイト）
        assert!(!is_too_short("가나"));
        assert_eq!(classify("user", "가나"), MessageClass::Counted);
    }

    #[test]
    fn test_urls_are_filtered() {
        for text in [
            "check http://example.com",
            "https://spam.example/path",
            "look at this:https://x.y",
        ] {
            assert_eq!(classify("user", text), MessageClass::Filtered);
            assert_eq!(rule_name(text), Some("spam"));
        }
    }

    #[test]
    fn test_repeated_char_is_spam() {
        assert_eq!(classify("user", "aaaaaaaaaa"), MessageClass::Filtered);
        assert_eq!(rule_name("aaaaaaaaaa"), Some("spam"));
        assert!(is_spam("nooooo way"));
        assert!(!is_spam("noooo way"));
    }

    #[test]
    fn test_repeated_unit_is_spam() {
        assert!(is_spam("hahahaha"));
        assert!(is_spam("abcabcabcabc"));
        assert!(!is_spam("hahaha"));
        // 単位が一致しない
        assert!(!is_spam("hahahahx"));
        // 4文字単位は対象外
        assert!(!is_spam("abcdabcdabcdabcd"));
    }

    #[test]
    fn test_symbol_run_is_spam() {
        assert!(is_spam("wow!!!"));
        assert!(is_spam("@#$ test"));
        assert!(!is_spam("wow!!"));
    }

    #[test]
    fn test_plain_messages_are_counted() {
        for text in ["hello123", "good stream", "안녕하세요", "こんにちは", "GG"] {
            assert_eq!(classify("user", text), MessageClass::Counted, "{:?}", text);
            assert_eq!(rule_name(text), None);
        }
    }

    #[test]
    fn test_glyph_only_messages_are_filtered() {
        for text in ["ㅋㅋ", "ㅠㅠ", "?? !", "ㅋㅎ ㅋㅎ", "(.)"] {
            assert_eq!(classify("user", text), MessageClass::Filtered, "{:?}", text);
            assert_eq!(rule_name(text), Some("low_content"));
        }
    }

    #[test]
    fn test_digits_only_is_counted() {
        assert_eq!(classify("user", "777"), MessageClass::Counted);
        assert_eq!(classify("user", "12"), MessageClass::Counted);
    }

    #[test]
    fn test_non_ascii_digits_are_counted() {
        // 全角数字とアラビア・インド数字
        for text in ["１２３", "٣٣٣"] {
            assert_eq!(classify("user", text), MessageClass::Counted, "{:?}", text);
            assert!(!is_low_content(text));
        }
    }

    #[test]
    fn test_emoji_only_is_filtered() {
        assert_eq!(classify("user", "😀🎉"), MessageClass::Filtered);
        assert_eq!(classify("user", "1 2"), MessageClass::Filtered);
    }

    #[test]
    fn test_letters_mixed_with_glyphs_are_counted() {
        assert_eq!(classify("user", "ㅋㅋ nice"), MessageClass::Counted);
        assert_eq!(classify("user", "lol 😀"), MessageClass::Counted);
    }

    #[test]
    fn test_rule_order() {
        assert_eq!(
            RULES.iter().map(|rule| rule.name).collect::<Vec<_>>(),
            vec!["too_short", "spam", "low_content"]
        );
        // 繰り返し記号はlow_contentより先にspamとして扱われる
        assert_eq!(rule_name("ㅋㅋㅋㅋㅋ"), Some("spam"));
    }

    #[test]
    fn test_message_class_db_round_trip() {
        assert_eq!(MessageClass::Counted.as_str(), "counted");
        assert_eq!(MessageClass::from_db("filtered"), Some(MessageClass::Filtered));
        assert_eq!(MessageClass::from_db("other"), None);
        assert!(MessageClass::Counted.is_counted());
        assert!(!MessageClass::Filtered.is_counted());
    }
}
