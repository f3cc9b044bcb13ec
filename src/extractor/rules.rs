//! Static per-locale rule tables.
//!
//! Each locale carries an ordered list of (name, pattern) rules evaluated
//! top-down, ending in an unnamed catch-all so evaluation is total. Adding a
//! rule means inserting it at the right priority position; ties are never
//! broken by specificity.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::Locale;

pub(super) struct Rule {
    /// `None` marks the catch-all; its match reports no rule name.
    pub name: Option<&'static str>,
    pub pattern: Regex,
}

fn rule(name: &'static str, pattern: &str) -> Rule {
    Rule {
        name: Some(name),
        pattern: Regex::new(pattern).expect("static rule pattern must compile"),
    }
}

fn catch_all() -> Rule {
    Rule {
        name: None,
        pattern: Regex::new("(?s).*").expect("static rule pattern must compile"),
    }
}

static EN_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule(
            "actor_action",
            r"^(?P<actor>[\w.-]+) (?P<action>created|updated|deleted|accessed) (?P<target>\S+)",
        ),
        rule(
            "http_request",
            r"(?P<method>GET|POST|PUT|DELETE) (?P<path>/\S*) (?P<status>\d{3})",
        ),
        rule("error_line", r"(?i)\berror\b[:\s]+(?P<message>.+)$"),
        catch_all(),
    ]
});

static JA_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule(
            "actor_action",
            r"(?P<actor>[一-龠ぁ-んァ-ヴー]+)が(?P<target>\S+?)を(?P<action>作成|更新|削除|閲覧)",
        ),
        rule("error_line", r"エラー[：:]\s*(?P<message>.+)$"),
        rule(
            "topic_comment",
            r"^(?P<topic>[一-龠ぁ-んァ-ヴー]+)は(?P<comment>.+)$",
        ),
        catch_all(),
    ]
});

// Token alphabets match the upstream rule sets: contiguous Japanese script
// runs for ja, ASCII letter runs for en.
static JA_TOKENS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[一-龠ぁ-んァ-ヴー]+").expect("static token pattern must compile"));
static EN_TOKENS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z]+").expect("static token pattern must compile"));

pub(super) fn for_locale(locale: Locale) -> &'static [Rule] {
    match locale {
        Locale::En => &EN_RULES,
        Locale::Ja => &JA_RULES,
    }
}

pub(super) fn tokenize(locale: Locale, text: &str) -> Vec<String> {
    let tokens = match locale {
        Locale::En => &*EN_TOKENS,
        Locale::Ja => &*JA_TOKENS,
    };
    tokens
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Rule names in evaluation order (`None` = catch-all). Exposed for
/// diagnostics and tests.
pub fn rule_names(locale: Locale) -> Vec<Option<&'static str>> {
    for_locale(locale).iter().map(|r| r.name).collect()
}
