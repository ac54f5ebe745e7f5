//! Phrase-search parameters.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Which part of the history to probe, and in which direction.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum SearchPeriod {
    /// Last match strictly before the cursor timestamp.
    #[default]
    Before,
    /// First match in the whole chat.
    FromStart,
    /// First match after the start of the given day.
    AfterDate(NaiveDate),
    /// Last match before the start of the given day.
    BeforeDate(NaiveDate),
}

/// How a phrase is matched against message bodies.
///
/// Matching is case-insensitive unless `case_sensitive` is set.  The
/// phrase is taken literally unless `use_regex` is set; `whole_words`
/// wraps the pattern in word boundaries and composes with either.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchParams {
    pub case_sensitive: bool,
    pub whole_words: bool,
    pub use_regex: bool,
    pub period: SearchPeriod,
}

impl SearchParams {
    /// The pattern handed to the SQL match function.
    pub(crate) fn pattern(&self, phrase: &str) -> String {
        let base = if self.use_regex {
            phrase.to_owned()
        } else {
            regex::escape(phrase)
        };
        if self.whole_words {
            format!(r"\b(?:{base})\b")
        } else {
            base
        }
    }

    /// Which registered SQL function implements the case rule.
    pub(crate) fn match_function(&self) -> &'static str {
        if self.case_sensitive {
            "regexpsensitive"
        } else {
            "regexp"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_phrases_are_escaped() {
        let params = SearchParams::default();
        assert_eq!(params.pattern("a.b*c"), r"a\.b\*c");
    }

    #[test]
    fn regex_phrases_pass_through() {
        let params = SearchParams {
            use_regex: true,
            ..Default::default()
        };
        assert_eq!(params.pattern("^he(llo)+$"), "^he(llo)+$");
    }

    #[test]
    fn whole_words_wrap_the_pattern() {
        let params = SearchParams {
            whole_words: true,
            ..Default::default()
        };
        assert_eq!(params.pattern("chat"), r"\b(?:chat)\b");

        let both = SearchParams {
            whole_words: true,
            use_regex: true,
            ..Default::default()
        };
        assert_eq!(both.pattern("cha+t"), r"\b(?:cha+t)\b");
    }

    #[test]
    fn case_rule_selects_the_function() {
        assert_eq!(SearchParams::default().match_function(), "regexp");
        let sensitive = SearchParams {
            case_sensitive: true,
            ..Default::default()
        };
        assert_eq!(sensitive.match_function(), "regexpsensitive");
    }
}
