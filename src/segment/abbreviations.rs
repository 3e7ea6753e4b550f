//! Abbreviation table for the sentence boundary heuristic

/// Tokens whose trailing period is usually not a sentence end
pub const ABBREVIATIONS: &[&str] = &[
    "Mr.", "Mrs.", "Ms.", "Dr.", "Prof.", "Sr.", "Jr.", "etc.", "vs.", "e.g.", "i.e.", "U.S.",
    "U.K.", "Inc.", "Ltd.", "Co.", "Corp.",
];

/// Checks whether a sentence candidate ends in a known abbreviation
pub struct AbbreviationChecker;

impl AbbreviationChecker {
    /// True when `candidate` (trailing whitespace ignored) ends with an
    /// abbreviation token that starts on a word boundary.
    pub fn ends_with_abbreviation(candidate: &str) -> bool {
        let trimmed = candidate.trim_end();
        ABBREVIATIONS.iter().any(|abbr| {
            trimmed.strip_suffix(abbr).is_some_and(|head| {
                head.chars()
                    .next_back()
                    .map_or(true, |c| !c.is_alphanumeric())
            })
        })
    }
}
