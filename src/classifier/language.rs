use serde::{Deserialize, Serialize};

use super::{Matcher, RuleError, RuleSet};

/// Language detected from a handful of transliterated marker words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Hi,
    Ta,
    Te,
    Mr,
    Bn,
}

impl Language {
    /// Short language code, e.g. `"hi"`.
    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Hi => "hi",
            Language::Ta => "ta",
            Language::Te => "te",
            Language::Mr => "mr",
            Language::Bn => "bn",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

// Whole words only: "ha" must not fire inside "thank".  Word boundaries are
// ASCII, so accented letters separate words.
const MARKERS: &[(&[&str], Language)] = &[
    (&["bhai", "ha", "namaste", "kya"], Language::Hi),
    (&["vandhanam", "vanakkam"], Language::Ta),
    (&["ena", "naa", "naku"], Language::Te),
    (&["kaay", "ahe", "mi"], Language::Mr),
    (&["amar", "tumi", "koto"], Language::Bn),
];

pub(super) fn rules() -> Result<RuleSet<Language>, RuleError> {
    let mut set = RuleSet::new(Language::En);
    for (words, lang) in MARKERS {
        set = set.then(Matcher::words(words)?, *lang);
    }
    Ok(set)
}
