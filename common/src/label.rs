use std::fmt;

/// Classification result for one frame.
///
/// `Unknown` is an ordinary value: the classifier returns it whenever it
/// cannot produce a confident, parseable answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Ad,
    Show,
    Unknown,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Ad => "ad",
            Label::Show => "show",
            Label::Unknown => "unknown",
        }
    }

    /// Map a model answer to a label. Case and surrounding whitespace are
    /// ignored; anything other than "ad" or "show" is `None`.
    pub fn from_answer(answer: &str) -> Option<Self> {
        match answer.trim().to_ascii_lowercase().as_str() {
            "ad" => Some(Label::Ad),
            "show" => Some(Label::Show),
            _ => None,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_are_case_insensitive() {
        assert_eq!(Label::from_answer("AD"), Some(Label::Ad));
        assert_eq!(Label::from_answer(" Show "), Some(Label::Show));
        assert_eq!(Label::from_answer("unknown"), None);
        assert_eq!(Label::from_answer("advert"), None);
    }
}
