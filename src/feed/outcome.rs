use serde::Serialize;
use std::fmt;

/// Classification of one feed's fetch-and-process attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    /// The server reported the document unchanged
    Same,
    /// The body could not be turned into entries
    ParseError,
    /// The server answered with an error or a redirect we could not follow up on
    HttpError,
    /// The attempt failed outside the normal classification
    Exception,
}

impl Outcome {
    pub const ALL: [Outcome; 5] = [
        Outcome::Ok,
        Outcome::Same,
        Outcome::ParseError,
        Outcome::HttpError,
        Outcome::Exception,
    ];

    /// History code recorded when nothing more specific was set
    pub fn fallback_code(self) -> u16 {
        match self {
            Outcome::Ok => 200,
            Outcome::Same => 304,
            Outcome::HttpError => 400,
            Outcome::Exception => 500,
            Outcome::ParseError => 550,
        }
    }

    /// Short name used in logs and summaries
    pub fn label(self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::Same => "unchanged",
            Outcome::ParseError => "cant_parse",
            Outcome::HttpError => "http_error",
            Outcome::Exception => "exception",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_codes() {
        let codes: Vec<u16> = Outcome::ALL.iter().map(|o| o.fallback_code()).collect();
        assert_eq!(codes, vec![200, 304, 550, 400, 500]);
    }

    #[test]
    fn test_labels() {
        assert_eq!(Outcome::Same.to_string(), "unchanged");
        assert_eq!(Outcome::ParseError.label(), "cant_parse");
    }
}
