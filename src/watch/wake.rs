use crate::{error::SensorError, race::Detector, signal::StopSignal};

use super::{READ_SLICE, TranscriptSource};

const GREETING_SPAN: usize = 4;
const NAME_SPAN: usize = 8;

/// Matches "hey <name>" style wake phrases in speech-to-text output.
///
/// Recognizers routinely mishear short names, so `names` holds every spelling
/// that should count (e.g. "cam", "can", "cameron").
#[derive(Clone, Debug)]
pub struct WakePhrase {
    greetings: Vec<String>,
    names: Vec<String>,
}

impl Default for WakePhrase {
    fn default() -> Self {
        Self::new(
            ["hey", "hi", "ok", "okay"],
            [
                "cam", "camm", "cammy", "cameron", "can", "cap", "cal", "came", "camp", "ham",
                "sam", "tam", "kim", "ken",
            ],
        )
    }
}

impl WakePhrase {
    pub fn new<G, N>(greetings: G, names: N) -> Self
    where
        G: IntoIterator,
        G::Item: AsRef<str>,
        N: IntoIterator,
        N::Item: AsRef<str>,
    {
        Self {
            greetings: greetings.into_iter().map(|g| normalize(g.as_ref())).collect(),
            names: names.into_iter().map(|n| normalize(n.as_ref())).collect(),
        }
    }

    pub fn with_names<N>(mut self, names: N) -> Self
    where
        N: IntoIterator,
        N::Item: AsRef<str>,
    {
        self.names = names.into_iter().map(|n| normalize(n.as_ref())).collect();
        self
    }

    fn is_greeting(&self, token: &str) -> bool {
        self.greetings.iter().any(|g| g == token)
    }

    fn is_name(&self, token: &str) -> bool {
        self.names.iter().any(|n| n == token)
    }

    pub fn matches(&self, transcript: &str) -> bool {
        let text = normalize(transcript);
        let tokens: Vec<&str> = text.split(' ').filter(|t| !t.is_empty()).collect();
        if tokens.is_empty() {
            return false;
        }

        // "heycam" and friends come back glued together.
        let glued: String = tokens.concat();
        if let Some(primary) = self.names.first() {
            let glued_hit = self
                .greetings
                .iter()
                .filter(|g| g.as_str() == "hey" || g.as_str() == "hi")
                .any(|g| glued.contains(&format!("{g}{primary}")));
            if glued_hit {
                return true;
            }
        }

        for (i, token) in tokens.iter().take(GREETING_SPAN).enumerate() {
            if !self.is_greeting(token) {
                continue;
            }
            let follows = tokens
                .iter()
                .skip(i + 1)
                .take(2)
                .any(|next| self.is_name(next));
            if follows {
                return true;
            }
        }

        tokens.iter().take(GREETING_SPAN).any(|t| self.is_greeting(t))
            && tokens.iter().take(NAME_SPAN).any(|t| self.is_name(t))
    }

    pub fn matches_any<S: AsRef<str>>(&self, transcripts: &[S]) -> bool {
        transcripts.iter().any(|t| self.matches(t.as_ref()))
    }
}

fn normalize(text: &str) -> String {
    let letters: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_whitespace())
        .collect();
    letters.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Wake side of the race: listens in short slices until a transcript matches.
pub struct WakeListener {
    source: Box<dyn TranscriptSource>,
    phrase: WakePhrase,
}

impl WakeListener {
    pub fn new(source: Box<dyn TranscriptSource>, phrase: WakePhrase) -> Self {
        Self { source, phrase }
    }
}

impl Detector for WakeListener {
    fn run(&mut self, stop: &StopSignal) -> Result<bool, SensorError> {
        while !stop.is_stopped() {
            let Some(transcripts) = self.source.listen(READ_SLICE)? else {
                continue;
            };
            // A late utterance after cancellation is dropped.
            if stop.is_stopped() {
                break;
            }
            log::debug!("heard {transcripts:?}");
            if self.phrase.matches_any(&transcripts) {
                log::info!("wake phrase detected in {:?}", transcripts.first());
                return Ok(true);
            }
        }
        Ok(false)
    }
}
