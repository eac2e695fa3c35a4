use std::process::{Command, Stdio};

use anyhow::{Context, anyhow};

use crate::orchestrator::Speaker;

/// Prints status messages for whoever is watching the terminal.
#[derive(Debug, Default)]
pub struct ConsoleSpeaker;

impl Speaker for ConsoleSpeaker {
    fn say(&mut self, text: &str) {
        println!("{text}");
    }
}

/// Speaks through an external TTS program, e.g. `espeak` or `say`. The text is
/// passed as the final argument. Falls back to printing when the program fails.
#[derive(Debug)]
pub struct CommandSpeaker {
    program: String,
    args: Vec<String>,
    fallback: ConsoleSpeaker,
}

impl CommandSpeaker {
    pub fn new(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
            fallback: ConsoleSpeaker,
        })
    }

    fn speak(&self, text: &str) -> anyhow::Result<()> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .status()
            .with_context(|| format!("failed to run {}", self.program))?;
        if status.success() {
            Ok(())
        } else {
            Err(anyhow!("{} exited with {status}", self.program))
        }
    }
}

impl Speaker for CommandSpeaker {
    fn say(&mut self, text: &str) {
        if let Err(err) = self.speak(text) {
            log::warn!("speech output failed: {err:#}");
            self.fallback.say(text);
        }
    }
}

/// Picks the TTS command when one is configured, the console otherwise.
pub fn speaker_for(command_line: &str) -> Box<dyn Speaker> {
    match CommandSpeaker::new(command_line) {
        Some(speaker) => Box::new(speaker),
        None => Box::new(ConsoleSpeaker),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_program_and_arguments() {
        let speaker = CommandSpeaker::new("espeak -s 140").unwrap();
        assert_eq!(speaker.program, "espeak");
        assert_eq!(speaker.args, vec!["-s", "140"]);
        assert!(CommandSpeaker::new("  ").is_none());
    }

    #[test]
    fn missing_program_reports_an_error() {
        let speaker = CommandSpeaker::new("no-such-tts-program-here").unwrap();
        assert!(speaker.speak("hello").is_err());
    }
}
