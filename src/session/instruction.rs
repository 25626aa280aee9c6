//! Voice identities and system-instruction assembly.

use serde::{Deserialize, Serialize};

/// Prebuilt voices offered by the remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Voice {
    #[default]
    Kore,
    Puck,
    Zephyr,
}

impl Voice {
    /// Name used in the setup message.
    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Kore => "Kore",
            Voice::Puck => "Puck",
            Voice::Zephyr => "Zephyr",
        }
    }
}

impl std::str::FromStr for Voice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kore" => Ok(Voice::Kore),
            "puck" => Ok(Voice::Puck),
            "zephyr" => Ok(Voice::Zephyr),
            _ => Err(format!("Unknown voice: {}", s)),
        }
    }
}

impl std::fmt::Display for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persona preamble, then the Context Summary verbatim, then the clinical focus.
pub fn build_system_instruction(preamble: &str, context_summary: &str, clinical_focus: &str) -> String {
    format!("{preamble}{context_summary}\n{clinical_focus}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_parsing() {
        assert_eq!("kore".parse::<Voice>().unwrap(), Voice::Kore);
        assert_eq!("ZEPHYR".parse::<Voice>().unwrap(), Voice::Zephyr);
        assert!("alto".parse::<Voice>().is_err());
        assert_eq!(Voice::default(), Voice::Kore);
    }

    #[test]
    fn test_instruction_embeds_summary_verbatim() {
        let instruction = build_system_instruction("Preamble: ", "CA19-9 trending down", "Focus on WBC.");
        assert_eq!(instruction, "Preamble: CA19-9 trending down\nFocus on WBC.");
    }
}
