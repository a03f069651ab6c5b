//! Spoken languages supported by the assistant.
//!
//! The language is part of the negotiated session context: switching it
//! while a session is live tears the session down.

use crate::error::{LivevoxError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Ru,
    #[default]
    En,
    De,
    Fr,
}

impl Language {
    pub const ALL: [Language; 4] = [Language::Ru, Language::En, Language::De, Language::Fr];

    /// Lowercase ISO 639-1 code.
    pub fn code(self) -> &'static str {
        match self {
            Language::Ru => "ru",
            Language::En => "en",
            Language::De => "de",
            Language::Fr => "fr",
        }
    }

    /// Name of the language in English, used inside the system instruction.
    pub fn english_name(self) -> &'static str {
        match self {
            Language::Ru => "Russian",
            Language::En => "English",
            Language::De => "German",
            Language::Fr => "French",
        }
    }

    /// Default instruction that frames the assistant for this language.
    pub fn system_instruction(self) -> String {
        format!(
            "You are the voice concierge of a small wellness retreat. \
             Answer questions about the programme, daily schedule, accommodation \
             and booking warmly and briefly, in two or three sentences. \
             Always reply in {}.",
            self.english_name()
        )
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = LivevoxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ru" => Ok(Language::Ru),
            "en" => Ok(Language::En),
            "de" => Ok(Language::De),
            "fr" => Ok(Language::Fr),
            other => Err(LivevoxError::ConfigInvalidValue {
                key: "language".to_string(),
                message: format!("unsupported language '{other}' (expected ru, en, de or fr)"),
            }),
        }
    }
}
