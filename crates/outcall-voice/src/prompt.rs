//! Agent instruction assembly.

use crate::error::VoiceError;
use std::path::Path;

/// The labeled section a per-job directive is appended under.
const DIRECTIVE_LABEL: &str = "Main instructions:";

/// The conversational agent definition handed to a session.
#[derive(Debug, Clone)]
pub struct Assistant {
    instructions: String,
}

impl Assistant {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
        }
    }

    /// Loads the base instruction document and appends the per-job
    /// directive, when present, under a labeled section.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::PromptLoad`] when the base document is missing
    /// or unreadable. This is fatal for the agent instance: an agent
    /// without instructions must not take calls.
    pub fn load(path: impl AsRef<Path>, directive: Option<&str>) -> Result<Self, VoiceError> {
        let path = path.as_ref();
        let base = std::fs::read_to_string(path).map_err(|source| VoiceError::PromptLoad {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::assemble(base, directive))
    }

    fn assemble(base: String, directive: Option<&str>) -> Self {
        let instructions = match directive {
            Some(directive) => format!("{base}\n\n{DIRECTIVE_LABEL}\n{directive}"),
            None => base,
        };
        Self { instructions }
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }
}
