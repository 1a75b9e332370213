use once_cell::sync::Lazy;
use std::fs;
use std::path::{ Path, PathBuf };
use std::sync::Arc;
use log::info;
use thiserror::Error;

use crate::models::chat::{ ChatMessage, Role };

const BUILTIN_PERSONA: &str = include_str!("../../prompts/persona.md");

static BUILTIN: Lazy<Arc<PromptContext>> = Lazy::new(|| {
    Arc::new(PromptContext {
        text: BUILTIN_PERSONA.trim_end().to_string(),
        source: PromptSource::Builtin,
    })
});

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Prompt file '{}' could not be read: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Prompt file '{}' is empty", .0.display())]
    Empty(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSource {
    Builtin,
    File(PathBuf),
}

/// Persona instructions prepended to every model call. Loaded once, never mutated.
#[derive(Debug)]
pub struct PromptContext {
    text: String,
    source: PromptSource,
}

impl PromptContext {
    pub fn builtin() -> Arc<PromptContext> {
        Arc::clone(&BUILTIN)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PromptError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| PromptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let text = text.trim_end();
        if text.trim().is_empty() {
            return Err(PromptError::Empty(path.to_path_buf()));
        }
        info!("Loaded prompt context from {}", path.display());

        Ok(Self {
            text: text.to_string(),
            source: PromptSource::File(path.to_path_buf()),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source(&self) -> &PromptSource {
        &self.source
    }

    pub fn system_message(&self) -> ChatMessage {
        ChatMessage::new(Role::System, self.text.clone())
    }
}
