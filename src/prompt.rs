use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::client::Message;

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("Missing prompts file: {0}")]
    NotFound(PathBuf),

    #[error("Invalid prompt record on line {line}: {reason}")]
    InvalidRecord { line: usize, reason: String },

    #[error("Failed to read prompts file: {0}")]
    Io(#[from] std::io::Error),
}

/// A conversation to send to the model server.
///
/// Prompts are loaded from JSONL files where each line holds an `id` and an
/// ordered list of `messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    pub messages: Vec<Message>,
}

impl Prompt {
    /// Parses one JSONL record. Numeric ids are kept in their string form.
    pub fn from_json_line(line: &str) -> Result<Self, String> {
        let value: Value = serde_json::from_str(line).map_err(|e| e.to_string())?;
        let Some(record) = value.as_object() else {
            return Err("record must be a JSON object".to_string());
        };

        let id = match record.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            Some(_) => return Err("'id' must be a string or number".to_string()),
            None => return Err("prompt must include 'id' and 'messages'".to_string()),
        };

        let messages = match record.get("messages") {
            Some(messages) => Vec::<Message>::deserialize(messages)
                .map_err(|e| format!("invalid 'messages': {}", e))?,
            None => return Err("prompt must include 'id' and 'messages'".to_string()),
        };

        Ok(Self { id, messages })
    }
}

/// Loads every prompt from a JSONL file. Blank lines are skipped; any
/// malformed record fails the whole load.
pub async fn load_prompts(path: &Path) -> Result<Vec<Prompt>, PromptError> {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PromptError::NotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    let reader = BufReader::new(file);
    let mut lines = reader.lines();
    let mut prompts = Vec::new();
    let mut line_number = 0;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let prompt = Prompt::from_json_line(line).map_err(|reason| PromptError::InvalidRecord {
            line: line_number,
            reason,
        })?;
        prompts.push(prompt);
    }

    log::debug!("Loaded {} prompts from {}", prompts.len(), path.display());
    Ok(prompts)
}
