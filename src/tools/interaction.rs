//! `interaction`: ask the user a question and return their reply verbatim.

use std::sync::Arc;

use async_trait::async_trait;

use super::console::Console;
use super::{required_str, LocalTool, ToolError};

pub const INTERACTION: &str = "interaction";

const PROMPT: &str = ">> ";

pub struct Interaction {
    console: Arc<Console>,
}

impl Interaction {
    pub fn new(console: Arc<Console>) -> Self {
        Self { console }
    }
}

#[async_trait]
impl LocalTool for Interaction {
    fn name(&self) -> &'static str {
        INTERACTION
    }

    fn description(&self) -> &'static str {
        "Command-line interaction tool. Asks the user a question to clarify requirements or confirm an action, and returns the user's reply."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "A prompt message used to guide the user during an interaction."
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let message = required_str(INTERACTION, &arguments, "message")?;
        let io_err = |e: std::io::Error| ToolError::Interaction {
            reason: e.to_string(),
        };

        self.console
            .println(&format!("[A] {message}"))
            .await
            .map_err(io_err)?;
        self.console
            .prompt(PROMPT)
            .await
            .map_err(io_err)?
            .ok_or_else(|| ToolError::Interaction {
                reason: "end of input".into(),
            })
    }
}
