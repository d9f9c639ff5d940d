//! Shared fixtures for pipeline integration tests

use fabula::workflow::ReviewSession;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Mutex;

/// A minimal valid extraction response: one new character and one
/// arrival event referencing it.
pub fn valid_extraction(name: &str, is_new: bool) -> Value {
    json!({
        "entities": [
            { "temp_id": "e1", "name": name, "type": "character", "is_new": is_new }
        ],
        "events": [
            {
                "temp_id": "ev1",
                "type": "arrival",
                "summary": format!("{} arrives", name),
                "participants": ["e1"]
            }
        ]
    })
}

/// An extraction whose event references a temp_id no entity declares.
pub fn dangling_extraction() -> Value {
    json!({
        "entities": [
            { "temp_id": "e1", "name": "Elara", "type": "character", "is_new": true }
        ],
        "events": [
            { "temp_id": "ev1", "type": "arrival", "summary": "someone arrives", "participants": ["e9"] }
        ]
    })
}

/// Scripted review session. Edits are applied in order: `Some(body)`
/// overwrites the file under edit, `None` leaves it untouched. Cancel
/// prompts are answered from `cancel_answers`, defaulting to "keep
/// going".
pub struct ScriptedSession {
    interactive: bool,
    edits: Mutex<Vec<Option<String>>>,
    cancel_answers: Mutex<Vec<bool>>,
    pub edit_calls: Mutex<u32>,
}

impl ScriptedSession {
    pub fn new(edits: Vec<Option<String>>, cancel_answers: Vec<bool>) -> Self {
        let mut edits = edits;
        let mut cancel_answers = cancel_answers;
        edits.reverse();
        cancel_answers.reverse();
        Self {
            interactive: true,
            edits: Mutex::new(edits),
            cancel_answers: Mutex::new(cancel_answers),
            edit_calls: Mutex::new(0),
        }
    }

    pub fn non_interactive() -> Self {
        let mut session = Self::new(Vec::new(), Vec::new());
        session.interactive = false;
        session
    }

    pub fn edit_call_count(&self) -> u32 {
        *self.edit_calls.lock().unwrap()
    }
}

impl ReviewSession for ScriptedSession {
    fn is_interactive(&self) -> bool {
        self.interactive
    }

    fn edit(&mut self, path: &Path) -> std::io::Result<()> {
        *self.edit_calls.lock().unwrap() += 1;
        if let Some(Some(body)) = self.edits.lock().unwrap().pop() {
            std::fs::write(path, body)?;
        }
        Ok(())
    }

    fn confirm_cancel(&mut self, _detail: &str) -> std::io::Result<bool> {
        Ok(self.cancel_answers.lock().unwrap().pop().unwrap_or(false))
    }
}
