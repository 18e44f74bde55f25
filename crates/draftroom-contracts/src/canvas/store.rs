use std::fmt;

use super::state::CanvasState;
use super::types::GenerationResult;

pub const UNEXPECTED_ERROR_MESSAGE: &str = "An unexpected error occurred during generation.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestState {
    #[default]
    Idle,
    Generating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitRejection {
    EmptyPrompt,
    InFlight,
}

impl fmt::Display for SubmitRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPrompt => f.write_str("prompt is empty"),
            Self::InFlight => f.write_str("a generation request is already in flight"),
        }
    }
}

impl std::error::Error for SubmitRejection {}

/// Holds the current canvas snapshot together with the request gate and the
/// last failure message shown to the user.
#[derive(Debug, Clone, Default)]
pub struct CanvasStore {
    canvas: CanvasState,
    request: RequestState,
    last_error: Option<String>,
}

impl CanvasStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn canvas(&self) -> &CanvasState {
        &self.canvas
    }

    pub fn request_state(&self) -> RequestState {
        self.request
    }

    pub fn is_generating(&self) -> bool {
        self.request == RequestState::Generating
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn can_submit(&self, prompt: &str) -> bool {
        !self.is_generating() && !prompt.trim().is_empty()
    }

    pub fn begin(&mut self, prompt: &str) -> Result<(), SubmitRejection> {
        if self.is_generating() {
            return Err(SubmitRejection::InFlight);
        }
        if prompt.trim().is_empty() {
            return Err(SubmitRejection::EmptyPrompt);
        }
        self.request = RequestState::Generating;
        self.last_error = None;
        Ok(())
    }

    /// Applies a successful result and returns how many new sources it added.
    pub fn succeed(&mut self, result: &GenerationResult) -> usize {
        let before = self.canvas.sources().len();
        self.canvas = self.canvas.append_section(result);
        self.request = RequestState::Idle;
        self.canvas.sources().len() - before
    }

    /// Records `message` as-is; only an empty message is replaced by the generic text.
    pub fn fail(&mut self, message: &str) {
        self.last_error = Some(if message.is_empty() {
            UNEXPECTED_ERROR_MESSAGE.to_string()
        } else {
            message.to_string()
        });
        self.request = RequestState::Idle;
    }

    pub fn clear(&mut self) {
        self.canvas = self.canvas.clear();
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::{CanvasStore, RequestState, SubmitRejection, UNEXPECTED_ERROR_MESSAGE};
    use crate::canvas::{GenerationResult, Source};

    fn result(text: &str, uris: &[&str]) -> GenerationResult {
        GenerationResult {
            text: text.to_string(),
            sources: uris
                .iter()
                .map(|uri| Source::new(format!("title {uri}"), *uri))
                .collect(),
        }
    }

    #[test]
    fn begin_rejects_blank_prompt() {
        let mut store = CanvasStore::new();
        assert_eq!(store.begin("   \n\t"), Err(SubmitRejection::EmptyPrompt));
        assert_eq!(store.request_state(), RequestState::Idle);
        assert!(!store.can_submit(""));
    }

    #[test]
    fn begin_rejects_overlapping_requests() {
        let mut store = CanvasStore::new();
        store.begin("first").expect("first submit");
        assert!(store.is_generating());
        assert!(!store.can_submit("second"));
        assert_eq!(store.begin("second"), Err(SubmitRejection::InFlight));

        store.succeed(&result("done", &[]));
        assert!(store.can_submit("second"));
    }

    #[test]
    fn succeed_appends_and_reports_new_sources() {
        let mut store = CanvasStore::new();
        store.begin("p").expect("submit");
        assert_eq!(store.succeed(&result("one", &["u1", "u2"])), 2);
        store.begin("p").expect("submit");
        assert_eq!(store.succeed(&result("two", &["u2", "u3"])), 1);

        assert_eq!(store.canvas().sections().len(), 2);
        assert_eq!(store.canvas().sources().len(), 3);
        assert_eq!(store.request_state(), RequestState::Idle);
    }

    #[test]
    fn failure_leaves_canvas_unchanged() {
        let mut store = CanvasStore::new();
        store.begin("p").expect("submit");
        store.succeed(&result("one", &["u1"]));
        let before = store.canvas().clone();

        store.begin("p").expect("submit");
        store.fail("quota exceeded");

        assert_eq!(store.canvas(), &before);
        assert_eq!(store.last_error(), Some("quota exceeded"));
        assert_eq!(store.request_state(), RequestState::Idle);
    }

    #[test]
    fn empty_failure_message_uses_generic_text() {
        let mut store = CanvasStore::new();
        store.begin("p").expect("submit");
        store.fail("");
        assert_eq!(store.last_error(), Some(UNEXPECTED_ERROR_MESSAGE));
    }

    #[test]
    fn failure_message_is_kept_verbatim() {
        let mut store = CanvasStore::new();
        store.begin("p").expect("submit");
        store.fail("  spaced message\n");
        assert_eq!(store.last_error(), Some("  spaced message\n"));

        store.begin("p").expect("submit");
        store.fail(" ");
        assert_eq!(store.last_error(), Some(" "));
    }

    #[test]
    fn next_submit_clears_last_error() {
        let mut store = CanvasStore::new();
        store.begin("p").expect("submit");
        store.fail("boom");
        store.begin("p").expect("submit");
        assert_eq!(store.last_error(), None);
    }

    #[test]
    fn clear_resets_canvas_and_error() {
        let mut store = CanvasStore::new();
        store.begin("p").expect("submit");
        store.succeed(&result("one", &["u1"]));
        store.begin("p").expect("submit");
        store.fail("boom");

        store.clear();
        assert!(store.canvas().is_empty());
        assert_eq!(store.last_error(), None);
    }
}
