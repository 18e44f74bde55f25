mod export;
mod state;
mod store;
mod types;

pub use export::{render_html, render_markdown, ExportFormat};
pub use state::{CanvasState, SECTION_TITLE};
pub use store::{CanvasStore, RequestState, SubmitRejection, UNEXPECTED_ERROR_MESSAGE};
pub use types::{GenerationResult, Section, Source};
