mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, DEFAULT_MODEL, GROUNDED_TEXT};
pub use selectors::{ModelSelection, ModelSelector};
