use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let (fallback_reason, requested_text) = if let Some(requested_value) = requested {
            if let Some(model) = self.registry.ensure(requested_value, capability) {
                return Ok(ModelSelection {
                    model,
                    requested: Some(requested_value.to_string()),
                    fallback_reason: None,
                });
            }
            (
                Some(format!(
                    "Requested model '{requested_value}' unavailable for capability '{capability}'."
                )),
                Some(requested_value.to_string()),
            )
        } else {
            (Some("No model specified; using default.".to_string()), None)
        };

        let candidates = self.registry.by_capability(capability);
        let Some(model) = candidates.first().cloned() else {
            return Err(format!(
                "No models available for capability '{capability}'."
            ));
        };
        Ok(ModelSelection {
            model,
            requested: requested_text,
            fallback_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::ModelSelector;
    use crate::models::{ModelRegistry, DEFAULT_MODEL, GROUNDED_TEXT};

    #[test]
    fn select_returns_requested_model() {
        let selector = ModelSelector::new(None);
        let selection = selector
            .select(Some("dryrun-text"), GROUNDED_TEXT)
            .expect("selection");
        assert_eq!(selection.model.provider, "dryrun");
        assert_eq!(selection.fallback_reason, None);
    }

    #[test]
    fn unknown_model_falls_back_with_reason() {
        let selector = ModelSelector::new(None);
        let selection = selector
            .select(Some("gpt-nope"), GROUNDED_TEXT)
            .expect("selection");
        assert_eq!(selection.model.name, DEFAULT_MODEL);
        assert_eq!(selection.requested.as_deref(), Some("gpt-nope"));
        assert!(selection
            .fallback_reason
            .as_deref()
            .unwrap_or_default()
            .contains("gpt-nope"));
    }

    #[test]
    fn blank_request_uses_default() {
        let selector = ModelSelector::new(None);
        let selection = selector.select(Some("  "), GROUNDED_TEXT).expect("selection");
        assert_eq!(selection.model.name, DEFAULT_MODEL);
        assert_eq!(selection.requested, None);
    }

    #[test]
    fn empty_registry_errors() {
        let selector = ModelSelector::new(Some(ModelRegistry::new(Some(IndexMap::new()))));
        assert!(selector.select(None, GROUNDED_TEXT).is_err());
    }
}
