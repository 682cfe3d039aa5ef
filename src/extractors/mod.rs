//! Extractor registry (C2): named strategies turning decoded HTML into readable text.
//!
//! Each extractor is isolated — a panic-free `Result` boundary — so that one extractor's
//! failure never fails the page; the page transformer (C3) just records `None` for that
//! extractor's fields and continues.

mod dragnet;
mod textify;
mod trafilatura;

pub use dragnet::DragnetExtractor;
pub use textify::TextifyExtractor;
pub use trafilatura::TrafilaturaExtractor;

/// The known extractor names, in the order the default-method fallback should prefer them.
pub const KNOWN_EXTRACTORS: &[&str] = &["textify", "dragnet", "trafilatura"];

/// Output of a single extractor run. Only `trafilatura` ever populates the metadata fields.
#[derive(Debug, Clone, Default)]
pub struct ExtractionOutput {
    pub text: Option<String>,
    pub title: Option<String>,
    pub date: Option<String>,
    pub author: Option<String>,
    pub comments: Option<String>,
}

pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, html: &str) -> ExtractionOutput;
}

/// Builds the extractor instance for a registered name, or `None` if unknown.
pub fn by_name(name: &str) -> Option<Box<dyn Extractor>> {
    match name {
        "textify" => Some(Box::new(TextifyExtractor)),
        "dragnet" => Some(Box::new(DragnetExtractor)),
        "trafilatura" => Some(Box::new(TrafilaturaExtractor)),
        _ => None,
    }
}

/// Resolves the corpus's configured extractor list, augmented with its default method if
/// missing, per §4.2. Returns the resolved `(methods, default_method)` pair; logs a warning
/// and falls back to the first configured method when the configured default is unknown.
pub fn resolve_extraction_methods(
    corpus: &str,
    configured_methods: &[String],
    configured_default: &str,
) -> (Vec<String>, String) {
    let mut methods = configured_methods.to_vec();

    let default_method = if KNOWN_EXTRACTORS.contains(&configured_default) {
        if !methods.iter().any(|m| m == configured_default) {
            methods.push(configured_default.to_string());
        }
        configured_default.to_string()
    } else {
        tracing::warn!(
            corpus,
            default_extraction_method = configured_default,
            "unknown DEFAULT_EXTRACTION_METHOD"
        );
        if let Some(first) = methods.first().cloned() {
            tracing::info!(corpus, using = %first, "using first configured extractor instead");
            first
        } else {
            configured_default.to_string()
        }
    };

    (methods, default_method)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_method_is_added_when_missing_from_methods() {
        let (methods, default) =
            resolve_extraction_methods("corpus1", &["textify".to_string()], "dragnet");
        assert_eq!(methods, vec!["textify", "dragnet"]);
        assert_eq!(default, "dragnet");
    }

    #[test]
    fn unknown_default_falls_back_to_first_configured_method() {
        let (methods, default) =
            resolve_extraction_methods("corpus1", &["dragnet".to_string(), "textify".to_string()], "bogus");
        assert_eq!(methods, vec!["dragnet", "textify"]);
        assert_eq!(default, "dragnet");
    }

    #[test]
    fn by_name_is_none_for_unregistered_extractor() {
        assert!(by_name("bogus").is_none());
        assert!(by_name("textify").is_some());
    }
}
