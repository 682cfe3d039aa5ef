use super::{ExtractionOutput, Extractor};
use scraper::Html;

/// Whole-document text flattening: every text node, tags stripped, whitespace collapsed.
pub struct TextifyExtractor;

impl Extractor for TextifyExtractor {
    fn name(&self) -> &'static str {
        "textify"
    }

    fn extract(&self, html: &str) -> ExtractionOutput {
        let document = Html::parse_document(html);
        let text: String = document
            .root_element()
            .text()
            .collect::<Vec<_>>()
            .join(" ");
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");

        ExtractionOutput {
            text: if normalized.is_empty() { None } else { Some(normalized) },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_collapses_whitespace() {
        let output = TextifyExtractor.extract("<html><body>  <p>Hello</p>\n<p>World</p>  </body></html>");
        assert_eq!(output.text.as_deref(), Some("Hello World"));
    }

    #[test]
    fn empty_body_yields_no_text() {
        let output = TextifyExtractor.extract("<html><body></body></html>");
        assert_eq!(output.text, None);
    }
}
