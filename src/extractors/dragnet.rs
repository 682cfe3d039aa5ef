use super::{ExtractionOutput, Extractor};
use scraper::{Html, Selector};

/// Largest-text-block heuristic: of every block-level element, return the text of whichever
/// has the most non-whitespace characters directly beneath it. Approximates dragnet's
/// content-density approach without a statistical model.
pub struct DragnetExtractor;

impl Extractor for DragnetExtractor {
    fn name(&self) -> &'static str {
        "dragnet"
    }

    fn extract(&self, html: &str) -> ExtractionOutput {
        let document = Html::parse_document(html);
        let selector = Selector::parse("p, article, section, div, main").unwrap();

        let best = document
            .select(&selector)
            .map(|el| el.text().collect::<Vec<_>>().join(" "))
            .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
            .max_by_key(|text| text.len());

        ExtractionOutput {
            text: best.filter(|text| !text.is_empty()),
            ..Default::default()
        }
    }
}
