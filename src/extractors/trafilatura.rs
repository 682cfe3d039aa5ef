use super::{ExtractionOutput, Extractor};
use scraper::{Html, Selector};

/// Main-content heuristic plus metadata sniffing: prefers `<article>`, falls back to the
/// densest `<main>`/`<div>` block, and reads title/date/author from common meta tags.
/// Approximates trafilatura's readability + metadata extraction without its statistical model.
pub struct TrafilaturaExtractor;

impl Extractor for TrafilaturaExtractor {
    fn name(&self) -> &'static str {
        "trafilatura"
    }

    fn extract(&self, html: &str) -> ExtractionOutput {
        let document = Html::parse_document(html);

        let article_selector = Selector::parse("article").unwrap();
        let fallback_selector = Selector::parse("main, div, section").unwrap();

        let text = document
            .select(&article_selector)
            .map(|el| el.text().collect::<Vec<_>>().join(" "))
            .max_by_key(|t| t.len())
            .or_else(|| {
                document
                    .select(&fallback_selector)
                    .map(|el| el.text().collect::<Vec<_>>().join(" "))
                    .max_by_key(|t| t.len())
            })
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|t| !t.is_empty());

        ExtractionOutput {
            text,
            title: meta_content(&document, "og:title").or_else(|| title_tag(&document)),
            date: meta_content(&document, "article:published_time").or_else(|| meta_named(&document, "date")),
            author: meta_named(&document, "author"),
            comments: None,
        }
    }
}

fn title_tag(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>())
        .filter(|t| !t.is_empty())
}

fn meta_content(document: &Html, property: &str) -> Option<String> {
    let selector = Selector::parse(&format!("meta[property='{property}']")).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

fn meta_named(document: &Html, name: &str) -> Option<String> {
    let selector = Selector::parse(&format!("meta[name='{name}']")).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_article_tag_and_reads_meta_title() {
        let html = r#"<html><head><meta property="og:title" content="Real Title"></head>
            <body><div>nav nav nav</div><article>the real article content goes here</article></body></html>"#;
        let output = TrafilaturaExtractor.extract(html);
        assert_eq!(output.text.as_deref(), Some("the real article content goes here"));
        assert_eq!(output.title.as_deref(), Some("Real Title"));
    }

    #[test]
    fn falls_back_to_title_tag_when_no_meta() {
        let html = "<html><head><title>Fallback</title></head><body><main>content block</main></body></html>";
        let output = TrafilaturaExtractor.extract(html);
        assert_eq!(output.title.as_deref(), Some("Fallback"));
    }
}
