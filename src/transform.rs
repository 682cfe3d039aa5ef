//! Page transformer (C3): pure function turning a raw document-store page record into a
//! search-ready document, or a rejection reason. No I/O happens here — this module.
//! never opens a store or search-cluster connection.

use crate::error::TransformError;
use crate::extractors::{self, Extractor};
use crate::model::{derive_prefixes, document_id, IndexedDocument, PageRecord};
use chrono::{DateTime, TimeZone, Utc};
use flate2::read::ZlibDecoder;
use scraper::{Html, Selector};
use std::io::Read;

/// Applies C3 to a single page. Never panics; every failure mode is folded into the `Err`
/// branch so the caller (the batch worker) can mark the page `ERROR` and continue the batch.
pub fn transform_page(page: &PageRecord, extraction_methods: &[String]) -> Result<IndexedDocument, TransformError> {
    let id = document_id(&page.url);
    let prefixes = derive_prefixes(&page.lru);

    let raw_html = decompress(&page.body)?;
    let (html, resolved_encoding) = decode(&raw_html, &page.encoding);

    let mut title = parse_title(&html);

    let mut textify_text = None;
    let mut dragnet_text = None;
    let mut trafilatura_text = None;
    let mut trafilatura_date = None;
    let mut trafilatura_author = None;
    let mut trafilatura_comments = None;

    for method in extraction_methods {
        let Some(extractor) = extractors::by_name(method) else {
            continue;
        };
        let output = extractor.extract(&html);
        match extractor.name() {
            "textify" => textify_text = output.text,
            "dragnet" => dragnet_text = output.text,
            "trafilatura" => {
                trafilatura_text = output.text;
                trafilatura_date = output.date;
                trafilatura_author = output.author;
                trafilatura_comments = output.comments;
                if let Some(extracted_title) = output.title.filter(|t| !t.is_empty()) {
                    title = Some(extracted_title);
                }
            }
            _ => {}
        }
    }

    let crawl_date = millis_to_datetime(page.timestamp_ms);

    let document = IndexedDocument {
        id,
        url: page.url.clone(),
        lru: page.lru.clone(),
        prefixes,
        http_status: page.status,
        crawl_date,
        webentity_id: page.webentity_when_crawled.clone(),
        title,
        textify: textify_text,
        dragnet: dragnet_text,
        trafilatura: trafilatura_text,
        trafilatura_date,
        trafilatura_author,
        trafilatura_comments,
        index_date: Utc::now(),
        we_update_date: None,
    };

    if resolved_encoding == "UTF8-replace" {
        tracing::warn!(url = %page.url, declared_encoding = %page.encoding, "falling back to UTF8-replace decoding");
    }
    validate_encodable(&document)?;
    Ok(document)
}

fn decompress(body: &[u8]) -> Result<Vec<u8>, TransformError> {
    let mut decoder = ZlibDecoder::new(body);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| TransformError::new("decompression error", e.to_string()))?;
    Ok(out)
}

/// Decode using the declared encoding; on failure re-decode as UTF-8 with replacement and
/// report `encoding = "UTF8-replace"`, per step 3 / property P7.
fn decode(bytes: &[u8], declared_encoding: &str) -> (String, String) {
    if let Some(encoding) = encoding_rs::Encoding::for_label(declared_encoding.as_bytes()) {
        let (decoded, _, had_errors) = encoding.decode(bytes);
        if !had_errors {
            return (decoded.into_owned(), declared_encoding.to_string());
        }
    }
    let decoded = String::from_utf8_lossy(bytes).into_owned();
    (decoded, "UTF8-replace".to_string())
}

fn parse_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>())
        .filter(|t| !t.is_empty())
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
}

/// Step 7: every string field must be valid, encodable UTF-8. Rust's `String` type already
/// enforces this at construction, so this exists to give the failure a named place to surface
/// if a future extractor is allowed to build strings from untrusted byte slices directly.
fn validate_encodable(document: &IndexedDocument) -> Result<(), TransformError> {
    let fields: [&Option<String>; 7] = [
        &document.title,
        &document.textify,
        &document.dragnet,
        &document.trafilatura,
        &document.trafilatura_date,
        &document.trafilatura_author,
        &document.trafilatura_comments,
    ];
    for field in fields.into_iter().flatten() {
        if field.encode_utf16().any(|u| (0xD800..=0xDFFF).contains(&u)) {
            return Err(TransformError::new(
                "encoding error",
                "field contains an unpaired surrogate",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn compress(html: &str) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(html.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    fn page(html: &str, encoding: &str) -> PageRecord {
        PageRecord {
            id: "id1".to_string(),
            url: "http://example.com/a".to_string(),
            lru: "s:http|h:com|h:example|p:a|".to_string(),
            status: 200,
            timestamp_ms: 1_700_000_000_000,
            encoding: encoding.to_string(),
            body: compress(html),
            webentity_when_crawled: "we1".to_string(),
            forgotten: false,
            job_id: Some("job1".to_string()),
            text_indexation_status: "IN_BATCH_abc".to_string(),
            text_indexation_error: None,
        }
    }

    #[test]
    fn happy_path_produces_expected_id_and_prefixes() {
        let p = page("<html><head><title>Hi</title></head><body><p>hello world</p></body></html>", "UTF-8");
        let doc = transform_page(&p, &["textify".to_string()]).unwrap();
        assert_eq!(doc.id, document_id("http://example.com/a"));
        assert_eq!(doc.title.as_deref(), Some("Hi"));
        assert_eq!(doc.textify.as_deref(), Some("Hi hello world"));
        assert!(doc.prefixes.last().unwrap().ends_with('|'));
    }

    #[test]
    fn invalid_encoding_falls_back_to_utf8_replace() {
        let p = page("<html><body>hi</body></html>", "iso-9999");
        let raw_html = decompress(&p.body).unwrap();
        let (_, encoding_used) = decode(&raw_html, &p.encoding);
        assert_eq!(encoding_used, "UTF8-replace");
        // page still produces a document even with an unrecognized declared encoding.
        assert!(transform_page(&p, &[]).is_ok());
    }

    #[test]
    fn trafilatura_title_overrides_html_title_when_present() {
        let html = r#"<html><head><title>HTML Title</title><meta property="og:title" content="Better Title"></head>
            <body><article>some article content here</article></body></html>"#;
        let p = page(html, "UTF-8");
        let doc = transform_page(&p, &["trafilatura".to_string()]).unwrap();
        assert_eq!(doc.title.as_deref(), Some("Better Title"));
    }
}
