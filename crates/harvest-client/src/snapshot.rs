use harvest_core::error::AppError;
use harvest_core::models::{AUTHORITY_STATUS_FIELD, FieldMap};
use harvest_core::traits::Extractor;
use scraper::{ElementRef, Html, Selector};

/// Header text whose presence marks a page that holds a carrier record.
const RECORD_MARKER: &str = "Entity Type";

/// Fields the snapshot extractor produces, in page order.
pub const SNAPSHOT_FIELDS: &[&str] = &[
    RECORD_MARKER,
    "MC/MX/FF Number(s)",
    "Legal Name",
    "Physical Address",
    "Phone",
    AUTHORITY_STATUS_FIELD,
    "Power Units",
    "Drivers",
];

/// Extractor for the carrier snapshot page.
///
/// Walks every table row and maps the row header to a field. Later rows
/// overwrite earlier ones, so the innermost table of nested layouts wins.
#[derive(Debug, Clone, Default)]
pub struct SnapshotExtractor;

impl SnapshotExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for SnapshotExtractor {
    fn extract(&self, document: &str) -> Result<Option<FieldMap>, AppError> {
        let row_sel = selector("tr")?;
        let header_sel = selector("th")?;
        let cell_sel = selector("td")?;

        let html = Html::parse_document(document);
        if !html
            .select(&header_sel)
            .any(|th| text_of(th).contains(RECORD_MARKER))
        {
            return Ok(None);
        }

        let mut fields = FieldMap::new();
        for row in html.select(&row_sel) {
            let Some(header) = row.select(&header_sel).next().map(text_of) else {
                continue;
            };
            let cells: Vec<String> = row.select(&cell_sel).map(text_of).collect();
            let value = cells.first().cloned().unwrap_or_default();

            if header.contains(RECORD_MARKER) {
                fields.insert(RECORD_MARKER.into(), value.clone());
            }
            if header.contains("MC/MX/FF Number") {
                fields.insert("MC/MX/FF Number(s)".into(), value.clone());
            }
            if header.contains("Legal Name") {
                fields.insert("Legal Name".into(), value.clone());
            }
            if header.contains("Physical Address") {
                fields.insert("Physical Address".into(), collapse_whitespace(&value));
            }
            if header.contains("Phone") {
                fields.insert("Phone".into(), value.clone());
            }
            if header.contains(AUTHORITY_STATUS_FIELD) {
                fields.insert(AUTHORITY_STATUS_FIELD.into(), authority_status(&value));
            }
            if header.contains("Power Units") {
                fields.insert("Power Units".into(), cells.first().cloned().unwrap_or_default());
                fields.insert("Drivers".into(), cells.get(1).cloned().unwrap_or_default());
            }
        }

        Ok(Some(fields))
    }
}

fn selector(css: &str) -> Result<Selector, AppError> {
    Selector::parse(css)
        .map_err(|e| AppError::ExtractionError(format!("Invalid selector '{css}': {e}")))
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop the trailing "For Licensing ..." link text (any case) and normalise spacing.
fn authority_status(raw: &str) -> String {
    let cut = raw
        .to_ascii_lowercase()
        .find("for licensing")
        .unwrap_or(raw.len());
    collapse_whitespace(&raw[..cut])
}
