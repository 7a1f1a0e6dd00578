//! Deterministic rule-based parser for OCR'd invoice text.
//!
//! Keyword-anchored regex rules; no model involvement. Structured row
//! patterns carry full quantity/price columns; a loose fallback pattern
//! recovers description-plus-single-amount rows the structured patterns
//! missed, flagged so the chain can damp their confidence.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::debug;

lazy_static! {
    // Structured line-item rows. Quantity-first layout:
    //   2  GLUTEN FREE CHEESECAKE  45.00  90.00
    static ref ROW_QTY_FIRST: Regex = Regex::new(
        r"(?i)^\s*(?P<qty>\d{1,4}(?:\.\d{1,2})?)\s+(?P<desc>[A-Za-z][A-Za-z0-9 .,&'x*/()-]*?)\s+\$?(?P<unit>\d{1,3}(?:,\d{3})*\.\d{2})\s+\$?(?P<total>\d{1,3}(?:,\d{3})*\.\d{2})\s*(?P<flag>\*|GST[ -]?FREE)?\s*$"
    ).unwrap();

    // Description-first layout (column gap of two or more spaces):
    //   SOURDOUGH LOAF 800G   12   3.50   42.00
    static ref ROW_DESC_FIRST: Regex = Regex::new(
        r"(?i)^\s*(?P<desc>[A-Za-z][A-Za-z0-9 .,&'x*/()-]*?)\s{2,}(?P<qty>\d{1,4}(?:\.\d{1,2})?)\s+\$?(?P<unit>\d{1,3}(?:,\d{3})*\.\d{2})\s+\$?(?P<total>\d{1,3}(?:,\d{3})*\.\d{2})\s*(?P<flag>\*|GST[ -]?FREE)?\s*$"
    ).unwrap();

    // Loose fallback: description plus exactly one amount.
    static ref ROW_LOOSE: Regex = Regex::new(
        r"(?i)^\s*(?P<desc>[A-Za-z][A-Za-z0-9 .,&'/()-]{4,}?)\s+\$?(?P<amount>\d{1,3}(?:,\d{3})*\.\d{2})\s*(?P<flag>\*|GST[ -]?FREE)?\s*$"
    ).unwrap();

    // Rows that are document summary lines, never items.
    static ref SUMMARY_ROW: Regex = Regex::new(
        r"(?i)\b(sub\s*-?total|total|gst|tax|amount\s+due|balance|freight|delivery|invoice|a[bc]n|page\s+\d)\b"
    ).unwrap();

    static ref INVOICE_NUMBER: Regex = Regex::new(
        r"(?i)(?:tax\s+)?invoice\s*(?:no|number|#)\.?\s*:?\s*([A-Za-z0-9][A-Za-z0-9/-]*)"
    ).unwrap();

    static ref INVOICE_DATE: Regex = Regex::new(
        r"(?i)(?:invoice\s+)?date[d]?\s*:?\s*(\d{1,2}[/.\-]\d{1,2}[/.\-]\d{2,4}|\d{4}-\d{2}-\d{2})"
    ).unwrap();

    static ref SUBTOTAL: Regex = Regex::new(
        r"(?i)sub\s*-?total(?:\s*\(?ex\.?\s*gst\)?)?\s*:?\s*\$?(\d{1,3}(?:,\d{3})*\.\d{2})"
    ).unwrap();

    static ref GST_TOTAL: Regex = Regex::new(
        r"(?i)\bgst(?:\s*\(?10%\)?)?\s*:?\s*\$?(\d{1,3}(?:,\d{3})*\.\d{2})"
    ).unwrap();

    static ref GRAND_TOTAL: Regex = Regex::new(
        r"(?i)(?:total(?:\s*\(?inc\.?\s*gst\)?)?|amount\s+due|balance\s+due)\s*:?\s*\$?(\d{1,3}(?:,\d{3})*\.\d{2})"
    ).unwrap();
}

/// One parsed line-item row.
#[derive(Debug, Clone)]
pub struct ParsedRow {
    /// Raw description text, untouched. Code stripping and pack-size
    /// disambiguation belong to the normalizer.
    pub description: String,
    /// Invoiced quantity.
    pub quantity: Decimal,
    /// Cost ex-GST for one invoiced line.
    pub unit_cost: Decimal,
    /// Row line total, when the row carried one.
    pub line_total: Option<Decimal>,
    /// Row was marked GST-free.
    pub gst_exempt: bool,
    /// Only the loose fallback pattern understood this row.
    pub loose: bool,
}

/// Header fields and line items parsed from concatenated OCR text.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub invoice_number: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub subtotal_ex_gst: Option<Decimal>,
    pub gst_total: Option<Decimal>,
    pub total: Option<Decimal>,
    pub items: Vec<ParsedRow>,
}

/// Parse the full OCR text of one invoice.
pub fn parse_document(text: &str) -> ParsedDocument {
    let mut doc = ParsedDocument {
        invoice_number: INVOICE_NUMBER
            .captures(text)
            .map(|c| c[1].trim_end_matches(['-', '/']).to_string()),
        invoice_date: INVOICE_DATE
            .captures(text)
            .and_then(|c| parse_date(&c[1])),
        subtotal_ex_gst: SUBTOTAL.captures(text).and_then(|c| parse_amount(&c[1])),
        gst_total: GST_TOTAL.captures(text).and_then(|c| parse_amount(&c[1])),
        // The grand total is the last labeled total on the document;
        // earlier matches are section subtotals.
        total: GRAND_TOTAL
            .captures_iter(text)
            .filter_map(|c| parse_amount(&c[1]))
            .last(),
        items: Vec::new(),
    };

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(row) = parse_structured_row(line) {
            doc.items.push(row);
        } else if let Some(row) = parse_loose_row(line) {
            doc.items.push(row);
        }
    }

    debug!(
        items = doc.items.len(),
        invoice_number = ?doc.invoice_number,
        total = ?doc.total,
        "parsed OCR text"
    );
    doc
}

fn parse_structured_row(line: &str) -> Option<ParsedRow> {
    let caps = ROW_QTY_FIRST
        .captures(line)
        .or_else(|| ROW_DESC_FIRST.captures(line))?;

    let description = caps["desc"].trim().to_string();
    if SUMMARY_ROW.is_match(&description) {
        return None;
    }

    let quantity = Decimal::from_str(&caps["qty"]).ok()?;
    if quantity <= Decimal::ZERO {
        return None;
    }
    let mut unit_cost = parse_amount(&caps["unit"])?;
    let mut line_total = parse_amount(&caps["total"])?;

    // Columns can arrive swapped in OCR output; the product relation
    // decides which number is the unit price.
    let tolerance = Decimal::new(2, 2);
    if (quantity * unit_cost - line_total).abs() > tolerance
        && (quantity * line_total - unit_cost).abs() <= tolerance
    {
        std::mem::swap(&mut unit_cost, &mut line_total);
    }

    Some(ParsedRow {
        gst_exempt: caps.name("flag").is_some(),
        description,
        quantity,
        unit_cost,
        line_total: Some(line_total),
        loose: false,
    })
}

fn parse_loose_row(line: &str) -> Option<ParsedRow> {
    let caps = ROW_LOOSE.captures(line)?;
    let description = caps["desc"].trim().to_string();
    if SUMMARY_ROW.is_match(&description) {
        return None;
    }

    Some(ParsedRow {
        gst_exempt: caps.name("flag").is_some(),
        description,
        quantity: Decimal::ONE,
        unit_cost: parse_amount(&caps["amount"])?,
        line_total: None,
        loose: true,
    })
}

/// Parse an amount tolerant of thousands separators and currency signs.
pub fn parse_amount(s: &str) -> Option<Decimal> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    Decimal::from_str(&cleaned).ok()
}

/// Parse a printed date, day-first formats preferred.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    const FORMATS: &[&str] = &["%d/%m/%Y", "%d/%m/%y", "%d-%m-%Y", "%d.%m.%Y", "%Y-%m-%d"];
    let s = s.trim();
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1,234.56"), Decimal::from_str("1234.56").ok());
        assert_eq!(parse_amount("$45.00"), Decimal::from_str("45.00").ok());
        assert_eq!(parse_amount("no digits"), None);
    }

    #[test]
    fn test_parse_date_day_first() {
        assert_eq!(
            parse_date("16/02/2026"),
            NaiveDate::from_ymd_opt(2026, 2, 16)
        );
        assert_eq!(
            parse_date("2026-02-16"),
            NaiveDate::from_ymd_opt(2026, 2, 16)
        );
        assert_eq!(parse_date("not a date"), None);
    }

    #[test]
    fn test_structured_qty_first_row() {
        let row = parse_structured_row("2  GLUTEN FREE CHEESECAKE  45.00  90.00").unwrap();
        assert_eq!(row.description, "GLUTEN FREE CHEESECAKE");
        assert_eq!(row.quantity, Decimal::TWO);
        assert_eq!(row.unit_cost, Decimal::from_str("45.00").unwrap());
        assert_eq!(row.line_total, Decimal::from_str("90.00").ok());
        assert!(!row.loose);
        assert!(!row.gst_exempt);
    }

    #[test]
    fn test_structured_desc_first_row_with_gst_flag() {
        let row = parse_structured_row("SOURDOUGH LOAF 800G   12   3.50   42.00 *").unwrap();
        assert_eq!(row.description, "SOURDOUGH LOAF 800G");
        assert_eq!(row.quantity, Decimal::from(12));
        assert!(row.gst_exempt);
    }

    #[test]
    fn test_swapped_columns_are_corrected() {
        // OCR put the line total before the unit price.
        let row = parse_structured_row("4  FULL CREAM MILK 2L  8.40  2.10").unwrap();
        assert_eq!(row.unit_cost, Decimal::from_str("2.10").unwrap());
        assert_eq!(row.line_total, Decimal::from_str("8.40").ok());
    }

    #[test]
    fn test_summary_rows_are_skipped() {
        assert!(parse_structured_row("SUBTOTAL  1  100.00  100.00").is_none());
        assert!(parse_loose_row("TOTAL INC GST 110.00").is_none());
        assert!(parse_loose_row("GST 10.00").is_none());
    }

    #[test]
    fn test_loose_row_fallback() {
        let row = parse_loose_row("ORGANIC HONEY 500G JAR  12.95").unwrap();
        assert_eq!(row.quantity, Decimal::ONE);
        assert_eq!(row.unit_cost, Decimal::from_str("12.95").unwrap());
        assert!(row.loose);
    }

    #[test]
    fn test_parse_document_header_and_items() {
        let text = "TAX INVOICE\n\
                    Invoice No: INV-2041\n\
                    Date: 16/02/2026\n\
                    \n\
                    2  GLUTEN FREE CHEESECAKE  45.00  90.00\n\
                    4  FULL CREAM MILK 2L  2.10  8.40\n\
                    \n\
                    Subtotal 98.40\n\
                    GST 9.84\n\
                    TOTAL 108.24\n";

        let doc = parse_document(text);
        assert_eq!(doc.invoice_number.as_deref(), Some("INV-2041"));
        assert_eq!(doc.invoice_date, NaiveDate::from_ymd_opt(2026, 2, 16));
        assert_eq!(doc.subtotal_ex_gst, Decimal::from_str("98.40").ok());
        assert_eq!(doc.gst_total, Decimal::from_str("9.84").ok());
        assert_eq!(doc.total, Decimal::from_str("108.24").ok());
        assert_eq!(doc.items.len(), 2);
    }
}
