//! Invoice boundary detector: partition a multi-invoice PDF into virtual
//! invoices.
//!
//! A page opens a new invoice when it carries the strong anchor — a
//! "Faktura" keyword with an adjacent invoice-number candidate — and that
//! number differs from the one the current invoice was opened with.
//! Repeating the same anchor on a follow-on page ("Sida 2/2" layouts) does
//! not split. Pages without an anchor continue the current invoice, so the
//! page ranges always partition the document.

use crate::model::{RoutedPage, VirtualInvoice};
use crate::pipeline::rows;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static FAKTURA_KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bfaktura(nummer)?\b").expect("faktura keyword"));

static INVOICE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{6,10}\b").expect("invoice number"));

/// The anchor found on a page, if any: the invoice-number candidate sitting
/// next to a "Faktura" keyword.
fn page_anchor(page: &RoutedPage) -> Option<String> {
    let page_rows = rows::group_rows(&page.tokens);
    for (i, row) in page_rows.iter().enumerate() {
        let Some(kw) = FAKTURA_KEYWORD.find(&row.text) else {
            continue;
        };
        // Same row, to the right of the keyword.
        if let Some(m) = INVOICE_NUMBER.find(&row.text[kw.end()..]) {
            return Some(m.as_str().to_string());
        }
        // Directly below: the number printed under its label.
        if let Some(next) = page_rows.get(i + 1) {
            if let Some(m) = INVOICE_NUMBER.find(&next.text) {
                return Some(m.as_str().to_string());
            }
        }
    }
    None
}

/// Partition routed pages into virtual invoices.
///
/// `file_stem` feeds the id scheme `{file_stem}__{index}`. Always returns at
/// least one invoice for a non-empty page list; the ranges cover every page
/// exactly once.
pub fn detect(pages: &[RoutedPage], file_stem: &str) -> Vec<VirtualInvoice> {
    if pages.is_empty() {
        return Vec::new();
    }

    let mut invoices: Vec<VirtualInvoice> = Vec::new();
    let mut current_anchor: Option<String> = None;

    for page in pages {
        let anchor = page_anchor(page);
        let starts_new = match (&anchor, &current_anchor) {
            _ if invoices.is_empty() => true,
            (Some(new), Some(open)) => new != open,
            (Some(_), None) => true,
            (None, _) => false,
        };

        if starts_new {
            let index = invoices.len() + 1;
            debug!(page = page.page_no, index, anchor = ?anchor, "new virtual invoice");
            invoices.push(VirtualInvoice {
                index,
                start_page: page.page_no,
                end_page: page.page_no,
                id: format!("{file_stem}__{index}"),
            });
            current_anchor = anchor;
        } else if let Some(last) = invoices.last_mut() {
            last.end_page = page.page_no;
            if anchor.is_some() {
                current_anchor = anchor;
            }
        }
    }

    invoices
}
