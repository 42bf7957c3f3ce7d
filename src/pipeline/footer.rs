//! Footer totals extractor: the invoice-level control amounts.
//!
//! Two figures matter to validation: the net total excluding VAT
//! ("Nettobelopp exkl. moms") and the amount to pay ("Att betala" /
//! "Summa att betala"). Both come with traceability so a review package
//! can point at the exact footer cell the check was made against.

use crate::amount::find_amounts;
use crate::model::{PreparedPage, Row, SegmentKind, Traceability};
use crate::pipeline::segments;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;

static NET_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)nettobelopp\s+exkl\.?\s*moms").expect("net label"));

static TO_PAY_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(summa\s+att\s+betala|att\s+betala)").expect("to-pay label"));

/// Control totals read from the invoice footer.
#[derive(Debug, Clone, Default)]
pub struct FooterTotals {
    /// Net total excluding VAT, signed.
    pub net: Option<(Decimal, Option<Traceability>)>,
    /// Grand total to pay.
    pub to_pay: Option<(Decimal, Option<Traceability>)>,
}

impl FooterTotals {
    pub fn net_value(&self) -> Option<Decimal> {
        self.net.as_ref().map(|(v, _)| *v)
    }

    pub fn to_pay_value(&self) -> Option<Decimal> {
        self.to_pay.as_ref().map(|(v, _)| *v)
    }
}

/// Extract footer totals from an invoice's pages, scanning the last page
/// first — the control amounts sit at the end of the invoice.
pub fn extract(pages: &[PreparedPage]) -> FooterTotals {
    let mut totals = FooterTotals::default();

    for page in pages.iter().rev() {
        let footer_rows = segments::rows_of_kind(&page.segments, SegmentKind::Footer);
        // Footer keywords occasionally land inside the items segment on
        // short invoices; fall back to every row of the page.
        let rows: Vec<Row> = if footer_rows.is_empty() {
            page.rows.clone()
        } else {
            footer_rows
        };

        for row in rows.iter().rev() {
            if totals.net.is_none() {
                if let Some(found) = labelled_amount(row, &NET_LABEL) {
                    totals.net = Some(found);
                }
            }
            if totals.to_pay.is_none() {
                if let Some(found) = labelled_amount(row, &TO_PAY_LABEL) {
                    totals.to_pay = Some(found);
                }
            }
        }

        if totals.net.is_some() && totals.to_pay.is_some() {
            break;
        }
    }

    totals
}

/// The rightmost amount after a label match on the row.
fn labelled_amount(row: &Row, label: &Regex) -> Option<(Decimal, Option<Traceability>)> {
    let m = label.find(&row.text)?;
    let (range, value) = find_amounts(&row.text)
        .into_iter()
        .filter(|(r, _)| r.start >= m.end())
        .last()?;
    let trace = row
        .tokens_for_range(&range)
        .and_then(|t| Traceability::from_tokens(&t));
    Some((value, trace))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Token;
    use crate::pipeline::{rows, segments};
    use rust_decimal_macros::dec;

    fn page_from_lines(lines: &[(&str, f64)]) -> PreparedPage {
        let mut tokens = Vec::new();
        for (line, y) in lines {
            let mut x = 40.0;
            for word in line.split_whitespace() {
                let w = word.chars().count() as f64 * 6.0;
                tokens.push(Token {
                    text: word.to_string(),
                    x,
                    y: *y,
                    w,
                    h: 10.0,
                    page_no: 1,
                    font_size: None,
                    confidence: None,
                });
                x += w + 6.0;
            }
        }
        let grouped = rows::group_rows(&tokens);
        let segs = segments::identify(&grouped, 842.0);
        PreparedPage {
            page_no: 1,
            width: 595.0,
            height: 842.0,
            rows: grouped,
            segments: segs,
        }
    }

    #[test]
    fn extracts_both_totals() {
        let page = page_from_lines(&[
            ("12345 Vara 1 st 100,00 25,00 1 338,08", 400.0),
            ("Nettobelopp exkl. moms 1 338,08", 760.0),
            ("Moms 25% 334,52", 780.0),
            ("Summa att betala 1 672,60", 800.0),
        ]);
        let totals = extract(&[page]);
        assert_eq!(totals.net_value(), Some(dec!(1338.08)));
        assert_eq!(totals.to_pay_value(), Some(dec!(1672.60)));

        let (_, trace) = totals.net.unwrap();
        let trace = trace.unwrap();
        assert_eq!(trace.excerpt, "1 338,08");
        assert_eq!(trace.source_tokens, vec!["1", "338,08"]);
    }

    #[test]
    fn negative_net_total_keeps_sign() {
        let page = page_from_lines(&[("Nettobelopp exkl. moms 474,30-", 780.0)]);
        let totals = extract(&[page]);
        assert_eq!(totals.net_value(), Some(dec!(-474.30)));
    }

    #[test]
    fn missing_totals_stay_none() {
        let page = page_from_lines(&[("bara en rad utan belopp", 400.0)]);
        let totals = extract(&[page]);
        assert!(totals.net.is_none());
        assert!(totals.to_pay.is_none());
    }

    #[test]
    fn last_page_wins_for_multi_page_invoices() {
        let p1 = page_from_lines(&[("Att betala 100,00", 800.0)]);
        let mut p2 = page_from_lines(&[("Att betala 200,00", 800.0)]);
        p2.page_no = 2;
        for row in &mut p2.rows {
            for t in &mut row.tokens {
                t.page_no = 2;
            }
        }
        let totals = extract(&[p1, p2]);
        assert_eq!(totals.to_pay_value(), Some(dec!(200.00)));
    }
}
