//! Consolidated spreadsheet writer.
//!
//! One row per extracted line item; invoices without lines still get one
//! row so every processed invoice is visible in the workbook. The column
//! order is fixed — accounting-side tooling imports the sheet by position.
//! Numeric cells are written as numbers, confidences as fractions formatted
//! as percentages, and `Avvikelse` degrades to the literal string `"N/A"`
//! when no header total exists to diff against.

use crate::error::FakturaError;
use crate::model::{InvoiceLine, InvoiceRecord};
use rust_decimal::prelude::ToPrimitive;
use rust_xlsxwriter::{Format, Workbook};
use std::path::Path;
use tracing::info;

/// Fixed column order.
const COLUMNS: &[&str] = &[
    "Fakturanummer",
    "Referenser",
    "Företag",
    "Fakturadatum",
    "Beskrivning",
    "Antal",
    "Enhet",
    "Á-pris",
    "Rabatt",
    "Summa",
    "Hela summan",
    "Faktura-ID",
    "Status",
    "Radsumma",
    "Avvikelse",
    "Fakturanummer-konfidens",
    "Totalsumma-konfidens",
];

/// Write all invoice records into one workbook.
pub fn write(records: &[InvoiceRecord], path: &Path) -> Result<(), FakturaError> {
    let fail = |detail: String| FakturaError::SpreadsheetWriteFailed {
        path: path.to_path_buf(),
        detail,
    };

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Fakturor").map_err(|e| fail(e.to_string()))?;

    let header_format = Format::new().set_bold();
    let percent = Format::new().set_num_format("0.0%");

    for (col, title) in COLUMNS.iter().enumerate() {
        sheet
            .write_string_with_format(0, col as u16, *title, &header_format)
            .map_err(|e| fail(e.to_string()))?;
    }

    let mut row: u32 = 1;
    for record in records {
        if record.lines.is_empty() {
            write_row(sheet, row, record, None, &percent).map_err(fail)?;
            row += 1;
        } else {
            for line in &record.lines {
                write_row(sheet, row, record, Some(line), &percent).map_err(fail)?;
                row += 1;
            }
        }
    }

    workbook.save(path).map_err(|e| fail(e.to_string()))?;
    info!(path = %path.display(), rows = row - 1, "spreadsheet written");
    Ok(())
}

fn write_row(
    sheet: &mut rust_xlsxwriter::Worksheet,
    row: u32,
    record: &InvoiceRecord,
    line: Option<&InvoiceLine>,
    percent: &Format,
) -> Result<(), String> {
    let err = |e: rust_xlsxwriter::XlsxError| e.to_string();

    let mut write_str = |sheet: &mut rust_xlsxwriter::Worksheet,
                         col: u16,
                         value: Option<&str>|
     -> Result<(), String> {
        if let Some(v) = value {
            sheet.write_string(row, col, v).map_err(err)?;
        }
        Ok(())
    };

    // Invoice-level columns are identical for all rows of the invoice.
    write_str(sheet, 0, record.header.invoice_number.as_deref())?;
    write_str(sheet, 1, record.header.reference.as_deref())?;
    write_str(sheet, 2, record.header.supplier.as_deref())?;
    write_str(sheet, 3, record.header.invoice_date.as_deref())?;

    if let Some(line) = line {
        sheet.write_string(row, 4, &line.description).map_err(err)?;
        if let Some(q) = line.quantity.and_then(|d| d.to_f64()) {
            sheet.write_number(row, 5, q).map_err(err)?;
        }
        write_str(sheet, 6, line.unit.as_deref())?;
        if let Some(p) = line.unit_price.and_then(|d| d.to_f64()) {
            sheet.write_number(row, 7, p).map_err(err)?;
        }
        if let Some(d) = line.discount.and_then(|d| d.to_f64()) {
            sheet.write_number(row, 8, d).map_err(err)?;
        }
        if let Some(total) = line.total_amount.to_f64() {
            sheet.write_number(row, 9, total).map_err(err)?;
        }
    }

    if let Some(total) = record.header.total_amount.and_then(|d| d.to_f64()) {
        sheet.write_number(row, 10, total).map_err(err)?;
    }
    sheet.write_string(row, 11, &record.id).map_err(err)?;
    sheet
        .write_string(row, 12, record.validation.status.to_string())
        .map_err(err)?;
    if let Some(sum) = record.validation.lines_sum.to_f64() {
        sheet.write_number(row, 13, sum).map_err(err)?;
    }

    // Avvikelse: numeric diff, or the literal "N/A" without a header total.
    match record.validation.diff.and_then(|d| d.to_f64()) {
        Some(diff) => sheet.write_number(row, 14, diff).map_err(err)?,
        None => sheet.write_string(row, 14, "N/A").map_err(err)?,
    };

    sheet
        .write_number_with_format(row, 15, record.validation.invoice_number_conf, percent)
        .map_err(err)?;
    sheet
        .write_number_with_format(row, 16, record.validation.total_conf, percent)
        .map_err(err)?;

    Ok(())
}
