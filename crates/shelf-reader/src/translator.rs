//! Conversions between page numbers, location tokens, and persisted progress
//!
//! Everything here is pure. Fractions leaving this module are clamped to
//! `[0, 1]` and percentages to `[0, 100]`.

use crate::constants::MAX_PERCENTAGE;
use crate::locations::LocationIndex;
use crate::types::{LocationToken, ProgressSnapshot};

/// Clamp a fraction into `[0, 1]`, mapping NaN and infinities to 0
pub fn clamp_fraction(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// `current_page / total_pages`, or 0 for an empty document
pub fn pdf_progress(current_page: u32, total_pages: u32) -> f64 {
    if total_pages == 0 {
        return 0.0;
    }
    clamp_fraction(current_page as f64 / total_pages as f64)
}

/// Progress of an EPUB location
///
/// Preference order: the engine-reported fraction when it is a number, then
/// the token's slot in the location index, then 0.
pub fn epub_progress(
    reported: Option<f64>,
    token: Option<&LocationToken>,
    index: Option<&LocationIndex>,
) -> f64 {
    if let Some(reported) = reported.filter(|r| r.is_finite()) {
        return clamp_fraction(reported);
    }

    match (token, index) {
        (Some(token), Some(index)) if !index.is_empty() => index
            .fraction_of(token)
            .map(clamp_fraction)
            .unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Location to resume at for a stored percentage
///
/// `None` means "display the default location": the percentage is at or
/// outside the book's bounds, or no index is available yet.
pub fn percentage_to_location(
    percentage: f64,
    index: Option<&LocationIndex>,
) -> Option<LocationToken> {
    if !(percentage > 0.0 && percentage < MAX_PERCENTAGE) {
        return None;
    }
    let index = index.filter(|i| !i.is_empty())?;
    index.token_at(percentage / MAX_PERCENTAGE)
}

/// Persisted pair for a PDF page
pub fn pdf_snapshot(current_page: u32, total_pages: u32) -> ProgressSnapshot {
    ProgressSnapshot {
        current_page,
        progress_percentage: to_percentage(pdf_progress(current_page, total_pages)),
    }
}

/// Persisted pair for an EPUB fraction; the page is a rounded percentage echo
pub fn epub_snapshot(fraction: f64) -> ProgressSnapshot {
    let progress_percentage = to_percentage(fraction);
    ProgressSnapshot {
        current_page: progress_percentage.round() as u32,
        progress_percentage,
    }
}

/// Fraction to percentage, clamped to `[0, 100]`
pub fn to_percentage(fraction: f64) -> f64 {
    clamp_fraction(fraction) * MAX_PERCENTAGE
}
