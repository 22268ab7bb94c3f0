//! Rounding policy for the whole ledger.
//!
//! Quantities carry 4 decimal places, currency carries 2, applied at every
//! computation boundary so a persisted settlement re-reads to identical
//! figures. Keep all rounding here — no ad hoc `(x * 100.0).round()` at
//! call sites.

/// Round a physical quantity to 4 decimal places.
pub fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Round a currency amount to 2 decimal places.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Quantities smaller than this are treated as zero when deciding whether
/// a discrepancy line is worth retaining.
pub const QTY_EPSILON: f64 = 0.001;
