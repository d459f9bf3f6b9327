//! Offset spreading and due-check helpers.

/// Offset in whole seconds for rule `index` out of `count`.
///
/// Spreads `count` rules evenly over one `frequency_secs` window, working in
/// milliseconds so small windows with many rules still get distinct offsets
/// where possible.
pub(crate) fn spread_offset(frequency_secs: u64, index: usize, count: usize) -> u64 {
    if count == 0 {
        return 0;
    }
    let frequency_ms = frequency_secs.saturating_mul(1000);
    (frequency_ms / count as u64).saturating_mul(index as u64) / 1000
}

/// Whether `now_secs` lands on a frequency boundary. A zero frequency runs every tick.
pub(crate) fn is_frequency_due(now_secs: u64, frequency_secs: u64) -> bool {
    frequency_secs == 0 || now_secs % frequency_secs == 0
}

/// Whether a job waiting on its offset should fire at `now_secs`.
pub(crate) fn is_offset_due(now_secs: u64, offset_secs: u64) -> bool {
    offset_secs == 0 || now_secs % offset_secs == 0
}
