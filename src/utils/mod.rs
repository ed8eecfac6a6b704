//! Small shared helpers

pub mod retry;

/// Render a microsecond offset as signed seconds, e.g. `+7.000s`
pub fn format_offset(micros: i64) -> String {
    let sign = if micros < 0 { '-' } else { '+' };
    let abs = micros.unsigned_abs();
    format!("{sign}{}.{:03}s", abs / 1_000_000, (abs % 1_000_000) / 1_000)
}
