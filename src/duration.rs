use crate::error::{CoreError, CoreResult};

const UNITS: [(char, i64); 4] = [('d', 86_400), ('h', 3_600), ('m', 60), ('s', 1)];

/// Parse a compact duration like `1d`, `2h30m` or `45m10s` into seconds.
///
/// Units must appear in `d h m s` order, each at most once, without
/// separators. The total must be positive.
pub fn parse_duration(input: &str) -> CoreResult<i64> {
    let text = input.trim();
    if text.is_empty() {
        return Err(invalid(input));
    }

    let mut total: i64 = 0;
    let mut next_unit = 0usize;
    let mut digits = String::new();

    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        if digits.is_empty() {
            return Err(invalid(input));
        }
        let pos = UNITS[next_unit..]
            .iter()
            .position(|(unit, _)| *unit == ch)
            .ok_or_else(|| invalid(input))?;
        let (_, secs) = UNITS[next_unit + pos];
        let n: i64 = digits.parse().map_err(|_| invalid(input))?;
        total = n
            .checked_mul(secs)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(|| invalid(input))?;
        next_unit += pos + 1;
        digits.clear();
    }

    // trailing number without a unit
    if !digits.is_empty() || total <= 0 {
        return Err(invalid(input));
    }
    Ok(total)
}

fn invalid(input: &str) -> CoreError {
    CoreError::Validation(format!(
        "invalid duration {:?}; use formats like 1d, 2h, 30m, 1h30m",
        input
    ))
}
