//! Moving averages and RSI over close prices
//!
//! Each function returns one entry per input value, `None` until enough
//! history has accumulated.

use rust_decimal::Decimal;

/// Simple moving average
pub fn sma(values: &[Decimal], period: usize) -> Vec<Option<Decimal>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let divisor = Decimal::from(period as i64);
    let mut sum: Decimal = values.iter().take(period).sum();
    out[period - 1] = Some(sum / divisor);

    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out[i] = Some(sum / divisor);
    }
    out
}

/// Exponential moving average, seeded with the SMA of the first `period` values
pub fn ema(values: &[Decimal], period: usize) -> Vec<Option<Decimal>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let multiplier = Decimal::from(2) / (Decimal::from(period as i64) + Decimal::ONE);
    let sum: Decimal = values.iter().take(period).sum();
    let mut current = sum / Decimal::from(period as i64);
    out[period - 1] = Some(current);

    for i in period..values.len() {
        current = (values[i] - current) * multiplier + current;
        out[i] = Some(current);
    }
    out
}

/// Relative Strength Index with Wilder smoothing
pub fn rsi(values: &[Decimal], period: usize) -> Vec<Option<Decimal>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() <= period {
        return out;
    }

    let p = Decimal::from(period as i64);
    let hundred = Decimal::ONE_HUNDRED;

    let change = |i: usize| values[i] - values[i - 1];
    let gain = |c: Decimal| c.max(Decimal::ZERO);
    let loss = |c: Decimal| (-c).max(Decimal::ZERO);

    let mut avg_gain: Decimal = (1..=period).map(|i| gain(change(i))).sum::<Decimal>() / p;
    let mut avg_loss: Decimal = (1..=period).map(|i| loss(change(i))).sum::<Decimal>() / p;

    let value = |g: Decimal, l: Decimal| {
        if l.is_zero() {
            hundred
        } else {
            hundred - hundred / (Decimal::ONE + g / l)
        }
    };
    out[period] = Some(value(avg_gain, avg_loss));

    for i in (period + 1)..values.len() {
        let c = change(i);
        avg_gain = (avg_gain * (p - Decimal::ONE) + gain(c)) / p;
        avg_loss = (avg_loss * (p - Decimal::ONE) + loss(c)) / p;
        out[i] = Some(value(avg_gain, avg_loss));
    }
    out
}
