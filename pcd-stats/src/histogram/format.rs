//! Number formatting for histogram reports.

/// Decimal places used to print values of a histogram with the given bin
/// size. Only the common LiDAR step sizes are known; everything else falls
/// back to a trimmed full-precision rendering.
pub(crate) fn decimals_for_step(step: f64) -> Option<usize> {
    const STEPS: [(&[f64], usize); 9] = [
        (&[0.1, 0.2, 0.3, 0.4, 0.5], 1),
        (&[0.01, 0.02, 0.03, 0.04, 0.05, 0.25], 2),
        (&[0.001, 0.002, 0.003, 0.004, 0.005, 0.025, 0.125], 3),
        (&[0.0001, 0.0002, 0.0005, 0.0025, 0.0125], 4),
        (&[0.00001, 0.00002, 0.00005, 0.00025, 0.00125], 5),
        (&[0.000001, 0.000002, 0.000005, 0.000025, 0.000125], 6),
        (&[0.0000001], 7),
        (&[0.00000001], 8),
        (&[0.000000001], 9),
    ];
    STEPS
        .iter()
        .find(|(steps, _)| steps.contains(&step))
        .map(|(_, decimals)| *decimals)
}

pub(crate) fn format_value(value: f64, step: f64) -> String {
    match decimals_for_step(step) {
        Some(decimals) => format!("{:.*}", decimals, value),
        None => trim_zeros(&format!("{:.15}", value)),
    }
}

/// Shortest representation with six significant digits, switching to
/// scientific notation for very large or small magnitudes.
pub(crate) fn format_general(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    if !value.is_finite() {
        return value.to_string();
    }
    // the exponent has to be taken after rounding to six digits
    let scientific = format!("{:.5e}", value);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((mantissa, exponent)) => (mantissa, exponent.parse::<i32>().unwrap_or(0)),
        None => return scientific,
    };
    if !(-4..6).contains(&exponent) {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_zeros(mantissa), sign, exponent.abs())
    } else {
        let decimals = (5 - exponent) as usize;
        trim_zeros(&format!("{:.*}", decimals, value))
    }
}

fn trim_zeros(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}
