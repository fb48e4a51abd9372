use num_complex::Complex64;
use pretty_dtoa::{dtoa, FmtFloatConfig};
use std::collections::HashMap;
use std::f64::consts::PI;

const FLOAT_CONFIG: FmtFloatConfig = FmtFloatConfig::default()
    .add_point_zero(false)
    .max_significant_digits(9);

pub fn format_complex(z: &Complex64) -> String {
    format!(
        "{}{}j{}",
        dtoa(z.re, FLOAT_CONFIG),
        if z.im.signum() < 0.0 { "-" } else { "+" },
        dtoa(z.im.abs(), FLOAT_CONFIG)
    )
}

pub fn format_rect_vec(v: &[Complex64]) -> String {
    let a: Vec<String> = v.iter().map(format_complex).collect();
    format!("[{}]", a.join(", "))
}

pub fn format_polar(z: &Complex64) -> String {
    format!(
        "{}\u{2220}{}\u{00B0}",
        dtoa(z.norm(), FLOAT_CONFIG),
        dtoa(z.arg() * 180.0 / PI, FLOAT_CONFIG)
    )
}

/// Formats a bus voltage map as `id=value` pairs, sorted by bus id.
pub fn format_voltage_map(v: &HashMap<String, Complex64>, polar: bool) -> String {
    let mut ids: Vec<&String> = v.keys().collect();
    ids.sort();
    let a: Vec<String> = ids
        .into_iter()
        .map(|id| {
            let z = &v[id];
            let s = if polar {
                format_polar(z)
            } else {
                format_complex(z)
            };
            format!("{}={}", id, s)
        })
        .collect();
    format!("{{{}}}", a.join(", "))
}
