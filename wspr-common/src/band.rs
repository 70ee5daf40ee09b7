//! Amateur band table used to label spots.

/// (label, low MHz, high MHz, high bound inclusive)
const BANDS: &[(&str, f64, f64, bool)] = &[
    ("2200m", 0.1357, 0.1378, true),
    ("630m", 0.470, 0.480, false),
    ("160m", 1.8, 2.0, true),
    ("80m", 3.5, 4.0, true),
    ("60m", 5.25, 5.45, true),
    ("40m", 7.0, 7.3, true),
    ("30m", 10.1, 10.15, true),
    ("20m", 14.0, 14.35, true),
    ("17m", 18.068, 18.168, true),
    ("15m", 21.0, 21.45, true),
    ("12m", 24.89, 24.99, true),
    ("10m", 28.0, 29.7, true),
    ("6m", 50.0, 54.0, true),
];

/// Map a dial frequency in kHz to its band label, or `"other"`.
pub fn band_label(frequency_khz: f64) -> &'static str {
    let mhz = frequency_khz / 1000.0;

    BANDS
        .iter()
        .find(|(_, low, high, inclusive)| {
            mhz >= *low && if *inclusive { mhz <= *high } else { mhz < *high }
        })
        .map(|(label, ..)| *label)
        .unwrap_or("other")
}
