/// Economic era code, value labels in [`ECON_ERA_LABELS`].
pub fn econ_era(year: i32) -> u8 {
    match year {
        y if y < 1946 => 1,
        y if y < 1973 => 2,
        y if y < 1991 => 3,
        y if y < 2008 => 4,
        y if y < 2020 => 5,
        _ => 6,
    }
}

pub const ECON_ERA_LABELS: &[(u8, &str)] = &[
    (1, "Pre-WWII/WWII"),
    (2, "Post-war boom"),
    (3, "Stagflation/Reagan era"),
    (4, "Modern growth"),
    (5, "Great Recession recovery"),
    (6, "COVID era"),
];

/// Unemployment band for a rate in percent.
pub fn unemployment_category(rate: f64) -> u8 {
    if rate < 4.0 {
        1
    } else if rate < 6.0 {
        2
    } else if rate < 8.0 {
        3
    } else {
        4
    }
}

pub const UNEMPLOYMENT_LABELS: &[(u8, &str)] =
    &[(1, "Low"), (2, "Moderate"), (3, "High"), (4, "Very High")];

pub fn decade(year: i32) -> i32 {
    year.div_euclid(10) * 10
}
