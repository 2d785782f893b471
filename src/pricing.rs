//! Course price estimation.

use crate::catalog::Course;

/// Body surface area in m², `sqrt(height_cm * weight_kg / 3600)`
pub fn body_surface_area(height_cm: u32, weight_kg: u32) -> f64 {
    (f64::from(height_cm) * f64::from(weight_kg) / 3600.0).sqrt()
}

/// Estimated price of a course for a patient with the given BSA.
///
/// Fixed-price courses return their coefficient unchanged.
pub fn course_price(course: &Course, bsa: f64, multiplier: f64) -> f64 {
    if course.fixed_price {
        course.coefficient
    } else {
        course.coefficient * bsa * multiplier
    }
}

/// Two decimals with a comma separator, e.g. `12345,60`
pub fn format_price(value: f64) -> String {
    format!("{value:.2}").replace('.', ",")
}

/// Parse a coefficient as typed in spreadsheets: `"12 345,6"`, `"12\u{a0}345.6"`
pub fn parse_coefficient(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course(coefficient: f64, fixed_price: bool) -> Course {
        Course {
            id: "1".into(),
            name: "FOLFOX".into(),
            coefficient,
            category_id: "c".into(),
            nosology_ids: vec![],
            fixed_price,
        }
    }

    #[test]
    fn bsa_formula() {
        // 180 cm, 80 kg -> sqrt(4) = 2
        assert!((body_surface_area(180, 80) - 2.0).abs() < 1e-9);
        assert!((body_surface_area(170, 65) - 1.7504).abs() < 1e-4);
    }

    #[test]
    fn price_scales_with_bsa() {
        let price = course_price(&course(10_000.0, false), 2.0, 0.6);
        assert!((price - 12_000.0).abs() < 1e-9);

        let price = course_price(&course(10_000.0, false), 2.0, 0.75);
        assert!((price - 15_000.0).abs() < 1e-9);
    }

    #[test]
    fn fixed_price_ignores_bsa() {
        let price = course_price(&course(4_500.5, true), 2.3, 0.6);
        assert_eq!(price, 4_500.5);
    }

    #[test]
    fn price_formatting() {
        assert_eq!(format_price(12000.0), "12000,00");
        assert_eq!(format_price(1234.567), "1234,57");
    }

    #[test]
    fn coefficient_parsing() {
        assert_eq!(parse_coefficient("12 345,5"), Some(12345.5));
        assert_eq!(parse_coefficient("12\u{a0}345.5"), Some(12345.5));
        assert_eq!(parse_coefficient("\u{202f}700"), Some(700.0));
        assert_eq!(parse_coefficient(""), None);
        assert_eq!(parse_coefficient("n/a"), None);
        assert_eq!(parse_coefficient("-5"), None);
    }
}
