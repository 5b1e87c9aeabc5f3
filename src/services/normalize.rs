use chrono::{DateTime, NaiveDate, NaiveDateTime};

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y", "%Y.%m.%d"];

/// Приводит дату поездки к `YYYY-MM-DD`.
pub fn normalize_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive().format("%Y-%m-%d").to_string());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.date().format("%Y-%m-%d").to_string());
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .map(|date| date.format("%Y-%m-%d").to_string())
}

/// Название пункта для сравнения и отправки: без крайних пробелов, в нижнем регистре.
pub fn normalize_place(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dates_are_normalized() {
        assert_eq!(normalize_date("2025-03-07").as_deref(), Some("2025-03-07"));
        assert_eq!(normalize_date(" 2025/3/7 ").as_deref(), Some("2025-03-07"));
        assert_eq!(normalize_date("07/03/2025").as_deref(), Some("2025-03-07"));
        assert_eq!(normalize_date("2025-03-07T18:30:00Z").as_deref(), Some("2025-03-07"));
        assert_eq!(normalize_date("2025-03-07T18:30:00.000").as_deref(), Some("2025-03-07"));
        assert_eq!(normalize_date("tomorrow"), None);
        assert_eq!(normalize_date(""), None);
    }

    #[test]
    fn places_are_lowercased() {
        assert_eq!(normalize_place("  Pokhara "), "pokhara");
    }
}
