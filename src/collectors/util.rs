//! Small helpers shared by the scrapers and the CLI.

use sqlx::Row;
use sqlx::postgres::PgRow;

/// Milliseconds per second, for the `*_time` columns PostgreSQL reports in ms.
pub const MS_PER_SEC: f64 = 1000.0;

/// Trim, drop empty entries and de-duplicate while keeping first-seen order.
#[must_use]
pub fn clean_database_list<I, S>(list: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut cleaned: Vec<String> = Vec::new();

    for name in list {
        let name = name.as_ref().trim();
        if !name.is_empty() && !cleaned.iter().any(|seen| seen == name) {
            cleaned.push(name.to_string());
        }
    }

    cleaned
}

#[must_use]
pub const fn bool_label(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

/// Text column that may be NULL, rendered as an empty label value.
///
/// # Errors
///
/// Returns an error if the column is missing or not text
pub fn text_or_empty(row: &PgRow, column: &str) -> Result<String, sqlx::Error> {
    Ok(row.try_get::<Option<String>, _>(column)?.unwrap_or_default())
}
