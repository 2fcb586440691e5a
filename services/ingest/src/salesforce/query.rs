use chrono::{DateTime, Utc};

/// Field every incremental query must select: the natural key.
pub const ID_FIELD: &str = "Id";

/// Remote modification timestamp the window is filtered and ordered on.
pub const MODIFIED_FIELD: &str = "LastModifiedDate";

/// Build a SOQL query for records modified strictly after `modified_after`.
///
/// Generates: `SELECT Id, Name, LastModifiedDate FROM Account WHERE LastModifiedDate > 2026-02-15T00:00:00Z ORDER BY LastModifiedDate ASC LIMIT 2000`
pub fn build_incremental_soql(
    object: &str,
    fields: &[&str],
    modified_after: DateTime<Utc>,
    limit: Option<u32>,
) -> String {
    let mut soql = format!(
        "SELECT {} FROM {object} WHERE {MODIFIED_FIELD} > {} ORDER BY {MODIFIED_FIELD} ASC",
        select_list(fields).join(", "),
        soql_datetime(modified_after),
    );
    if let Some(limit) = limit {
        soql.push_str(&format!(" LIMIT {limit}"));
    }
    soql
}

/// `Id` first, then the configured fields, then `LastModifiedDate`; duplicates dropped.
fn select_list<'a>(fields: &[&'a str]) -> Vec<&'a str> {
    let mut out: Vec<&'a str> = Vec::with_capacity(fields.len() + 2);
    for field in std::iter::once(ID_FIELD)
        .chain(fields.iter().copied())
        .chain(std::iter::once(MODIFIED_FIELD))
    {
        if !out.iter().any(|f| f.eq_ignore_ascii_case(field)) {
            out.push(field);
        }
    }
    out
}

/// SOQL datetime literals are unquoted ISO-8601 in UTC. Sub-second precision
/// is truncated, which widens the window rather than narrowing it.
fn soql_datetime(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn builds_windowed_query() {
        let after = Utc.with_ymd_and_hms(2026, 2, 15, 0, 0, 0).unwrap();
        let soql = build_incremental_soql("Account", &["Name", "Phone"], after, None);
        assert_eq!(
            soql,
            "SELECT Id, Name, Phone, LastModifiedDate FROM Account \
             WHERE LastModifiedDate > 2026-02-15T00:00:00Z ORDER BY LastModifiedDate ASC"
        );
    }

    #[test]
    fn appends_row_cap() {
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 12, 30, 0).unwrap();
        let soql = build_incremental_soql("Objekt__c", &["Name"], after, Some(2000));
        assert!(soql.ends_with("ORDER BY LastModifiedDate ASC LIMIT 2000"), "got: {soql}");
    }

    #[test]
    fn id_and_modified_are_not_duplicated() {
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let soql = build_incremental_soql(
            "Hausunit__c",
            &["LastModifiedDate", "Name", "Id", "name"],
            after,
            None,
        );
        assert!(
            soql.starts_with("SELECT Id, LastModifiedDate, Name FROM Hausunit__c"),
            "got: {soql}"
        );
    }

    #[test]
    fn sub_second_precision_is_truncated() {
        let after = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap()
            + chrono::Duration::milliseconds(890);
        let soql = build_incremental_soql("Account", &[], after, None);
        assert!(soql.contains("> 2026-03-04T05:06:07Z "), "got: {soql}");
    }
}
