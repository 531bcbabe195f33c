//! # Reporter String Construction
//!
//! Builds the author/reporter list published with every report: the
//! requesting user first, then the service's standing co-authors,
//! deduplicated by name with order preserved, with the service
//! acknowledgment text appended. Computed once per request lifetime and
//! cached on the row so retries do not recompute it.

use crate::error::{DispatchError, Result};
use crate::models::Author;

/// Hard cap on the published reporter string; the report system rejects
/// longer values with an opaque error, so fail locally instead
const MAX_REPORTER_LENGTH: usize = 1000;
const MAX_NAME_LENGTH: usize = 100;

/// Build the reporter string for one submission request.
///
/// Validation failures here are terminal for both target systems since the
/// string is shared between them.
pub fn build_reporter_string(
    requester: &Author,
    coauthors: &[Author],
    acknowledgments: Option<&str>,
) -> Result<String> {
    let mut entries: Vec<String> = Vec::with_capacity(1 + coauthors.len());
    let mut seen: Vec<String> = Vec::new();

    for author in std::iter::once(requester).chain(coauthors.iter()) {
        let formatted = format_author(author)?;
        let key = normalized_name(author);
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        entries.push(formatted);
    }

    if entries.is_empty() {
        return Err(DispatchError::Validation(
            "missing authors: at least one reporter is required".to_string(),
        ));
    }

    let mut reporter = entries.join(", ");
    if let Some(ack) = acknowledgments.map(str::trim).filter(|a| !a.is_empty()) {
        reporter.push(' ');
        reporter.push_str(ack);
    }

    if reporter.len() > MAX_REPORTER_LENGTH {
        return Err(DispatchError::Validation(format!(
            "reporter string exceeds {MAX_REPORTER_LENGTH} characters"
        )));
    }
    Ok(reporter)
}

fn format_author(author: &Author) -> Result<String> {
    let given = author.given_name.trim();
    let family = author.family_name.trim();
    if given.is_empty() || family.is_empty() {
        return Err(DispatchError::Validation(
            "missing authors: author entries require given and family names".to_string(),
        ));
    }
    if given.len() > MAX_NAME_LENGTH || family.len() > MAX_NAME_LENGTH {
        return Err(DispatchError::Validation(format!(
            "author name exceeds {MAX_NAME_LENGTH} characters: {given} {family}"
        )));
    }
    let affiliation = author
        .affiliation
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| {
            DispatchError::Validation(format!("missing affiliation for author {given} {family}"))
        })?;
    Ok(format!("{given} {family} ({affiliation})"))
}

fn normalized_name(author: &Author) -> String {
    format!(
        "{} {}",
        author.given_name.trim().to_lowercase(),
        author.family_name.trim().to_lowercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author(given: &str, family: &str, affiliation: Option<&str>) -> Author {
        Author {
            given_name: given.to_string(),
            family_name: family.to_string(),
            affiliation: affiliation.map(str::to_string),
        }
    }

    #[test]
    fn test_requester_first_then_coauthors() {
        let reporter = build_reporter_string(
            &author("Grace", "Hopper", Some("Navy")),
            &[author("Ada", "Lovelace", Some("AEI"))],
            Some("on behalf of the survey collaboration"),
        )
        .unwrap();
        assert_eq!(
            reporter,
            "Grace Hopper (Navy), Ada Lovelace (AEI) on behalf of the survey collaboration"
        );
    }

    #[test]
    fn test_duplicate_authors_collapsed_order_preserved() {
        let reporter = build_reporter_string(
            &author("Grace", "Hopper", Some("Navy")),
            &[
                author("grace", "hopper", Some("Other Affiliation")),
                author("Ada", "Lovelace", Some("AEI")),
            ],
            None,
        )
        .unwrap();
        assert_eq!(reporter, "Grace Hopper (Navy), Ada Lovelace (AEI)");
    }

    #[test]
    fn test_missing_affiliation_is_a_validation_error() {
        let err = build_reporter_string(&author("Grace", "Hopper", None), &[], None).unwrap_err();
        assert!(err.to_string().contains("missing affiliation"));

        let blank =
            build_reporter_string(&author("Grace", "Hopper", Some("  ")), &[], None).unwrap_err();
        assert!(blank.to_string().contains("missing affiliation"));
    }

    #[test]
    fn test_missing_name_is_a_validation_error() {
        let err = build_reporter_string(&author("", "Hopper", Some("Navy")), &[], None).unwrap_err();
        assert!(err.to_string().contains("missing authors"));
    }

    #[test]
    fn test_overlong_reporter_rejected() {
        let coauthors: Vec<Author> = (0..40)
            .map(|i| author(&format!("Name{i:02}"), &format!("Family{i:02}"), Some("A Rather Long Affiliation String")))
            .collect();
        let err = build_reporter_string(
            &author("Grace", "Hopper", Some("Navy")),
            &coauthors,
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }
}
