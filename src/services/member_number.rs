//! Member number generation.
//!
//! Member numbers look like `FENAM-2026-4F2A1C`: the current year plus six
//! random uppercase hex characters. Candidate generation is pure and fast;
//! uniqueness is probabilistic here and authoritative only at the database's
//! UNIQUE constraint.

use std::future::Future;

use chrono::{Datelike, Utc};
use rand::Rng;

use crate::db::DbPool;
use crate::error::AppError;

/// How many collisions to tolerate before giving up. With 16^6 candidates
/// per year, reaching this is practically impossible.
pub const MAX_RETRIES: u32 = 5;

const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Generate a candidate member number. Pure, no I/O.
pub fn generate() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..6)
        .map(|_| HEX_UPPER[rng.random_range(0..16)] as char)
        .collect();
    format!("FENAM-{}-{}", Utc::now().year(), suffix)
}

/// Generate a member number that the probe reports as unused, retrying on
/// collision up to `max_retries` times.
///
/// The probe is a closure over the persistence lookup so concurrency
/// behavior stays with the caller: two concurrent callers may still race to
/// claim the same candidate, and the unique constraint decides. A probe
/// failing with `RowNotFound` is treated as "not taken": that only happens
/// when the surrounding record was concurrently modified, which is an
/// acceptable race, not an error.
pub async fn generate_unique<F, Fut>(is_taken: F, max_retries: u32) -> Result<String, AppError>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<bool, sqlx::Error>>,
{
    for _ in 0..=max_retries {
        let candidate = generate();
        match is_taken(candidate.clone()).await {
            Ok(false) | Err(sqlx::Error::RowNotFound) => return Ok(candidate),
            Ok(true) => continue,
            Err(err) => return Err(AppError::Database(err)),
        }
    }
    Err(AppError::MemberNumberExhausted)
}

/// Uniqueness probe against the affiliations table.
pub async fn member_number_taken(pool: &DbPool, candidate: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM affiliations WHERE member_number = $1)",
    )
    .bind(candidate)
    .fetch_one(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::future;

    fn is_well_formed(number: &str) -> bool {
        let mut parts = number.split('-');
        let (Some(prefix), Some(year), Some(suffix), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return false;
        };
        prefix == "FENAM"
            && year.len() == 4
            && year.chars().all(|c| c.is_ascii_digit())
            && suffix.len() == 6
            && suffix
                .chars()
                .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
    }

    #[test]
    fn candidates_match_the_expected_format() {
        for _ in 0..1000 {
            let number = generate();
            assert!(is_well_formed(&number), "malformed: {number}");
        }
    }

    #[tokio::test]
    async fn retry_never_returns_a_taken_number() {
        // Populate a large existing set, then allocate against it many
        // times. Whatever collisions happen along the way, the returned
        // number must never be in the set.
        let mut taken: HashSet<String> = HashSet::new();
        while taken.len() < 10_000 {
            taken.insert(generate());
        }

        for _ in 0..200 {
            let number = generate_unique(
                |candidate| future::ready(Ok(taken.contains(&candidate))),
                MAX_RETRIES,
            )
            .await
            .unwrap();
            assert!(!taken.contains(&number));
            assert!(is_well_formed(&number));
        }
    }

    #[tokio::test]
    async fn exhausted_retries_are_fatal() {
        let result = generate_unique(|_| future::ready(Ok(true)), MAX_RETRIES).await;
        assert!(matches!(result, Err(AppError::MemberNumberExhausted)));
    }

    #[tokio::test]
    async fn row_not_found_probe_counts_as_success() {
        let number = generate_unique(
            |_| future::ready(Err::<bool, _>(sqlx::Error::RowNotFound)),
            MAX_RETRIES,
        )
        .await
        .unwrap();
        assert!(is_well_formed(&number));
    }
}
