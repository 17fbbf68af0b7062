//! Subject syntax, hierarchical wildcard matching and the publish gate.

use thiserror::Error;

/// Multi-level wildcard; only legal as the final token.
pub const FULL_WILDCARD: &str = ">";
/// Single-token wildcard.
pub const TOKEN_WILDCARD: &str = "*";

/// Why a publish was refused before reaching the broker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("subject cannot be empty")]
    EmptySubject,
    #[error("message cannot be empty")]
    EmptyBody,
    #[error("invalid subject: {0}")]
    InvalidSubject(String),
    #[error("subject does not match stream's subject filter: {allowed}")]
    NotInStream { allowed: String },
}

/// Check subject syntax: non-empty dot-separated tokens drawn from
/// `[A-Za-z0-9_-]`, or a whole-token `*`, or a whole-token `>` in last place.
pub fn is_valid_subject(subject: &str) -> bool {
    if subject.is_empty() {
        return false;
    }
    let tokens: Vec<&str> = subject.split('.').collect();
    let last = tokens.len() - 1;
    tokens.iter().enumerate().all(|(i, token)| match *token {
        "" => false,
        TOKEN_WILDCARD => true,
        FULL_WILDCARD => i == last,
        t => t
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
    })
}

/// True if the subject contains no wildcard tokens.
pub fn is_literal(subject: &str) -> bool {
    subject
        .split('.')
        .all(|t| t != TOKEN_WILDCARD && t != FULL_WILDCARD)
}

/// Standard hierarchical match of `subject` against `pattern`.
///
/// `>` in the pattern swallows one or more remaining tokens, `*` matches
/// exactly one token, anything else must be equal at the same position.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let pattern_tokens: Vec<&str> = pattern.split('.').collect();
    let subject_tokens: Vec<&str> = subject.split('.').collect();

    for (i, pt) in pattern_tokens.iter().enumerate() {
        if *pt == FULL_WILDCARD {
            // must be the final pattern token and must cover at least one token
            return i == pattern_tokens.len() - 1 && subject_tokens.len() > i;
        }
        let Some(st) = subject_tokens.get(i) else {
            return false;
        };
        if *pt != TOKEN_WILDCARD && pt != st {
            return false;
        }
    }

    pattern_tokens.len() == subject_tokens.len()
}

/// True if some subject could match both patterns. Used to check a cursor
/// filter against the stream's subject space.
pub fn subjects_collide(a: &str, b: &str) -> bool {
    let a_tokens: Vec<&str> = a.split('.').collect();
    let b_tokens: Vec<&str> = b.split('.').collect();

    for (ta, tb) in a_tokens.iter().zip(b_tokens.iter()) {
        if *ta == FULL_WILDCARD || *tb == FULL_WILDCARD {
            return true;
        }
        if *ta == TOKEN_WILDCARD || *tb == TOKEN_WILDCARD {
            continue;
        }
        if ta != tb {
            return false;
        }
    }

    // a `>` inside the shared prefix already returned; `>` needs at least
    // one token, so unequal lengths cannot meet
    a_tokens.len() == b_tokens.len()
}

/// True if `subject` is matched by at least one of the stream's patterns.
pub fn is_allowed(stream_subjects: &[String], subject: &str) -> bool {
    stream_subjects
        .iter()
        .any(|pattern| subject_matches(pattern, subject))
}

/// Validate a publish before any broker call is made.
pub fn validate_publish(
    stream_subjects: &[String],
    subject: &str,
    body: &str,
) -> Result<(), Rejection> {
    if subject.is_empty() {
        return Err(Rejection::EmptySubject);
    }
    if body.is_empty() {
        return Err(Rejection::EmptyBody);
    }
    if !is_valid_subject(subject) || !is_literal(subject) {
        return Err(Rejection::InvalidSubject(subject.to_string()));
    }
    if !is_allowed(stream_subjects, subject) {
        return Err(Rejection::NotInStream {
            allowed: stream_subjects.join(", "),
        });
    }
    Ok(())
}
