//! Generates role passwords when the caller does not supply one.
//!
//! Passwords are drawn from letters and digits only so they can be embedded
//! in SQL literals and argv entries without further escaping.

use rand::Rng;
use rand::distr::Alphanumeric;
use secrecy::SecretString;

/// Length used when no explicit password length is configured.
pub const DEFAULT_PASSWORD_LENGTH: usize = 12;

/// Produces a random alphanumeric password of `length` characters.
///
/// The thread-local generator is seeded from the operating system, so two
/// processes never share a sequence.
///
/// # Examples
/// ```
/// use pg_provision::generate_password;
/// use secrecy::ExposeSecret;
///
/// let password = generate_password(16);
/// assert_eq!(password.expose_secret().len(), 16);
/// assert!(password.expose_secret().chars().all(|c| c.is_ascii_alphanumeric()));
/// ```
#[must_use]
pub fn generate_password(length: usize) -> SecretString {
    let raw: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    SecretString::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use secrecy::ExposeSecret;

    #[rstest]
    #[case(1)]
    #[case(DEFAULT_PASSWORD_LENGTH)]
    #[case(64)]
    fn generated_passwords_have_requested_length(#[case] length: usize) {
        let password = generate_password(length);
        assert_eq!(password.expose_secret().chars().count(), length);
    }

    #[test]
    fn generated_passwords_are_alphanumeric() {
        let password = generate_password(256);
        assert!(
            password
                .expose_secret()
                .chars()
                .all(|c| c.is_ascii_alphanumeric())
        );
    }

    #[test]
    fn consecutive_passwords_differ() {
        let first = generate_password(DEFAULT_PASSWORD_LENGTH);
        let second = generate_password(DEFAULT_PASSWORD_LENGTH);
        assert_ne!(first.expose_secret(), second.expose_secret());
    }
}
