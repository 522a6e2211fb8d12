//! Field validators run before any statement reaches the database.
//!
//! Each validator takes the raw caller input and returns the typed value the
//! store binds, or a `ValidationError` naming the field.

use lazy_static::lazy_static;
use phonenumber::metadata::DATABASE;
use regex::Regex;
use uuid::Uuid;
use validator::ValidateEmail;

use crate::error::{Field, ValidationError};
use crate::users::repo_types::Role;

/// Length of a hyphenated UUID. Braced, URN and simple forms are rejected.
const HYPHENATED_UUID_LEN: usize = 36;

const MAX_EMAIL_LEN: usize = 254;
const MAX_PHONE_LEN: usize = 15;

lazy_static! {
    // Letters for IDN top-level domains, or their punycode form.
    static ref TLD_RE: Regex = Regex::new(r"(?i)^(?:\p{L}{2,63}|xn--[a-z0-9-]{1,59})$").unwrap();
    // Strict mode: leading '+', then digits with optional space, dash, dot or parens.
    static ref PHONE_CHARS_RE: Regex = Regex::new(r"^\+[0-9][0-9 ().-]*[0-9]$").unwrap();
    static ref ARGON2I_RE: Regex = Regex::new(
        r"^\$argon2i\$v=19\$m=4096,t=3,p=1\$[A-Za-z0-9+/]{22}\$[A-Za-z0-9+/]{43}$"
    )
    .unwrap();
}

fn required(field: Field, value: &str) -> Result<&str, ValidationError> {
    if value.is_empty() {
        Err(ValidationError::missing(field))
    } else {
        Ok(value)
    }
}

pub fn validate_id(id: &str) -> Result<Uuid, ValidationError> {
    let id = required(Field::Id, id)?;
    if id.len() != HYPHENATED_UUID_LEN {
        return Err(ValidationError::malformed(Field::Id));
    }
    Uuid::try_parse(id).map_err(|_| ValidationError::malformed(Field::Id))
}

pub fn validate_email(email: &str) -> Result<&str, ValidationError> {
    let email = required(Field::Email, email)?;
    if is_valid_email(email) {
        Ok(email)
    } else {
        Err(ValidationError::malformed(Field::Email))
    }
}

/// Accepts international numbers that the dialling plan of their country
/// code assigns to mobile lines.
pub fn validate_phone(phone: &str) -> Result<&str, ValidationError> {
    let phone = required(Field::Phone, phone)?;
    if phone.len() > MAX_PHONE_LEN || !PHONE_CHARS_RE.is_match(phone) {
        return Err(ValidationError::malformed(Field::Phone));
    }
    let number =
        phonenumber::parse(None, phone).map_err(|_| ValidationError::malformed(Field::Phone))?;
    if !number.is_valid() {
        return Err(ValidationError::malformed(Field::Phone));
    }
    match number.number_type(&DATABASE) {
        phonenumber::Type::Mobile | phonenumber::Type::FixedLineOrMobile => Ok(phone),
        _ => Err(ValidationError::malformed(Field::Phone)),
    }
}

/// Checks the encoded Argon2i hash shape. The hash itself is never recomputed.
pub fn validate_password_hash(password: &str) -> Result<&str, ValidationError> {
    let password = required(Field::Password, password)?;
    if ARGON2I_RE.is_match(password) {
        Ok(password)
    } else {
        Err(ValidationError::malformed(Field::Password))
    }
}

pub fn validate_role(role: &str) -> Result<Role, ValidationError> {
    let role = required(Field::Role, role)?;
    role.parse()
        .map_err(|_| ValidationError::malformed(Field::Role))
}

fn is_valid_email(email: &str) -> bool {
    // Local part charset, label syntax and IDN domains are checked by `validator`.
    if email.len() > MAX_EMAIL_LEN || !email.validate_email() {
        return false;
    }
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };
    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return false;
    }
    domain
        .rsplit_once('.')
        .is_some_and(|(_, tld)| TLD_RE.is_match(tld))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Reason;
    use argon2::{
        password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
        Algorithm, Argon2, Params, Version,
    };

    const HASH: &str = "$argon2i$v=19$m=4096,t=3,p=1$3N0us+jqJpt823mgfD9YVA$dPs2u8gHPeujO5QV9Rk5BrHaE7eGDgU/HUPDQE78L0M";

    #[test]
    fn accepts_hyphenated_uuid_in_any_case() {
        let id = validate_id("9b6c8b3b-a1ae-463b-92af-be572cff5a28").unwrap();
        let upper = validate_id("9B6C8B3B-A1AE-463B-92AF-BE572CFF5A28").unwrap();
        assert_eq!(id, upper);
    }

    #[test]
    fn rejects_bad_uuids() {
        assert_eq!(validate_id("").unwrap_err().reason, Reason::Missing);
        for bad in [
            "xyz",
            "9b6c8b3ba1ae463b92afbe572cff5a28",
            "{9b6c8b3b-a1ae-463b-92af-be572cff5a28}",
            "9b6c8b3b-a1ae-463b-92af-be572cff5a2g",
        ] {
            let err = validate_id(bad).unwrap_err();
            assert_eq!(err.field, Field::Id, "{bad}");
            assert_eq!(err.reason, Reason::Malformed, "{bad}");
        }
    }

    #[test]
    fn email_shapes() {
        for ok in [
            "a@b.com",
            "yousif@almudhaf.com",
            "first.last+tag@mail.example.org",
            "user@example.xn--p1ai",
            "user@пример.рф",
        ] {
            assert!(validate_email(ok).is_ok(), "{ok}");
        }
        for bad in [
            "not-an-email",
            "a@b",
            "@b.com",
            "a@.com",
            ".a@b.com",
            "a..b@c.com",
            "a b@c.com",
            "a@b.c",
            "a@b.123",
            "a@-b.com",
        ] {
            assert_eq!(
                validate_email(bad).unwrap_err(),
                ValidationError::malformed(Field::Email),
                "{bad}"
            );
        }
        assert_eq!(validate_email("").unwrap_err().reason, Reason::Missing);
    }

    #[test]
    fn phone_requires_strict_international_mobile_number() {
        for ok in [
            "+96555968743",
            "+96555566872",
            "+14155552671",
            "+1 415-555-2671",
            "+447911123456",
        ] {
            assert!(validate_phone(ok).is_ok(), "{ok}");
        }
        for bad in [
            "123",
            "96555968743",
            "+0555968743",
            "+1234",
            "+1000000",
            "+999999999999999",
            "+442071838750",
            "+1 800 FLOWERS",
        ] {
            assert_eq!(
                validate_phone(bad).unwrap_err(),
                ValidationError::malformed(Field::Phone),
                "{bad}"
            );
        }
    }

    #[test]
    fn password_must_be_argon2i_shape() {
        assert_eq!(HASH.len(), 95);
        assert!(validate_password_hash(HASH).is_ok());

        let argon2id = HASH.replacen("argon2i", "argon2id", 1);
        let other_cost = HASH.replacen("t=3", "t=2", 1);
        let short_digest = &HASH[..HASH.len() - 1];
        for bad in ["plaintext", argon2id.as_str(), other_cost.as_str(), short_digest] {
            assert_eq!(
                validate_password_hash(bad).unwrap_err(),
                ValidationError::malformed(Field::Password)
            );
        }
    }

    #[test]
    fn generated_argon2i_hash_passes() {
        let params = Params::new(4096, 3, 1, None).unwrap();
        let argon2 = Argon2::new(Algorithm::Argon2i, Version::V0x13, params);
        let salt = SaltString::generate(&mut OsRng);
        let hash = argon2
            .hash_password(b"correct-horse-battery-staple", &salt)
            .unwrap()
            .to_string();
        assert!(validate_password_hash(&hash).is_ok(), "{hash}");
    }

    #[test]
    fn role_must_be_known() {
        assert_eq!(validate_role("vip").unwrap(), Role::Vip);
        assert_eq!(validate_role("").unwrap_err().reason, Reason::Missing);
        assert_eq!(
            validate_role("superuser").unwrap_err(),
            ValidationError::malformed(Field::Role)
        );
        assert!(validate_role("Admin").is_err());
    }
}
