//! Tests for user value types and the cache snapshot contract.

use super::*;
use rstest::{fixture, rstest};
use serde_json::json;

#[fixture]
fn ada() -> User {
    User::try_from_parts(7, "ada.l", "Ada Lovelace", "ada@example.com", "19151210")
        .expect("valid user")
}

#[rstest]
#[case(0)]
#[case(-3)]
fn user_id_rejects_non_positive_values(#[case] raw: i64) {
    assert_eq!(UserId::new(raw), Err(UserValidationError::InvalidId));
}

#[rstest]
#[case("abc", UserValidationError::UsernameTooShort { min: USERNAME_MIN })]
#[case("abcd", UserValidationError::UsernameTooShort { min: USERNAME_MIN })]
#[case("has space", UserValidationError::UsernameInvalidCharacters)]
#[case(
    "a_very_long_username_that_goes_on_forever",
    UserValidationError::UsernameTooLong { max: USERNAME_MAX }
)]
fn username_validation_rejects(#[case] raw: &str, #[case] expected: UserValidationError) {
    assert_eq!(Username::new(raw), Err(expected));
}

#[rstest]
#[case("alice")]
#[case("  bob_smith  ")]
#[case("carol.d-99")]
fn username_validation_accepts(#[case] raw: &str) {
    let username = Username::new(raw).expect("valid username");
    assert_eq!(username.as_ref(), raw.trim());
}

#[rstest]
#[case("", UserValidationError::EmptyDisplayName)]
#[case("Ann", UserValidationError::DisplayNameTooShort { min: DISPLAY_NAME_MIN })]
#[case("Ann <script>", UserValidationError::DisplayNameInvalidCharacters)]
fn display_name_validation_rejects(#[case] raw: &str, #[case] expected: UserValidationError) {
    assert_eq!(DisplayName::new(raw), Err(expected));
}

#[rstest]
#[case("Zoë O'Brien")]
#[case("Jean-Luc P.")]
fn display_name_accepts_accents_and_punctuation(#[case] raw: &str) {
    assert!(DisplayName::new(raw).is_ok());
}

#[rstest]
#[case("plainaddress")]
#[case("missing@tld")]
#[case("two@@example.com")]
#[case("spaces in@example.com")]
fn email_validation_rejects(#[case] raw: &str) {
    assert_eq!(Email::new(raw), Err(UserValidationError::InvalidEmail));
}

#[rstest]
#[case("1999-01-01", UserValidationError::InvalidDateOfBirth)]
#[case("19990231", UserValidationError::InvalidDateOfBirth)]
#[case("18991231", UserValidationError::DateOfBirthTooEarly { min_year: DATE_OF_BIRTH_MIN_YEAR })]
fn date_of_birth_validation_rejects(#[case] raw: &str, #[case] expected: UserValidationError) {
    assert_eq!(DateOfBirth::parse(raw), Err(expected));
}

#[rstest]
fn date_of_birth_round_trips_compact_form() {
    let dob = DateOfBirth::parse("20000229").expect("leap day");
    assert_eq!(dob.to_string(), "20000229");
}

#[rstest]
fn validation_errors_name_their_field() {
    assert_eq!(UserValidationError::InvalidEmail.field(), "email");
    assert_eq!(
        UserValidationError::UsernameTooShort { min: 5 }.field(),
        "username"
    );
}

#[rstest]
fn snapshot_serialises_without_credentials(ada: User) {
    let value = serde_json::to_value(&ada).expect("serialise user");
    assert_eq!(
        value,
        json!({
            "id": 7,
            "username": "ada.l",
            "displayName": "Ada Lovelace",
            "email": "ada@example.com",
            "dateOfBirth": "19151210"
        })
    );
}

#[rstest]
fn snapshot_deserialisation_revalidates_fields() {
    let result = serde_json::from_value::<User>(json!({
        "id": 7,
        "username": "ab",
        "displayName": "Ada Lovelace",
        "email": "ada@example.com",
        "dateOfBirth": "19151210"
    }));
    assert!(result.is_err());
}

#[rstest]
fn snapshot_deserialisation_rejects_unknown_fields(ada: User) {
    let mut value = serde_json::to_value(&ada).expect("serialise user");
    value["hashedPassword"] = json!("secret");
    assert!(serde_json::from_value::<User>(value).is_err());
}
