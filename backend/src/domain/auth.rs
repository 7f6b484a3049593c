//! Authentication primitives: passwords, credentials, and sign-up requests.
//!
//! Keep inbound payload parsing outside the domain by exposing constructors
//! that validate string inputs before a caller talks to a service.

use std::fmt;

use zeroize::Zeroizing;

use super::user::{DateOfBirth, DisplayName, Email, User, UserProfile, UserValidationError, Username};

/// Minimum allowed password length in characters.
pub const PASSWORD_MIN: usize = 8;
/// Maximum allowed password length in characters.
pub const PASSWORD_MAX: usize = 128;

/// Domain error returned when login payload values are invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginValidationError {
    /// Username was missing or blank once trimmed.
    EmptyUsername,
    /// Password was blank.
    EmptyPassword,
}

impl fmt::Display for LoginValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyUsername => write!(f, "username must not be empty"),
            Self::EmptyPassword => write!(f, "password must not be empty"),
        }
    }
}

impl std::error::Error for LoginValidationError {}

/// Validated login credentials used by authentication services.
///
/// ## Invariants
/// - `username` is trimmed and must not be empty after trimming.
/// - `password` is required to be non-empty but retains caller-provided
///   whitespace to avoid surprising credential comparisons.
///
/// # Examples
/// ```
/// use newsfeed::domain::LoginCredentials;
///
/// let creds = LoginCredentials::try_from_parts("admin", "password").unwrap();
/// assert_eq!(creds.username(), "admin");
/// assert_eq!(creds.password(), "password");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginCredentials {
    username: String,
    password: Zeroizing<String>,
}

impl LoginCredentials {
    /// Construct credentials from raw username/password inputs.
    pub fn try_from_parts(username: &str, password: &str) -> Result<Self, LoginValidationError> {
        let normalized = username.trim();
        if normalized.is_empty() {
            return Err(LoginValidationError::EmptyUsername);
        }

        if password.is_empty() {
            return Err(LoginValidationError::EmptyPassword);
        }

        Ok(Self {
            username: normalized.to_owned(),
            password: Zeroizing::new(password.to_owned()),
        })
    }

    /// Username string suitable for user lookups.
    pub fn username(&self) -> &str {
        self.username.as_str()
    }

    /// Password string provided by the caller.
    pub fn password(&self) -> &str {
        self.password.as_str()
    }
}

/// Plaintext password accepted at sign-up, wiped from memory on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(Zeroizing<String>);

impl Password {
    /// Validate password length.
    pub fn new(raw: &str) -> Result<Self, SignUpValidationError> {
        let length = raw.chars().count();
        if length < PASSWORD_MIN {
            return Err(SignUpValidationError::PasswordTooShort { min: PASSWORD_MIN });
        }
        if length > PASSWORD_MAX {
            return Err(SignUpValidationError::PasswordTooLong { max: PASSWORD_MAX });
        }
        Ok(Self(Zeroizing::new(raw.to_owned())))
    }

    /// Borrow the plaintext for hashing.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

/// Opaque one-way credential hash, such as a PHC string.
#[derive(Clone, PartialEq, Eq)]
pub struct HashedCredential(String);

impl HashedCredential {
    /// Wrap an encoded hash produced by a credential hasher or read from
    /// the store.
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Encoded hash string.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for HashedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HashedCredential(<redacted>)")
    }
}

/// Stored user together with the credential hash used at log-in.
///
/// Only the store returns this record; caches hold [`User`] snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    /// Public profile.
    pub user: User,
    /// Password hash checked at log-in.
    pub credential: HashedCredential,
}

/// Validation failures for a sign-up request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpValidationError {
    /// A profile field failed validation.
    Profile(UserValidationError),
    /// Password shorter than [`PASSWORD_MIN`].
    PasswordTooShort { min: usize },
    /// Password longer than [`PASSWORD_MAX`].
    PasswordTooLong { max: usize },
}

impl SignUpValidationError {
    /// Name of the request field that failed validation.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Profile(inner) => inner.field(),
            Self::PasswordTooShort { .. } | Self::PasswordTooLong { .. } => "password",
        }
    }
}

impl fmt::Display for SignUpValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Profile(inner) => inner.fmt(f),
            Self::PasswordTooShort { min } => {
                write!(f, "password must be at least {min} characters")
            }
            Self::PasswordTooLong { max } => {
                write!(f, "password must be at most {max} characters")
            }
        }
    }
}

impl std::error::Error for SignUpValidationError {}

impl From<UserValidationError> for SignUpValidationError {
    fn from(value: UserValidationError) -> Self {
        Self::Profile(value)
    }
}

/// Validated request to create an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUpRequest {
    profile: UserProfile,
    password: Password,
}

impl SignUpRequest {
    /// Validate raw sign-up inputs, reporting the first failing field.
    ///
    /// # Examples
    /// ```
    /// use newsfeed::domain::SignUpRequest;
    ///
    /// let request = SignUpRequest::try_from_parts(
    ///     "alice", "Alice Liddell", "alice@example.com", "19900101", "wonderland",
    /// ).unwrap();
    /// assert_eq!(request.profile().username.as_ref(), "alice");
    ///
    /// let err = SignUpRequest::try_from_parts(
    ///     "al", "Alice Liddell", "alice@example.com", "19900101", "wonderland",
    /// ).unwrap_err();
    /// assert_eq!(err.field(), "username");
    /// ```
    pub fn try_from_parts(
        username: &str,
        display_name: &str,
        email: &str,
        date_of_birth: &str,
        password: &str,
    ) -> Result<Self, SignUpValidationError> {
        let profile = UserProfile {
            username: Username::new(username)?,
            display_name: DisplayName::new(display_name)?,
            email: Email::new(email)?,
            date_of_birth: DateOfBirth::parse(date_of_birth)?,
        };
        Ok(Self {
            profile,
            password: Password::new(password)?,
        })
    }

    /// Validated profile fields.
    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    /// Validated plaintext password.
    pub fn password(&self) -> &Password {
        &self.password
    }
}
