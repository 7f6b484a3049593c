//! Opaque cursor tokens.
//!
//! A cursor is serialised as URL-safe base64 (no padding) over a compact JSON
//! object. Bare decimal scores are also accepted when decoding so that simple
//! clients can page by timestamp alone.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// Errors raised while decoding a cursor token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CursorError {
    /// The token was empty or only whitespace.
    #[error("cursor token is empty")]
    Empty,
    /// The token was not valid URL-safe base64.
    #[error("cursor token is not valid base64: {0}")]
    Encoding(String),
    /// The decoded bytes were not a valid cursor payload.
    #[error("cursor token payload is malformed: {0}")]
    Payload(String),
}

/// Position of the last item seen by a caller.
///
/// Items are admitted after the cursor when their score is strictly lower
/// than [`Cursor::score`], or when the score is equal and the cursor carries
/// a tie key lower than the item's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor {
    #[serde(rename = "s")]
    score: i64,
    #[serde(rename = "k", default, skip_serializing_if = "Option::is_none")]
    tie_key: Option<i64>,
}

impl Cursor {
    /// Cursor admitting every item with a score strictly below `score`.
    ///
    /// # Examples
    ///
    /// ```
    /// use pagination::Cursor;
    ///
    /// let cursor = Cursor::before(200);
    /// assert!(cursor.admits(199, 1));
    /// assert!(!cursor.admits(200, 1));
    /// ```
    #[must_use]
    pub const fn before(score: i64) -> Self {
        Self {
            score,
            tie_key: None,
        }
    }

    /// Cursor positioned exactly on an item, so equal-score items with a
    /// greater key are still admitted.
    #[must_use]
    pub const fn after_item(score: i64, tie_key: i64) -> Self {
        Self {
            score,
            tie_key: Some(tie_key),
        }
    }

    /// Score of the last item seen.
    #[must_use]
    pub const fn score(&self) -> i64 {
        self.score
    }

    /// Tie-break key of the last item seen, when recorded.
    #[must_use]
    pub const fn tie_key(&self) -> Option<i64> {
        self.tie_key
    }

    /// Whether an item with `score` and `key` sorts strictly after this
    /// cursor in newest-first order.
    #[must_use]
    pub const fn admits(&self, score: i64, key: i64) -> bool {
        if score < self.score {
            return true;
        }
        match self.tie_key {
            Some(last_key) => score == self.score && key > last_key,
            None => false,
        }
    }

    /// Encode the cursor as an opaque, URL-safe token.
    #[must_use]
    pub fn encode(&self) -> String {
        // Serialising two integers into JSON cannot fail.
        let payload = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(payload)
    }

    /// Decode a token produced by [`Cursor::encode`], or a bare decimal score.
    ///
    /// # Errors
    ///
    /// Returns [`CursorError`] when the token is empty, is not valid base64,
    /// or does not carry a cursor payload.
    ///
    /// # Examples
    ///
    /// ```
    /// use pagination::Cursor;
    ///
    /// let cursor = Cursor::after_item(1_700_000_000, 42);
    /// let decoded = Cursor::decode(&cursor.encode()).expect("token decodes");
    /// assert_eq!(decoded, cursor);
    ///
    /// let bare = Cursor::decode("1700000000").expect("bare score decodes");
    /// assert_eq!(bare, Cursor::before(1_700_000_000));
    /// ```
    pub fn decode(token: &str) -> Result<Self, CursorError> {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(CursorError::Empty);
        }
        if let Ok(score) = trimmed.parse::<i64>() {
            return Ok(Self::before(score));
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(trimmed)
            .map_err(|err| CursorError::Encoding(err.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|err| CursorError::Payload(err.to_string()))
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

impl std::str::FromStr for Cursor {
    type Err = CursorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}
