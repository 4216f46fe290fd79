//! Form field validators with a memoization cache.
//!
//! Rules are fixed. The memo only avoids recomputing a regex match for an
//! input that was already seen, so a cached answer always equals a fresh one.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Mutex;

/// Minimum password length, in characters.
pub const MIN_PASSWORD_LEN: usize = 8;

static EMAIL_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid"));

/// Moroccan numbers: +212 or 0, then a mobile prefix 6 or 7, then 8 ASCII digits.
static PHONE_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"^(?:\+212|0)[67][0-9]{8}$").expect("phone pattern is valid"));

/// A validation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule<'a> {
  Email,
  Phone,
  Password,
  /// Input must equal the given password exactly
  Confirms(&'a str),
}

impl Rule<'_> {
  fn cache_key(&self, input: &str) -> String {
    match self {
      Rule::Email => format!("email:{}", input),
      Rule::Phone => format!("phone:{}", input),
      Rule::Password => format!("password:{}", input),
      // Length prefix keeps "ab"+"c" and "a"+"bc" apart
      Rule::Confirms(password) => format!("confirm:{}:{}{}", password.len(), password, input),
    }
  }

  fn check(&self, input: &str) -> bool {
    match self {
      Rule::Email => is_valid_email(input),
      Rule::Phone => is_valid_phone(input),
      Rule::Password => is_valid_password(input),
      Rule::Confirms(password) => *password == input,
    }
  }
}

pub fn is_valid_email(input: &str) -> bool {
  EMAIL_RE.is_match(input)
}

/// Whitespace anywhere in the number is ignored.
pub fn is_valid_phone(input: &str) -> bool {
  let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
  PHONE_RE.is_match(&compact)
}

pub fn is_valid_password(input: &str) -> bool {
  input.chars().count() >= MIN_PASSWORD_LEN
}

/// Memoizing validator, one per form (or per session).
#[derive(Debug, Default)]
pub struct Validator {
  memo: Mutex<HashMap<String, bool>>,
}

impl Validator {
  pub fn new() -> Self {
    Self::default()
  }

  /// Validate `input` against `rule`, reusing a previous answer when present.
  pub fn validate(&self, rule: Rule<'_>, input: &str) -> bool {
    let key = rule.cache_key(input);

    if let Some(hit) = self.memo.lock().ok().and_then(|m| m.get(&key).copied()) {
      return hit;
    }

    let valid = rule.check(input);
    if let Ok(mut memo) = self.memo.lock() {
      memo.insert(key, valid);
    }
    valid
  }

  pub fn email(&self, input: &str) -> bool {
    self.validate(Rule::Email, input)
  }

  pub fn phone(&self, input: &str) -> bool {
    self.validate(Rule::Phone, input)
  }

  pub fn password(&self, input: &str) -> bool {
    self.validate(Rule::Password, input)
  }

  pub fn confirmation(&self, password: &str, confirmation: &str) -> bool {
    self.validate(Rule::Confirms(password), confirmation)
  }

  /// Drop every memoized answer (e.g. on form reset).
  pub fn clear(&self) {
    if let Ok(mut memo) = self.memo.lock() {
      memo.clear();
    }
  }

  /// Number of memoized answers.
  pub fn len(&self) -> usize {
    self.memo.lock().map(|m| m.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  #[test]
  fn test_phone_numbers() {
    assert!(is_valid_phone("+212612345678"));
    assert!(!is_valid_phone("0512345678"));
    assert!(is_valid_phone("06 12 34 56 78"));
    assert!(is_valid_phone("0712345678"));
    assert!(!is_valid_phone("061234567"));
    assert!(!is_valid_phone("+33612345678"));
    assert!(!is_valid_phone(""));
    assert!(!is_valid_phone("06١٢٣٤٥٦٧٨"));
    assert!(!is_valid_phone("06１２３４５６７８"));
  }

  #[test]
  fn test_emails() {
    assert!(is_valid_email("foo@bar.com"));
    assert!(is_valid_email("first.last+tag@sub.domain.ma"));
    assert!(!is_valid_email("foo@bar"));
    assert!(!is_valid_email("foo bar@baz.com"));
    assert!(!is_valid_email("@bar.com"));
    assert!(!is_valid_email(""));
  }

  #[test]
  fn test_password_length_counts_chars() {
    assert!(is_valid_password("12345678"));
    assert!(!is_valid_password("1234567"));
    assert!(is_valid_password("éééééééé"));
  }

  #[test]
  fn test_confirmation() {
    let v = Validator::new();
    assert!(v.confirmation("secret123", "secret123"));
    assert!(!v.confirmation("secret123", "secret124"));
    assert!(!v.confirmation("secret123", "Secret123"));
  }

  #[test]
  fn test_confirmation_keys_do_not_collide() {
    let v = Validator::new();
    assert!(!v.confirmation("ab", "c"));
    assert!(!v.confirmation("a", "bc"));
    assert!(v.confirmation("abc", "abc"));
    assert_eq!(v.len(), 3);
  }

  #[test]
  fn test_memo_and_clear() {
    let v = Validator::new();
    assert!(v.is_empty());

    assert!(v.email("foo@bar.com"));
    assert!(v.email("foo@bar.com"));
    assert!(v.phone("06 12 34 56 78"));
    assert_eq!(v.len(), 2);

    v.clear();
    assert!(v.is_empty());
    assert!(v.email("foo@bar.com"));
  }

  #[test]
  fn test_kinds_are_keyed_separately() {
    let v = Validator::new();
    assert!(v.password("0612345678"));
    assert!(v.phone("0612345678"));
    assert!(!v.email("0612345678"));
    assert_eq!(v.len(), 3);
  }

  proptest! {
    #[test]
    fn validation_is_idempotent(input in ".{0,40}", kind in 0u8..4) {
      let v = Validator::new();
      let rule = match kind {
        0 => Rule::Email,
        1 => Rule::Phone,
        2 => Rule::Password,
        _ => Rule::Confirms("hunter22"),
      };

      let first = v.validate(rule, &input);
      let second = v.validate(rule, &input);
      v.clear();
      let after_clear = v.validate(rule, &input);

      prop_assert_eq!(first, second);
      prop_assert_eq!(first, after_clear);
      prop_assert_eq!(first, rule.check(&input));
    }
  }
}
