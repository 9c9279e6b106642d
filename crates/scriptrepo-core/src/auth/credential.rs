use std::fmt;
use std::str::FromStr;

use super::AuthenticationError;

/// A single session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Format as a `Cookie` request header value (`name=value`).
    pub fn header_value(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// The set of cookies making up an authenticated repository session.
///
/// Names are unique. Insertion order is kept so a parsed cookie string
/// serializes back to exactly the same text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    cookies: Vec<Cookie>,
}

impl Credential {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }

    /// Insert or replace a cookie. A replaced cookie keeps its position.
    pub fn insert(&mut self, cookie: Cookie) {
        match self.cookies.iter_mut().find(|c| c.name == cookie.name) {
            Some(existing) => existing.value = cookie.value,
            None => self.cookies.push(cookie),
        }
    }
}

impl FromStr for Credential {
    type Err = AuthenticationError;

    /// Parse the `name1:value1;name2:value2` form emitted by the login step.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut credential = Credential::default();
        for pair in s.split(';').filter(|p| !p.is_empty()) {
            // Values may themselves contain ':' so only the first one splits
            let (name, value) = pair
                .split_once(':')
                .ok_or_else(|| AuthenticationError::MalformedCookies(pair.to_string()))?;
            if name.is_empty() {
                return Err(AuthenticationError::MalformedCookies(pair.to_string()));
            }
            credential.insert(Cookie::new(name, value));
        }
        Ok(credential)
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, cookie) in self.cookies.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{}:{}", cookie.name, cookie.value)?;
        }
        Ok(())
    }
}
