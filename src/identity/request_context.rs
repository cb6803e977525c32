use std::collections::HashMap;

use serde_json::Value;

use super::UserId;

/// The one key under which the gate publishes the authenticated user.
pub const IDENTITY_KEY: &str = "userID";

/// Per-request key/value carrier. Lives in the request's extensions, so it is
/// dropped with the request and never shared across requests.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    values: HashMap<&'static str, Value>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("request context key '{key}' is already bound to a different value")]
pub struct AlreadyBound {
    pub key: &'static str,
}

impl RequestContext {
    pub fn new() -> Self { Self::default() }

    /// Bind `key` once. Re-binding the same value is a no-op; a different value is refused.
    pub fn set(&mut self, key: &'static str, value: Value) -> Result<(), AlreadyBound> {
        match self.values.get(key) {
            Some(existing) if *existing == value => Ok(()),
            Some(_) => Err(AlreadyBound { key }),
            None => {
                self.values.insert(key, value);
                Ok(())
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn bind_identity(&mut self, user: UserId) -> Result<(), AlreadyBound> {
        self.set(IDENTITY_KEY, Value::from(user.0))
    }

    pub fn identity(&self) -> Option<UserId> {
        self.get(IDENTITY_KEY).and_then(Value::as_u64).map(UserId)
    }

    pub fn len(&self) -> usize { self.values.len() }
    pub fn is_empty(&self) -> bool { self.values.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_write_once() {
        let mut ctx = RequestContext::new();
        assert_eq!(ctx.identity(), None);
        ctx.bind_identity(UserId(42)).unwrap();
        ctx.bind_identity(UserId(42)).unwrap();
        assert_eq!(ctx.bind_identity(UserId(7)), Err(AlreadyBound { key: IDENTITY_KEY }));
        assert_eq!(ctx.identity(), Some(UserId(42)));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn other_keys_are_independent() {
        let mut ctx = RequestContext::new();
        ctx.set("request_id", Value::from("r-1")).unwrap();
        assert_eq!(ctx.get("request_id"), Some(&Value::from("r-1")));
        assert_eq!(ctx.identity(), None);
    }
}
