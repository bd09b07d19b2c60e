//! Opaque string identifiers shared across the runner.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(RunnerId);
string_id!(JobId);
string_id!(RegistrationToken);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runner_id_roundtrips_through_string() {
        let id = RunnerId::new("runner-123");
        assert_eq!(id.as_str(), "runner-123");
        assert_eq!(id.to_string(), "runner-123");
    }

    #[test]
    fn empty_job_id_reports_empty() {
        assert!(JobId::default().is_empty());
        assert!(!JobId::new("j1").is_empty());
    }
}
