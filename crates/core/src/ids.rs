//! Newtype identifiers used throughout the mesh.
//!
//! Unlike the generated, fixed-prefix IDs common in request/job-tracking
//! systems, every ID here is supplied by the caller (an operator names their
//! actors, classes and connections) — so these wrappers skip ID generation
//! entirely and just give each string its own type at the API boundary.

use std::borrow::Borrow;
use std::fmt;

macro_rules! define_str_id {
    ($(#[$meta:meta])* pub struct $name:ident;) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

define_str_id! {
    /// Unique identifier of an actor, e.g. `"nsc-1"` or `"nsmgr-master"`.
    pub struct ActorId;
}

define_str_id! {
    /// Role tag used for hop discovery, e.g. `"nsc"`, `"nsmgr"`, `"nse"`.
    pub struct ClassName;
}

define_str_id! {
    /// Identifier of the node (host) an actor runs on. Informational only.
    pub struct NodeId;
}

define_str_id! {
    /// Identifier of an end-to-end connection, shared across every actor in its chain.
    pub struct ConnId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_roundtrips_the_inner_string() {
        let id = ActorId::new("nsc-1");
        assert_eq!(id.to_string(), "nsc-1");
        assert_eq!(id, "nsc-1");
    }

    #[test]
    fn hashmap_lookup_by_str_borrow() {
        use std::collections::HashMap;
        let mut map: HashMap<ActorId, u32> = HashMap::new();
        map.insert(ActorId::new("nsc-1"), 1);
        assert_eq!(map.get("nsc-1"), Some(&1));
    }
}
