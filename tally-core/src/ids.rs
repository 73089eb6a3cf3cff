//! Server-assigned identifiers.
//!
//! All ids are opaque integers on the wire. Wrapping them keeps a zone id
//! from being passed where a session id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// One active inventory count. Also the realtime group key.
    SessionId
);
id_type!(
    /// A physical zone whose catalog is being counted.
    ZoneId
);
id_type!(
    /// A catalog item.
    ItemId
);
id_type!(CategoryId);
id_type!(
    /// The condition chosen for a scanned item.
    StateId
);
id_type!(OperatingGroupId);
