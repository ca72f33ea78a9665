//! Serializable identifiers and small value types shared across the engine.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job priority (higher claims first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work.
    Low,
    /// Default.
    #[default]
    Normal,
    /// Operator-triggered work.
    High,
    /// Must run next.
    Critical,
}

/// Quota-governed resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Generation tokens consumed by the generation service.
    GenerationUnits,
    /// Posts pushed to a publishing destination.
    PublishActions,
}

impl ResourceKind {
    /// All governed resource kinds.
    pub const ALL: [Self; 2] = [Self::GenerationUnits, Self::PublishActions];

    /// Stable snake-case name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GenerationUnits => "generation_units",
            Self::PublishActions => "publish_actions",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

define_id!(
    /// Tenant (billing account) identifier.
    TenantId
);
define_id!(
    /// Agent profile identifier.
    AgentId
);
define_id!(
    /// Schedule identifier.
    ScheduleId
);
define_id!(
    /// Content source identifier.
    SourceId
);
define_id!(
    /// Publishing destination identifier.
    PublisherId
);
define_id!(
    /// Content artifact identifier.
    ArtifactId
);
define_id!(
    /// Job identifier.
    JobId
);
