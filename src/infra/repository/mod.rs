//! Repository backends.

pub mod memory;

pub use memory::{
    InMemoryAgentRepository, InMemoryArtifactRepository, InMemoryPublisherRepository,
    InMemoryScheduleRepository, InMemorySourceRepository,
};
