//! Infrastructure backends for job storage and domain repositories.

pub mod queue;
pub mod repository;

pub use queue::InMemoryJobStore;
pub use repository::{
    InMemoryAgentRepository, InMemoryArtifactRepository, InMemoryPublisherRepository,
    InMemoryScheduleRepository, InMemorySourceRepository,
};
