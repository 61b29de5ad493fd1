//! Data model: ideas, the 3-level topic tree, and typed edges.

mod edge;
mod idea;
mod topic;

pub use edge::{Edge, EdgeType, IdeaRelation, RelationLabel};
pub use idea::{Idea, IdeaId, Stance};
pub use topic::{StanceBucket, Topic, TopicId};
