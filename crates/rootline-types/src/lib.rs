//! Shared identity, person, and operation types for rootline.
//!
//! This crate is the leaf of the workspace: typed IDs, the person model,
//! mutation intents and their logged form, snapshots, activity entries, and
//! the injectable clock. It has **no internal rootline dependencies**.
//!
//! # Model Overview
//!
//! ```text
//! Tree (TreeId)
//!     └── Operation log: Operation { version_seq, kind, payload } ...
//!     └── Snapshot { version, people: [PersonRow], relationships: [RelationshipRow] }
//!
//! Person (PersonId)
//!     └── PersonDetails (scalars, UPDATE_PROP target)
//!     └── parents / children / spouses (symmetric sets, structural ops only)
//!
//! Actor (ActorId) ← collaborator
//!     └── authors ActivityEntry for each confirmed push
//! ```
//!
//! # Key Types
//!
//! |--------------------|----------------------------------------------------|
//! | Type               | Purpose                                            |
//! |--------------------|----------------------------------------------------|
//! | [`Person`]         | A node of the family graph                         |
//! | [`PersonPatch`]    | Field-level partial update (last write wins)       |
//! | [`PartialDate`]    | `YYYY`, `YYYY-MM` or `YYYY-MM-DD`                  |
//! | [`RelationKind`]   | parent / child / spouse, read from the focus side  |
//! | [`Mutation`]       | Typed intent produced by the graph store           |
//! | [`Operation`]      | Logged, server-versioned form of a mutation        |
//! | [`Snapshot`]       | Materialized tables as of a log version            |
//! | [`ActivityEntry`]  | Human-readable audit record                        |
//! | [`Clock`]          | Injectable time source                             |
//! |--------------------|----------------------------------------------------|

pub mod activity;
pub mod clock;
pub mod date;
pub mod ids;
pub mod op;
pub mod person;
pub mod relation;
pub mod snapshot;

pub use activity::{ActivityEntry, ActivityQuery, DEFAULT_PAGE_SIZE};
pub use clock::{Clock, ManualClock, SystemClock};
pub use date::{DateError, PartialDate};
pub use ids::{ActorId, PersonId, TreeId};
pub use op::{
    AddNodePayload, AddRelationPayload, DeleteNodePayload, DeleteRelationPayload, Mutation,
    NewOperation, OpKind, Operation, PayloadError, UpdatePropPayload,
};
pub use person::{DetailsError, FieldUpdate, Gender, Person, PersonDetails, PersonPatch};
pub use relation::{LinkKind, RelationKind, RelationshipRow};
pub use snapshot::{PersonRow, Snapshot};

/// Current time as Unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
