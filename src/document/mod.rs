//! Document subsystem: LaTeX projects, anchor reconciliation, and comments.
//!
//! - `sections`: resolve a section name to the file that holds it
//! - `anchor`: exact-then-fuzzy placement of a quote in a file
//! - `latex`: flatten a project into its full source
//! - `comments`: anchor critiques and persist them as editor comments

pub mod anchor;
pub mod comments;
pub mod errors;
pub mod latex;
pub mod sections;
pub mod store;
pub mod types;

pub use anchor::{doc_sha1, AnchorMatcher};
pub use comments::{CommentStore, ReverseCommentService};
pub use errors::DocumentError;
pub use latex::latexpand;
pub use sections::find_target_doc;
pub use store::{InMemoryProjectStore, ProjectStore};
pub use types::{
    AnchorMatch, CommentRecord, CommentStatus, Critique, CritiqueBatch, OverleafComment, Project,
    ProjectCategory, ProjectDoc,
};
