//! jirahub core library: the normalized issue model, the tracker contract,
//! configuration and errors.
//!
//! - [`types`]: issues, comments, link metadata, write payloads
//! - [`tracker`]: the [`IssueSource`] collaborator contract
//! - [`feature`]: [`SyncFeature`] and required permissions
//! - [`config`]: YAML loading, merging, validation
//! - [`error`]: [`ConfigError`], [`TrackerError`]

pub mod config;
pub mod error;
pub mod feature;
pub mod tracker;
pub mod types;

pub use config::{Config, Credentials, GithubConfig, JiraConfig, SideConfig};
pub use error::{ConfigError, TrackerError};
pub use feature::SyncFeature;
pub use tracker::{IssueSource, IssueStream, TrackerResult};
pub use types::{
    Comment, CommentId, CounterpartRef, FieldChanges, Issue, IssueFields, IssueId, IssueRef,
    IssueStatus, LinkMetadata, NewComment, Source, User,
};
