mod base;
pub mod tumblr;

pub use base::{ReplyMessage, Resource, ResourceKind, TimelineSource};
