//! # fedline-types
//!
//! Data model for the fedline session and timeline sync engine.
//!
//! This crate provides the foundational types used across all fedline crates:
//! - [`Did`], [`Handle`], [`ContentId`], [`Cursor`], [`TimelineKey`] - Identity and paging types
//! - [`Profile`], [`Post`], [`ListRecord`], [`Message`], [`MutedWordPreference`] - Cached entities
//! - [`Session`], [`Secret`], [`SessionTokens`] - Authenticated session variants
//! - [`AuthorizationRequest`] - PKCE pushed-authorization descriptor
//! - [`Encoding`] - Compact (durable) and schemaless (fixture) codecs

#![warn(missing_docs)]
#![warn(clippy::all)]

mod auth;
mod codec;
mod error;
mod ids;
mod models;
mod session;

pub use auth::{AuthorizationRequest, OAuthLaunch, CODE_CHALLENGE_METHOD, RESPONSE_TYPE};
pub use codec::{decode, encode, Encoding};
pub use error::{CodecError, IdError};
pub use ids::{ContentId, Cursor, Did, Handle, TimelineKey, UNKNOWN_PROFILE_DID};
pub use models::{
    FeedPage, FeedPost, ListPurpose, ListRecord, Message, MutedWordActorTarget,
    MutedWordPreference, MutedWordTarget, Post, PostView, Profile, ProfileRef,
};
pub use session::{Secret, Session, SessionKind, SessionTokens};
