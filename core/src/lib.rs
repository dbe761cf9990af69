//! Synchronous client core for a versioned, library-scoped bibliographic API.
//!
//! # Overview
//! Builds requests from a `ClientConfig`, sends them through a pluggable
//! `Transport`, and normalizes responses into one parsed representation
//! (JSON, Atom/XML, key list or version map). On top of that sit object-model
//! helpers for items, collections, searches, tags and groups, a parser for
//! multi-object write results, and a panicking assertion library for tests.
//!
//! # Design
//! - Two protocol generations are supported. Their differences (default
//!   format, write envelope, auth position) live in one `Dialect` value on
//!   the config; nothing else branches on the version number.
//! - HTTP 4xx/5xx responses are data. Only the typed helpers turn a status
//!   outside their success set into `ApiError::UnexpectedStatus`.
//! - The core never tracks or validates object versions locally. It plumbs
//!   `If-Unmodified-Since-Version` through and reads `Last-Modified-Version`
//!   back.
//! - No retries, no caching, no shared mutable state between calls.

pub mod assertions;
pub mod atom;
pub mod body;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod library;
pub mod objects;
pub mod request;
pub mod response;
pub mod transport;
pub mod write_result;
pub mod xml;

pub use body::{BodyKind, ParsedBody, VersionMap};
pub use client::ApiClient;
pub use config::{AuthMode, ClientConfig, Dialect, EnvelopeStyle, Format, Library};
pub use error::{ApiError, DecodeLayer, Result};
pub use http::{Headers, HttpMethod, HttpRequest, HttpResponse};
pub use library::{GroupSpec, Tag};
pub use objects::{CreateOutcome, ObjectType, ReturnFormat};
pub use request::{Auth, RequestBuilder};
pub use response::Links;
pub use transport::{Transport, UreqTransport};
pub use write_result::{Coverage, MultiObjectWriteResult, WriteFailure, WriteSuccess};
pub use xml::XmlDocument;
