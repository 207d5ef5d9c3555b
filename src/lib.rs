//! Windowed geoparser for short social-media messages.
//!
//! Messages flow through a normalizer and n-gram generator, get matched
//! against a gazetteer, and every candidate location is annotated with
//! metadata evidence (coordinates, bounding box, UTC offset, the user's
//! declared home, co-mentioned kin locations). A sliding time window
//! aggregates that evidence across messages and resolves each surface form
//! to a single gazetteer entry.
//!
//! ```text
//! Message → normalize → n-grams → gazetteer → score → window cache
//!                                                          │
//!                                  commit sink ← resolver ←┘ (per timestep)
//! ```
//!
//! External collaborators (the gazetteer index, the message store and the
//! commit sink) are async traits; everything in between is synchronous
//! code awaited between I/O points.

pub use anyhow::Result;

pub mod config;
pub mod dedup;
pub mod driver;
pub mod errors;
pub mod family;
pub mod gazetteer;
pub mod geometry;
pub mod location;
pub mod message;
pub mod normalize;
pub mod reference;
pub mod resolver;
pub mod scorer;
pub mod sink;
pub mod store;
pub mod timezones;
pub mod tokenize;
pub mod user_home;
pub mod window;

pub use crate::config::Config;
pub use crate::driver::Driver;
pub use crate::errors::GeotagError;
pub use crate::message::{Message, MessageId, ResolvedLocation, ScoredMessage};
