//! Gazetteer backends.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use crate::location::GazetteerEntry;
use crate::Result;

mod memory;

pub use memory::MemoryGazetteer;

/// Abstract gazetteer lookup interface.
///
/// Lookups are batched: one call per message, with every surviving surface
/// form in the set. Implementations must be side-effect-free and may be
/// shared across tasks. Surface forms with no entries are simply absent
/// from the result map; an `Err` means a transient backend failure the
/// driver should retry.
#[async_trait]
pub trait Gazetteer: Send + Sync + 'static {
    /// Look up a set of lower-cased surface forms, returning the
    /// candidate entries for each form that is known.
    async fn lookup(
        &self,
        surface_forms: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, Vec<GazetteerEntry>>>;
}
