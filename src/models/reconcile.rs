//! Set reconciliation between two registry snapshots

use crate::models::registry::{ArtifactId, Listing, Selection};

/// Identifiers selected from `source` that `destination` does not know.
///
/// The result is sorted and free of duplicates so that the same pair of
/// snapshots always yields the same work list.
#[must_use]
pub fn missing_from(
    destination: &Listing,
    source: &Listing,
    selection: &Selection,
) -> Vec<ArtifactId> {
    let present = destination.ids();
    source
        .select(selection)
        .into_iter()
        .filter(|id| !present.contains(id))
        .collect()
}
