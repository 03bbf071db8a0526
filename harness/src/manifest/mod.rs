/*!

Manifests are the declarative input of an operator. This module resolves them from their source
(`source`) and decodes the envelope that decides which handler receives them (`entry`).

!*/

mod entry;
mod source;

pub use entry::{ManifestEntry, ManifestKind};
pub use source::{load, split_documents, strip_leading_comments, ManifestSource};
