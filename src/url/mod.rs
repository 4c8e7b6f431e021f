//! URL canonicalization for the frontier
//!
//! Every producer runs URLs through [`normalize_url`] before submitting, so
//! that equivalent spellings collapse to one frontier key ([`url_hash`]) and
//! one politeness bucket ([`extract_host`]).

mod host;
mod normalize;

pub use host::extract_host;
pub use normalize::{normalize_url, url_hash, NormalizeOptions};
