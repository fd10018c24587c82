//! URL handling for Shelf-Crawler
//!
//! Canonical URLs are the identity of categories and products: two links that
//! canonicalize to the same string are the same listing or the same item.

mod domain;
mod normalize;

pub use domain::{extract_domain, host_of, is_valid_domain, same_origin};
pub use normalize::{canonicalize_url, resolve_link};
