//! Built-in capability provider.
//!
//! Implements a subset of the catalog directly on `image` and `imageproc`.
//! Catalog names outside this subset are reported as unsupported.

pub mod geometric;
mod params;
pub mod pixel;

use super::{ProviderRegistry, Transform};

/// Register every built-in transform.
pub fn register_all(registry: &mut ProviderRegistry) {
    geometric::register(registry);
    pixel::register(registry);
}

fn boxed<T: Transform + 'static>(transform: T) -> Box<dyn Transform> {
    Box::new(transform)
}
