//! HTTP collaborators: the live inventory client, its fallback, and the
//! identity provider client.

pub mod identity;
pub mod inventory;

pub use identity::HttpIdentityProvider;
pub use inventory::{HttpInventoryClient, InventoryFallback};

use anyhow::Context as _;
use reqwest::Url;

/// Parse a base URL that path segments can be appended to.
fn parse_base_url(base_url: &str) -> anyhow::Result<Url> {
    let url = Url::parse(base_url).with_context(|| format!("invalid base url `{base_url}`"))?;
    if url.cannot_be_a_base() {
        anyhow::bail!("base url `{base_url}` cannot have path segments");
    }
    Ok(url)
}

/// Append path segments to a base URL parsed by [`parse_base_url`].
fn join_segments(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}
