// Release metadata resolution. Two interchangeable strategies turn the
// configured feed URL into (version, asset base URL). Which one is active is
// fixed per agent instance; there is no runtime fallback between them.

use serde::{Deserialize, Serialize};

use crate::error::UpdateError;
use crate::http::{HttpClient, RedirectPolicy};
use crate::version::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionStrategy {
    /// GET the feed URL (redirects followed) and read a JSON body with
    /// `name` (the version) and `html_url` (the canonical release page).
    ReleaseApi,
    /// GET the feed URL with redirects suppressed and take the release page
    /// from the single 302 Location header. Cheaper than the API variant:
    /// no JSON body has to fit in RAM.
    Redirect,
}

/// Result of one resolution. Produced fresh each cycle, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseDescriptor {
    pub version: Version,
    pub asset_base_url: String,
}

impl ReleaseDescriptor {
    pub fn asset_url(&self, asset_name: &str) -> String {
        format!("{}{}", self.asset_base_url, asset_name)
    }
}

#[derive(Deserialize)]
struct ReleaseInfo {
    name: String,
    html_url: String,
}

pub fn resolve(
    client: &mut dyn HttpClient,
    strategy: ResolutionStrategy,
    feed_url: &str,
) -> Result<ReleaseDescriptor, UpdateError> {
    match strategy {
        ResolutionStrategy::ReleaseApi => resolve_via_api(client, feed_url),
        ResolutionStrategy::Redirect => resolve_via_redirect(client, feed_url),
    }
}

fn resolve_via_api(
    client: &mut dyn HttpClient,
    feed_url: &str,
) -> Result<ReleaseDescriptor, UpdateError> {
    let response = client.get(feed_url, RedirectPolicy::Follow)?;
    if !(200..400).contains(&response.status) {
        return Err(UpdateError::HttpStatus {
            url: feed_url.to_string(),
            status: response.status,
        });
    }

    let body = response.read_body()?;
    let info: ReleaseInfo = serde_json::from_slice(&body)
        .map_err(|err| UpdateError::Parse(format!("release feed JSON: {err}")))?;

    let version = Version::parse(&info.name)?;
    let asset_base_url = derive_asset_base_url(&info.html_url)?;
    log::debug!("Resolved via API: {version} at {asset_base_url}");

    Ok(ReleaseDescriptor {
        version,
        asset_base_url,
    })
}

fn resolve_via_redirect(
    client: &mut dyn HttpClient,
    feed_url: &str,
) -> Result<ReleaseDescriptor, UpdateError> {
    let response = client.get(feed_url, RedirectPolicy::Stop)?;
    if response.status != 302 {
        return Err(UpdateError::HttpStatus {
            url: feed_url.to_string(),
            status: response.status,
        });
    }

    let location = response
        .location
        .clone()
        .ok_or_else(|| UpdateError::Parse("302 without Location header".to_string()))?;
    drop(response);

    let tag = location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| UpdateError::Parse(format!("no tag segment in '{location}'")))?;
    let version = Version::parse(tag)?;
    let asset_base_url = derive_asset_base_url(&location)?;
    log::debug!("Resolved via redirect: {version} at {asset_base_url}");

    Ok(ReleaseDescriptor {
        version,
        asset_base_url,
    })
}

/// `https://host/releases/tag/1.4.0` -> `https://host/releases/download/1.4.0/`.
/// Only the `tag` path segment is rewritten, not arbitrary substrings.
fn derive_asset_base_url(release_page_url: &str) -> Result<String, UpdateError> {
    let url = release_page_url.trim_end_matches('/');
    if !url.contains("/tag/") {
        return Err(UpdateError::Parse(format!(
            "release page URL has no /tag/ segment: '{release_page_url}'"
        )));
    }
    Ok(format!("{}/", url.replacen("/tag/", "/download/", 1)))
}
