use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use semver::Version;
use serde::Deserialize;

const RELEASES_URL: &str = "https://api.github.com/repos/reelix-tui/reelix/releases";
const RELEASES_PAGE: u32 = 10;

pub const SKIP_UPDATE_ENV: &str = "REELIX_SKIP_UPDATE_CHECK";

#[derive(Debug, Clone)]
pub struct UpdateInfo {
    pub version: Version,
    pub release_url: String,
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    html_url: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
}

/// Looks at the most recent releases and reports the newest stable one
/// ahead of `current`. Scanning a page instead of `/latest` means a
/// prerelease at the top of the list cannot mask a stable update below
/// it.
pub fn check_for_update(current: &Version) -> Result<Option<UpdateInfo>> {
    let client = Client::builder()
        .timeout(Duration::from_secs(8))
        .user_agent(format!(
            "reelix/{version} (update-check)",
            version = crate::VERSION
        ))
        .build()
        .context("build update HTTP client")?;

    let response = client
        .get(RELEASES_URL)
        .query(&[("per_page", RELEASES_PAGE)])
        .header("Accept", "application/vnd.github+json")
        .send()
        .context("request release metadata")?;

    match response.status() {
        StatusCode::NOT_FOUND => return Ok(None),
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            bail!("rate limited by GitHub while checking for updates")
        }
        status if !status.is_success() => {
            bail!("update check failed with status {status}")
        }
        _ => {}
    }

    let releases: Vec<Release> = response
        .json()
        .context("decode release list from GitHub")?;
    Ok(newest_stable(&releases, current))
}

/// Unparseable tags are skipped rather than failing the whole check;
/// repos accumulate odd tags over time.
fn newest_stable(releases: &[Release], current: &Version) -> Option<UpdateInfo> {
    releases
        .iter()
        .filter(|release| !release.draft && !release.prerelease)
        .filter_map(|release| {
            let version = parse_tag(&release.tag_name)?;
            Some(UpdateInfo {
                version,
                release_url: release.html_url.clone(),
            })
        })
        .filter(|info| &info.version > current)
        .max_by(|a, b| a.version.cmp(&b.version))
}

fn parse_tag(tag: &str) -> Option<Version> {
    let tag = tag.trim();
    let normalized = tag
        .strip_prefix('v')
        .or_else(|| tag.strip_prefix('V'))
        .unwrap_or(tag);
    Version::parse(normalized).ok()
}
