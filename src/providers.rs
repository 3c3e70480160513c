use std::collections::BTreeMap;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use kube::ResourceExt;

use crate::resources::hostedclusters::HostedCluster;
use crate::{Error, Result};

/// Resolves the machine image workers of a cluster boot from
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn image(&self, cluster: &HostedCluster) -> Result<String>;
}

/// Resolves release metadata for a release image pull spec
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReleaseProvider: Send + Sync {
    async fn lookup(&self, image: &str) -> Result<ReleaseImage>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseImage {
    pub image: String,
    version: String,
}

impl ReleaseImage {
    pub fn new(image: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            version: version.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

/// AMIs configured up front, keyed by AWS region
#[derive(Clone, Debug, Default)]
pub struct StaticImageProvider {
    default: Option<String>,
    by_region: BTreeMap<String, String>,
}

impl StaticImageProvider {
    pub fn new(default: Option<String>, by_region: BTreeMap<String, String>) -> Self {
        Self { default, by_region }
    }

    /// Parse `region=ami` pairs
    pub fn parse_region_amis<I, T>(pairs: I) -> std::result::Result<BTreeMap<String, String>, String>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        pairs
            .into_iter()
            .map(|pair| {
                let pair = pair.as_ref();
                match pair.split_once('=') {
                    Some((region, ami)) if !region.is_empty() && !ami.is_empty() => {
                        Ok((region.trim().to_owned(), ami.trim().to_owned()))
                    }
                    _ => Err(format!("expected region=ami, got {pair:?}")),
                }
            })
            .collect()
    }
}

#[async_trait]
impl ImageProvider for StaticImageProvider {
    async fn image(&self, cluster: &HostedCluster) -> Result<String> {
        let region = cluster.aws_region();
        region
            .and_then(|region| self.by_region.get(region))
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| {
                Error::ImageLookup(format!(
                    "no AMI configured for HostedCluster {} in region {}",
                    cluster.name_any(),
                    region.unwrap_or("<unset>")
                ))
            })
    }
}

const ARCHITECTURE_SUFFIXES: [&str; 5] = ["-x86_64", "-aarch64", "-arm64", "-ppc64le", "-s390x"];

/// Reads the release version from the tag of the release image, e.g.
/// `quay.io/openshift-release-dev/ocp-release:4.7.0-x86_64` is version `4.7.0`
#[derive(Clone, Debug, Default)]
pub struct TagReleaseProvider;

impl TagReleaseProvider {
    fn version_of(image: &str) -> std::result::Result<String, String> {
        if image.contains('@') {
            return Err("digest references carry no version".into());
        }
        let repository_end = image.rfind('/').map_or(0, |i| i + 1);
        let tag = match image[repository_end..].rsplit_once(':') {
            Some((_, tag)) if !tag.is_empty() => tag,
            _ => return Err("image has no tag".into()),
        };

        let version = ARCHITECTURE_SUFFIXES
            .iter()
            .find_map(|suffix| tag.strip_suffix(suffix))
            .unwrap_or(tag);

        let core = version.split(['-', '+']).next().unwrap_or_default();
        let parts: Vec<_> = core.split('.').collect();
        if parts.len() < 2 || parts.iter().any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit())) {
            return Err(format!("tag {tag:?} is not a release version"));
        }

        Ok(version.to_owned())
    }
}

#[async_trait]
impl ReleaseProvider for TagReleaseProvider {
    async fn lookup(&self, image: &str) -> Result<ReleaseImage> {
        let version = Self::version_of(image).map_err(|reason| Error::ReleaseLookup {
            image: image.to_owned(),
            reason,
        })?;
        Ok(ReleaseImage::new(image, version))
    }
}
