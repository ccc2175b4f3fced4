pub mod index;
pub mod post;

use anyhow::Result;

use crate::config::SiteConfig;
use index::IndexSelectors;
use post::PostSelectors;

/// Compiled selectors for both page kinds.
pub struct Selectors {
    pub index: IndexSelectors,
    pub post: PostSelectors,
}

impl Selectors {
    pub fn from_config(site: &SiteConfig) -> Result<Self> {
        Ok(Self {
            index: IndexSelectors::from_config(site)?,
            post: PostSelectors::from_config(site)?,
        })
    }
}
