use rand::Rng;
use std::collections::BTreeSet;
use tracing::info;

use crate::cli::config::HarvestSettings;
use crate::error::Result;
use crate::harvest::{clean_url, JobHistory};

/// URLs the crawl engine must not enqueue again during this run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkipList {
    urls: BTreeSet<String>,
}

impl SkipList {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Canonicalizes `url` before checking
    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(&clean_url(url))
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.urls.iter()
    }
}

impl FromIterator<String> for SkipList {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            urls: iter.into_iter().collect(),
        }
    }
}

/// Drop `floor(fraction * len)` uniformly chosen entries, sampled without replacement
pub fn remove_random_fraction<R: Rng + ?Sized>(mut urls: Vec<String>, fraction: f64, rng: &mut R) -> Vec<String> {
    let amount = (urls.len() as f64 * fraction).floor() as usize;
    if amount == 0 {
        return urls;
    }

    let mut removed: Vec<usize> = rand::seq::index::sample(rng, urls.len(), amount).into_vec();
    // Highest index first so earlier removals don't shift later ones
    removed.sort_unstable_by(|a, b| b.cmp(a));
    for index in removed {
        urls.swap_remove(index);
    }
    urls
}

/// Decides, once per run, which previously collected URLs to skip
#[derive(Clone)]
pub struct ResumePlanner {
    history: JobHistory,
    incremental: bool,
    lookback_days: u32,
    reverify_fraction: f64,
}

impl ResumePlanner {
    pub fn new(history: JobHistory, settings: &HarvestSettings) -> Self {
        Self {
            history,
            incremental: settings.incremental,
            lookback_days: settings.lookback_days,
            reverify_fraction: settings.reverify_fraction,
        }
    }

    pub async fn plan_skip_list<R: Rng + ?Sized>(&self, task: &str, rng: &mut R) -> Result<SkipList> {
        if !self.incremental {
            return Ok(SkipList::empty());
        }

        let jobs = self.history.find_prior_successful_jobs(task, self.lookback_days).await?;
        let prior = self.history.list_prior_collected_urls(&jobs).await?;
        let prior_count = prior.len();

        let skip: SkipList = remove_random_fraction(prior, self.reverify_fraction, rng)
            .into_iter()
            .collect();
        info!(
            "Skipping {} of {} previously collected urls for {}",
            skip.len(),
            prior_count,
            task
        );
        Ok(skip)
    }
}
