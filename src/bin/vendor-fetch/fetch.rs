use indicatif::{MultiProgress, ProgressBar};
use vendor_fetch::{Fetcher, Source, Staged};

use crate::progress::{complete_progress_bar, make_progress_spinner};

pub type FetchResult = Result<Vec<Staged>, vendor_fetch::Error>;

// Fetch a single source, reporting progress in the provided progress bar
fn fetch_one(name: &str, source: &Source, fetcher: &Fetcher, bar: ProgressBar) -> FetchResult {
    bar.set_message(format!("{name} -> {source}"));
    let result = fetcher.fetch(name, source);
    complete_progress_bar(bar, name, &result);
    result
}

// Fetch sources in parallel with `rayon`. Pair each source with its own progress bar. Using
// ordered bars means the bars are shown in order, and results come back in declaration order.
pub fn parallel_fetch(sources: &[(String, Source)], fetcher: &Fetcher) -> Vec<FetchResult> {
    use rayon::prelude::*;
    let count = sources.len();
    let mp = MultiProgress::new();
    let ordered_bars = (0..count)
        .map(|k| make_progress_spinner(&mp, format!("[{}/{count}]", k + 1)))
        .collect::<Vec<_>>();
    ordered_bars
        .into_iter()
        .zip(sources)
        // Have to `collect()` first because we can't use parallel iterator with Zip
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|(bar, (name, source))| fetch_one(name, source, fetcher, bar))
        .collect::<Vec<_>>()
}
