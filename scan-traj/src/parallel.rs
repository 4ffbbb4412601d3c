use crate::error::PipelineError;
use anyhow::format_err;
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Dedicated pool of `workers` threads for the per-unit work of `stage`.
pub(crate) fn thread_pool(stage: &'static str, workers: usize) -> Result<ThreadPool, PipelineError> {
    if workers == 0 {
        return Err(PipelineError::parameter("workers", workers, "need at least one worker"));
    }
    ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(move |i| format!("{stage}-{i}"))
        .build()
        .map_err(|e| PipelineError::numerical(stage, format_err!(e)))
}

/// Run `f` over `units` on `pool`. Results keep the order of `units`; the first failing unit, in
/// that order, aborts the stage and no partial results are returned.
pub(crate) fn map_units<U, T, F, L>(
    pool: &ThreadPool,
    stage: &'static str,
    units: &[U],
    label: L,
    f: F,
) -> Result<Vec<T>, PipelineError>
where
    U: Sync,
    T: Send,
    F: Fn(&U) -> anyhow::Result<T> + Sync,
    L: Fn(&U) -> String,
{
    use rayon::prelude::*;

    let results: Vec<anyhow::Result<T>> = pool.install(|| units.par_iter().map(&f).collect());
    let mut out = Vec::with_capacity(results.len());
    for (unit, r) in units.iter().zip(results) {
        match r {
            Ok(v) => out.push(v),
            Err(e) => return Err(PipelineError::worker(stage, label(unit), e)),
        }
    }
    Ok(out)
}
