use crate::config::ValidationConfig;
use crate::error::{Result, SpilloverError};
use crate::model::ValidationFold;

/// Rolling train/test windows anchored so the last test window ends at `n`.
///
/// Fold `i` trains on `[o + i·test, o + i·test + train)` and tests on the
/// `test` observations that follow. Test windows never overlap, and every
/// train window ends at or before its own test start and every later test start.
/// A train window may cover earlier folds' test windows, which are past data by
/// then; it never reaches its own or any later test window.
pub fn rolling_schedule(n: usize, cfg: &ValidationConfig) -> Result<Vec<ValidationFold>> {
    let (train, test) = (cfg.train_window, cfg.test_window);
    let possible = if test == 0 || n < train + test {
        0
    } else {
        (n - train) / test
    };
    let k = cfg.folds.min(possible);
    if k < cfg.min_successful_folds {
        return Err(SpilloverError::InsufficientFolds {
            succeeded: k,
            required: cfg.min_successful_folds,
        });
    }
    let offset = n - (train + k * test);
    Ok((0..k)
        .map(|i| {
            let train_start = offset + i * test;
            let train_end = train_start + train;
            ValidationFold {
                fold_index: i,
                train_range: train_start..train_end,
                test_range: train_end..train_end + test,
            }
        })
        .collect())
}
