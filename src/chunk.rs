//! Chunk processor.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::slice::ParallelSliceMut;

use crate::run::{ExternalRun, Run, RunError};

/// Turns batches into sorted duplicate-free runs stored in a work directory.
///
/// The run index counter is the only shared state, so `process` may be called
/// from several threads at once.
pub struct ChunkProcessor<'a> {
    dir: PathBuf,
    thread_pool: &'a rayon::ThreadPool,
    rw_buf_size: Option<usize>,
    next_index: AtomicUsize,
}

impl<'a> ChunkProcessor<'a> {
    /// Creates a chunk processor.
    ///
    /// # Arguments
    /// * `dir` - Directory the runs are stored in
    /// * `thread_pool` - Thread pool used to sort batch data
    /// * `rw_buf_size` - Run file write buffer size
    pub fn new(dir: &Path, thread_pool: &'a rayon::ThreadPool, rw_buf_size: Option<usize>) -> Self {
        ChunkProcessor {
            dir: dir.to_path_buf(),
            thread_pool,
            rw_buf_size,
            next_index: AtomicUsize::new(0),
        }
    }

    /// Number of runs created so far.
    pub fn runs_created(&self) -> usize {
        self.next_index.load(Ordering::SeqCst)
    }

    /// Collapses a batch to its distinct records, sorts them and persists them as a new run.
    pub fn process<C>(&self, batch: impl IntoIterator<Item = String>) -> Result<Run, RunError>
    where
        C: ExternalRun,
    {
        let distinct: HashSet<String> = batch.into_iter().collect();
        let mut records = Vec::from_iter(distinct);

        log::debug!("sorting chunk data ...");
        self.thread_pool.install(|| {
            records.par_sort_unstable();
        });

        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        log::debug!("saving chunk {} ({} distinct records)", index, records.len());
        let run = C::write(&self.dir, index, records, self.rw_buf_size)?;

        return Ok(run);
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;
    use std::fs;

    use rayon::prelude::*;
    use rstest::*;

    use super::ChunkProcessor;
    use crate::run::{ExternalRun, RunError, TextRun};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[fixture]
    fn thread_pool() -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap()
    }

    fn batch(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[rstest]
    #[case(vec!["b", "a", "b"], vec!["a", "b"])]
    #[case(vec!["z", "z", "z"], vec!["z"])]
    #[case(vec!["x"], vec!["x"])]
    #[case(vec!["b", "", "B", "a", ""], vec!["", "B", "a", "b"])]
    fn test_process(
        tmp_dir: tempfile::TempDir,
        thread_pool: rayon::ThreadPool,
        #[case] input: Vec<&str>,
        #[case] expected: Vec<&str>,
    ) {
        let processor = ChunkProcessor::new(tmp_dir.path(), &thread_pool, None);
        let run = processor.process::<TextRun>(batch(&input)).unwrap();
        assert_eq!(run.records(), expected.len());

        let restored: Result<Vec<String>, RunError> = TextRun::open(run, None).unwrap().collect();
        assert_eq!(restored.unwrap(), expected);
    }

    #[rstest]
    fn test_run_indexes_are_sequential(tmp_dir: tempfile::TempDir, thread_pool: rayon::ThreadPool) {
        let processor = ChunkProcessor::new(tmp_dir.path(), &thread_pool, None);
        let runs: Vec<_> = (0..3)
            .map(|_| processor.process::<TextRun>(batch(&["a"])).unwrap())
            .collect();

        assert_eq!(Vec::from_iter(runs.iter().map(|r| r.index())), vec![0, 1, 2]);
        assert_eq!(processor.runs_created(), 3);
    }

    #[rstest]
    fn test_concurrent_processing(tmp_dir: tempfile::TempDir, thread_pool: rayon::ThreadPool) {
        let processor = ChunkProcessor::new(tmp_dir.path(), &thread_pool, None);
        let runs: Vec<_> = (0..32)
            .into_par_iter()
            .map(|i| processor.process::<TextRun>(vec![i.to_string()]).unwrap())
            .collect();

        let indexes: HashSet<usize> = runs.iter().map(|r| r.index()).collect();
        assert_eq!(indexes, HashSet::from_iter(0..32));
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 32);

        drop(runs);
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }

    #[rstest]
    fn test_storage_failure(thread_pool: rayon::ThreadPool) {
        let tmp_dir = tempfile::tempdir().unwrap();
        let missing = tmp_dir.path().join("missing");
        let processor = ChunkProcessor::new(&missing, &thread_pool, None);

        assert!(matches!(processor.process::<TextRun>(batch(&["a"])), Err(RunError::IO(_))));
    }
}
