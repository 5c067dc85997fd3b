//! Deduplicating binary heap merger.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::error::Error;
use std::fmt::{self, Display};
use std::io::{self, prelude::*};
use std::marker::PhantomData;
use std::path::PathBuf;

use crate::run::{ExternalRun, Run, RunError};

/// Binary heap merger implementation.
/// Merges multiple sorted duplicate-free inputs into a single sorted output emitting every distinct item once.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of items,
/// *n* is the number of chunks (inputs). Only one item per input is held in memory.
pub struct DedupMerger<T, E, C>
where
    T: Ord + Clone,
    C: Iterator<Item = Result<T, E>>,
{
    // binary heap is max-heap by default so we reverse it to convert it to min-heap,
    // ties on equal items are broken by the input index
    items: BinaryHeap<Reverse<(T, usize)>>,
    chunks: Vec<Option<C>>,
    last: Option<T>,
    duplicates: usize,
    initiated: bool,

    error_type: PhantomData<E>,
}

impl<T, E, C> DedupMerger<T, E, C>
where
    T: Ord + Clone,
    C: Iterator<Item = Result<T, E>>,
{
    /// Creates an instance of a deduplicating merger using chunks as inputs.
    /// Chunk items should be sorted in ascending order and contain no duplicates,
    /// otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `chunks` - Chunks to be merged in a single sorted one
    pub fn new<I>(chunks: I) -> Self
    where
        I: IntoIterator,
        I::Item: IntoIterator<IntoIter = C>,
    {
        let chunks = Vec::from_iter(chunks.into_iter().map(|c| Some(c.into_iter())));
        let items = BinaryHeap::with_capacity(chunks.len());

        return DedupMerger {
            chunks,
            items,
            last: None,
            duplicates: 0,
            initiated: false,
            error_type: PhantomData,
        };
    }

    /// Number of items dropped because an equal item was already emitted.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Pulls the next item of a chunk into the heap. An exhausted chunk is dropped right away.
    fn advance(&mut self, idx: usize) -> Result<(), E> {
        let next = match self.chunks[idx].as_mut() {
            Some(chunk) => chunk.next(),
            None => return Ok(()),
        };

        match next {
            Some(Ok(item)) => self.items.push(Reverse((item, idx))),
            Some(Err(err)) => return Err(err),
            None => self.chunks[idx] = None,
        }

        return Ok(());
    }
}

impl<T, E, C> Iterator for DedupMerger<T, E, C>
where
    T: Ord + Clone,
    C: Iterator<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    /// Returns the next distinct item from the inputs in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        if !self.initiated {
            self.initiated = true;
            let mut first_err = None;
            for idx in 0..self.chunks.len() {
                if let Err(err) = self.advance(idx) {
                    first_err.get_or_insert(err);
                }
            }
            if let Some(err) = first_err {
                return Some(Err(err));
            }
        }

        loop {
            let Reverse((item, idx)) = self.items.pop()?;
            if let Err(err) = self.advance(idx) {
                return Some(Err(err));
            }

            if self.last.as_ref() == Some(&item) {
                self.duplicates += 1;
                continue;
            }

            self.last = Some(item.clone());
            return Some(Ok(item));
        }
    }
}

/// Merge summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeStats {
    /// Records written to the output.
    pub written: usize,
    /// Records dropped because another run already held them.
    pub duplicates: usize,
}

/// Merge error.
#[derive(Debug)]
pub enum MergeError {
    /// A run could not be opened for reading.
    RunOpen(PathBuf, io::Error),
    /// A run could not be read.
    RunRead(RunError),
    /// Output writing error.
    Output(io::Error),
}

impl Error for MergeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            MergeError::RunOpen(_, err) => Some(err),
            MergeError::RunRead(err) => Some(err),
            MergeError::Output(err) => Some(err),
        }
    }
}

impl Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            MergeError::RunOpen(path, err) => write!(f, "run {} not opened: {}", path.display(), err),
            MergeError::RunRead(err) => write!(f, "run read error: {}", err),
            MergeError::Output(err) => write!(f, "output write error: {}", err),
        }
    }
}

/// Merges runs into the writer, one record per line.
/// Every run is opened before merging starts. Runs are removed as soon as they are drained,
/// on failure the remaining ones are removed when they go out of scope.
pub fn merge_runs<C, W>(runs: Vec<Run>, writer: &mut W, buf_size: Option<usize>) -> Result<MergeStats, MergeError>
where
    C: ExternalRun,
    W: Write,
{
    let mut readers = Vec::with_capacity(runs.len());
    for run in runs {
        let path = run.path().to_path_buf();
        match C::open(run, buf_size) {
            Ok(reader) => readers.push(reader),
            Err(err) => return Err(MergeError::RunOpen(path, err)),
        }
    }

    log::debug!("merging {} runs", readers.len());
    let mut merger = DedupMerger::new(readers);
    let mut written = 0;

    for record in merger.by_ref() {
        let record = record.map_err(MergeError::RunRead)?;
        writer.write_all(record.as_bytes()).map_err(MergeError::Output)?;
        writer.write_all(b"\n").map_err(MergeError::Output)?;
        written += 1;
    }

    return Ok(MergeStats {
        written,
        duplicates: merger.duplicates(),
    });
}

#[cfg(test)]
mod test {
    use rstest::*;
    use std::error::Error;
    use std::fs;
    use std::io::{self, ErrorKind};

    use super::{merge_runs, DedupMerger, MergeError, MergeStats};
    use crate::run::{ExternalRun, TextRun};

    #[rstest]
    #[case(
        vec![],
        vec![],
    )]
    #[case(
        vec![
            vec![],
            vec![]
        ],
        vec![],
    )]
    #[case(
        vec![
            vec![Ok(4), Ok(5), Ok(7)],
            vec![Ok(1), Ok(6)],
            vec![Ok(3)],
            vec![],
        ],
        vec![Ok(1), Ok(3), Ok(4), Ok(5), Ok(6), Ok(7)],
    )]
    #[case(
        vec![
            vec![Ok(1), Ok(2), Ok(5)],
            vec![Ok(2), Ok(3), Ok(5)],
            vec![Ok(1), Ok(5)],
        ],
        vec![Ok(1), Ok(2), Ok(3), Ok(5)],
    )]
    #[case(
        vec![
            vec![Result::Err(io::Error::new(ErrorKind::Other, "test error"))]
        ],
        vec![
            Result::Err(io::Error::new(ErrorKind::Other, "test error"))
        ],
    )]
    #[case(
        vec![
            vec![Ok(3), Result::Err(io::Error::new(ErrorKind::Other, "test error"))],
            vec![Ok(1), Ok(2)],
        ],
        vec![
            Ok(1),
            Ok(2),
            Result::Err(io::Error::new(ErrorKind::Other, "test error")),
        ],
    )]
    fn test_merger(
        #[case] chunks: Vec<Vec<Result<i32, io::Error>>>,
        #[case] expected_result: Vec<Result<i32, io::Error>>,
    ) {
        let merger = DedupMerger::new(chunks);
        let actual_result: Vec<_> = merger.collect();
        assert!(
            compare_vectors_of_result::<_, io::Error>(&actual_result, &expected_result),
            "actual={:?}, expected={:?}",
            actual_result,
            expected_result
        );
    }

    #[test]
    fn test_merger_counts_duplicates() {
        let chunks: Vec<Vec<Result<&str, io::Error>>> = vec![
            vec![Ok("a"), Ok("b")],
            vec![Ok("b"), Ok("c")],
            vec![Ok("a")],
        ];
        let mut merger = DedupMerger::new(chunks);
        let actual: Vec<&str> = merger.by_ref().map(Result::unwrap).collect();

        assert_eq!(actual, vec!["a", "b", "c"]);
        assert_eq!(merger.duplicates(), 2);
    }

    fn write_runs(dir: &tempfile::TempDir, runs: &[&[&str]]) -> Vec<crate::Run> {
        runs.iter()
            .enumerate()
            .map(|(idx, records)| {
                let records = records.iter().map(|r| r.to_string());
                TextRun::write(dir.path(), idx, records, None).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_merge_runs() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let runs = write_runs(&tmp_dir, &[&["a", "b"], &["b", "c"], &["a"]]);

        let mut output = Vec::new();
        let stats = merge_runs::<TextRun, _>(runs, &mut output, None).unwrap();

        assert_eq!(output, b"a\nb\nc\n");
        assert_eq!(stats, MergeStats { written: 3, duplicates: 2 });
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_merge_runs_open_failure_cleans_up() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let runs = write_runs(&tmp_dir, &[&["a"], &["b"], &["c"]]);
        fs::remove_file(runs[1].path()).unwrap();

        let mut output = Vec::new();
        let result = merge_runs::<TextRun, _>(runs, &mut output, None);

        let err = result.unwrap_err();
        assert!(matches!(err, MergeError::RunOpen(_, _)));
        assert!(err.to_string().starts_with("run "), "{}", err);
        assert_eq!(
            err.source().and_then(|e| e.downcast_ref::<io::Error>()).map(|e| e.kind()),
            Some(ErrorKind::NotFound)
        );
        assert!(output.is_empty());
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }

    struct FailingWriter {
        budget: usize,
    }

    impl io::Write for FailingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(ErrorKind::Other, "disk full"));
            }
            self.budget -= 1;
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_merge_runs_failure_mid_merge_cleans_up() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let runs = write_runs(&tmp_dir, &[&["a", "c", "e"], &["b", "d", "f"]]);

        let mut output = FailingWriter { budget: 3 };
        let result = merge_runs::<TextRun, _>(runs, &mut output, None);

        let err = result.unwrap_err();
        assert!(matches!(err, MergeError::Output(_)));
        assert_eq!(err.to_string(), "output write error: disk full");
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }

    fn compare_vectors_of_result<T: PartialEq, E: Error + 'static>(
        actual: &Vec<Result<T, E>>,
        expected: &Vec<Result<T, E>>,
    ) -> bool {
        actual.len() == expected.len()
            && actual
                .into_iter()
                .zip(expected)
                .all(
                    |(actual_result, expected_result)| match (actual_result, expected_result) {
                        (Ok(actual_result), Ok(expected_result)) if actual_result == expected_result => true,
                        (Err(actual_err), Err(expected_err)) => actual_err.to_string() == expected_err.to_string(),
                        _ => false,
                    },
                )
    }
}
