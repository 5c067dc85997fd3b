//! External deduplicator.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io::{self, prelude::*};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::buffer::{ChunkBuffer, LimitedBuffer, LimitedBufferBuilder};
use crate::chunk::ChunkProcessor;
use crate::merger::{self, MergeError};
use crate::run::{ExternalRun, RunError, TextRun};
use crate::source::{Batches, Decoding, LineSource};

/// Deduplication error.
#[derive(Debug)]
pub enum DedupError {
    /// Rejected configuration.
    InvalidConfig(String),
    /// Input file can not be opened.
    InputUnavailable(io::Error),
    /// Input read error.
    Input(io::Error),
    /// Temporary directory creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Sorted run could not be stored.
    Storage(RunError),
    /// Stored run could not be reopened for merging.
    RunOpen { path: PathBuf, source: io::Error },
    /// Stored run could not be read while merging.
    RunRead(RunError),
    /// Output write error.
    Output(io::Error),
}

impl Error for DedupError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            DedupError::InvalidConfig(_) => None,
            DedupError::InputUnavailable(err) => Some(err),
            DedupError::Input(err) => Some(err),
            DedupError::TempDir(err) => Some(err),
            DedupError::ThreadPoolBuildError(err) => Some(err),
            DedupError::Storage(err) => Some(err),
            DedupError::RunOpen { source, .. } => Some(source),
            DedupError::RunRead(err) => Some(err),
            DedupError::Output(err) => Some(err),
        }
    }
}

impl Display for DedupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            DedupError::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            DedupError::InputUnavailable(err) => write!(f, "input not available: {}", err),
            DedupError::Input(err) => write!(f, "input read error: {}", err),
            DedupError::TempDir(err) => write!(f, "temporary directory not created: {}", err),
            DedupError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            DedupError::Storage(err) => write!(f, "sorted run not stored: {}", err),
            DedupError::RunOpen { path, source } => {
                write!(f, "sorted run {} not opened: {}", path.display(), source)
            }
            DedupError::RunRead(err) => write!(f, "sorted run read error: {}", err),
            DedupError::Output(err) => write!(f, "output write error: {}", err),
        }
    }
}

impl From<MergeError> for DedupError {
    fn from(err: MergeError) -> Self {
        match err {
            MergeError::RunOpen(path, source) => DedupError::RunOpen { path, source },
            MergeError::RunRead(err) => DedupError::RunRead(err),
            MergeError::Output(err) => DedupError::Output(err),
        }
    }
}

/// Deduplication summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupStats {
    /// Input line count if counting was enabled.
    pub total_lines: Option<u64>,
    /// Lines consumed from the input.
    pub lines_read: u64,
    /// Sorted runs created.
    pub runs: usize,
    /// Distinct lines written to the output.
    pub unique_lines: u64,
    /// Lines dropped as duplicates.
    pub duplicates_removed: u64,
    /// Whole run duration.
    pub elapsed: Duration,
    /// Merge phase duration.
    pub merge_elapsed: Duration,
}

/// External deduplicator builder. Provides methods for [`ExternalDeduplicator`] initialization.
#[derive(Clone)]
pub struct ExternalDeduplicatorBuilder<C = TextRun>
where
    C: ExternalRun,
{
    /// Number of threads to be used to sort batches.
    threads_number: Option<usize>,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Run and output file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Number of records per batch.
    batch_size: usize,
    /// Input decoding policy.
    decoding: Decoding,
    /// Whether input lines are counted before processing.
    count_lines: bool,

    /// External run type.
    external_run_type: PhantomData<C>,
}

impl<C> ExternalDeduplicatorBuilder<C>
where
    C: ExternalRun,
{
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalDeduplicatorBuilder::default()
    }

    /// Builds an [`ExternalDeduplicator`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalDeduplicator<C>, DedupError> {
        ExternalDeduplicator::new(
            self.threads_number,
            self.tmp_dir.as_deref(),
            self.batch_size,
            self.rw_buf_size,
            self.decoding,
            self.count_lines,
        )
    }

    /// Sets number of threads to be used to sort batches.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalDeduplicatorBuilder<C> {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalDeduplicatorBuilder<C> {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets maximum number of records held in memory per batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> ExternalDeduplicatorBuilder<C> {
        self.batch_size = batch_size;
        return self;
    }

    /// Sets run and output read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalDeduplicatorBuilder<C> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets input decoding policy.
    pub fn with_decoding(mut self, decoding: Decoding) -> ExternalDeduplicatorBuilder<C> {
        self.decoding = decoding;
        return self;
    }

    /// Enables or disables counting input lines before processing.
    pub fn with_count_lines(mut self, count_lines: bool) -> ExternalDeduplicatorBuilder<C> {
        self.count_lines = count_lines;
        return self;
    }

    /// Switches the run storage format keeping the rest of the configuration.
    pub fn into_run_format<D: ExternalRun>(self) -> ExternalDeduplicatorBuilder<D> {
        ExternalDeduplicatorBuilder {
            threads_number: self.threads_number,
            tmp_dir: self.tmp_dir,
            rw_buf_size: self.rw_buf_size,
            batch_size: self.batch_size,
            decoding: self.decoding,
            count_lines: self.count_lines,
            external_run_type: PhantomData,
        }
    }
}

impl<C> Default for ExternalDeduplicatorBuilder<C>
where
    C: ExternalRun,
{
    fn default() -> Self {
        ExternalDeduplicatorBuilder {
            threads_number: None,
            tmp_dir: None,
            rw_buf_size: None,
            batch_size: crate::DEFAULT_BATCH_SIZE,
            decoding: Decoding::default(),
            count_lines: true,
            external_run_type: PhantomData,
        }
    }
}

/// External deduplicator.
///
/// Splits the input into batches, stores every batch as a sorted duplicate-free run
/// and merges the runs into a single sorted duplicate-free output.
pub struct ExternalDeduplicator<C = TextRun>
where
    C: ExternalRun,
{
    /// Sorting thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory the per-call work directories are created in.
    tmp_path: PathBuf,
    /// Number of records per batch.
    batch_size: usize,
    /// Run and output file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Input decoding policy.
    decoding: Decoding,
    /// Whether input lines are counted before processing.
    count_lines: bool,

    /// External run type.
    external_run_type: PhantomData<C>,
}

impl<C> ExternalDeduplicator<C>
where
    C: ExternalRun,
{
    /// Creates a new external deduplicator instance.
    ///
    /// # Arguments
    /// * `threads_number` - Number of threads to be used to sort batches. If the parameter is [`None`]
    ///   threads number will be selected based on available CPU core number.
    /// * `tmp_path` - Directory to be used to store temporary data. It is created if absent. If parameter is
    ///   [`None`] default OS temporary directory will be used.
    /// * `batch_size` - Maximum number of records held in memory per batch.
    /// * `rw_buf_size` - Run and output files read/write buffer size.
    /// * `decoding` - Input decoding policy.
    /// * `count_lines` - Count input lines before processing to report progress.
    pub fn new(
        threads_number: Option<usize>,
        tmp_path: Option<&Path>,
        batch_size: usize,
        rw_buf_size: Option<usize>,
        decoding: Decoding,
        count_lines: bool,
    ) -> Result<Self, DedupError> {
        if batch_size == 0 {
            return Err(DedupError::InvalidConfig("batch size must be positive".to_string()));
        }

        return Ok(ExternalDeduplicator {
            batch_size,
            rw_buf_size,
            decoding,
            count_lines,
            thread_pool: Self::init_thread_pool(threads_number)?,
            tmp_path: Self::init_tmp_directory(tmp_path)?,
            external_run_type: PhantomData,
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, DedupError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| DedupError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    fn init_tmp_directory(tmp_path: Option<&Path>) -> Result<PathBuf, DedupError> {
        let tmp_path = match tmp_path {
            Some(tmp_path) => tmp_path.to_path_buf(),
            None => std::env::temp_dir(),
        };
        fs::create_dir_all(&tmp_path).map_err(|err| DedupError::TempDir(err))?;

        log::info!("using {} as a temporary directory", tmp_path.display());

        return Ok(tmp_path);
    }

    fn init_work_dir(&self) -> Result<tempfile::TempDir, DedupError> {
        tempfile::Builder::new()
            .prefix("ext-dedup-")
            .tempdir_in(&self.tmp_path)
            .map_err(|err| DedupError::TempDir(err))
    }

    fn batch_builder(&self) -> LimitedBufferBuilder {
        LimitedBufferBuilder::new(self.batch_size, false)
    }

    /// Deduplicates the input file into the output file.
    ///
    /// The output is written under a temporary name next to `output` and renamed over it only
    /// once it is complete, so a failed run never publishes a partial result.
    pub fn dedup(&self, input: &Path, output: &Path) -> Result<DedupStats, DedupError> {
        let source = LineSource::new(input, self.batch_builder(), self.decoding).with_rw_buf_size(self.rw_buf_size);
        let batches = source.batches().map_err(|err| DedupError::InputUnavailable(err))?;

        let total_lines = if self.count_lines {
            let total_lines = source.count_lines().map_err(|err| DedupError::Input(err))?;
            log::info!("input {} contains {} lines", input.display(), total_lines);
            Some(total_lines)
        } else {
            None
        };

        let output_dir = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let output_file = tempfile::NamedTempFile::new_in(output_dir).map_err(|err| DedupError::Output(err))?;
        let mut output_writer = match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, output_file),
            None => io::BufWriter::new(output_file),
        };

        let stats = self.dedup_batches(batches, total_lines, &mut output_writer)?;

        let output_file = output_writer
            .into_inner()
            .map_err(|err| DedupError::Output(err.into_error()))?;
        output_file
            .persist(output)
            .map_err(|err| DedupError::Output(err.error))?;
        log::info!("output saved to {}", output.display());

        return Ok(stats);
    }

    /// Deduplicates records read from `input` into `output`.
    /// Input lines are not counted in advance.
    pub fn dedup_stream<R, W>(&self, input: R, output: &mut W) -> Result<DedupStats, DedupError>
    where
        R: Read,
        W: Write,
    {
        let reader = match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, input),
            None => io::BufReader::new(input),
        };
        let builder = self.batch_builder();
        let batches = Batches::new(reader, &builder, self.decoding);

        self.dedup_batches(batches, None, output)
    }

    fn dedup_batches<I, W>(&self, batches: I, total_lines: Option<u64>, output: &mut W) -> Result<DedupStats, DedupError>
    where
        I: IntoIterator<Item = io::Result<LimitedBuffer<String>>>,
        W: Write,
    {
        let start = Instant::now();
        let work_dir = self.init_work_dir()?;
        let processor = ChunkProcessor::new(work_dir.path(), &self.thread_pool, self.rw_buf_size);

        log::info!("reading and processing chunks ...");
        let mut runs = Vec::new();
        let mut lines_read: u64 = 0;
        for batch in batches.into_iter() {
            let batch = batch.map_err(|err| DedupError::Input(err))?;
            lines_read += batch.len() as u64;

            let run = processor.process::<C>(batch).map_err(|err| DedupError::Storage(err))?;
            log::debug!("run {} saved ({} records)", run.path().display(), run.records());
            runs.push(run);

            match total_lines {
                Some(total_lines) => log::debug!("processed {}/{} lines", lines_read, total_lines),
                None => log::debug!("processed {} lines", lines_read),
            }
        }
        let runs_number = runs.len();

        log::info!("merging {} sorted chunks ...", runs_number);
        let merge_start = Instant::now();
        let merged = merger::merge_runs::<C, _>(runs, output, self.rw_buf_size)?;
        output.flush().map_err(|err| DedupError::Output(err))?;
        let merge_elapsed = merge_start.elapsed();

        if let Err(err) = work_dir.close() {
            log::warn!("temporary directory not removed: {}", err);
        }

        let unique_lines = merged.written as u64;
        let stats = DedupStats {
            total_lines,
            lines_read,
            runs: runs_number,
            unique_lines,
            duplicates_removed: lines_read - unique_lines,
            elapsed: start.elapsed(),
            merge_elapsed,
        };

        log::info!(
            "deduplication done: {} lines read, {} distinct lines, {} runs",
            stats.lines_read,
            stats.unique_lines,
            stats.runs
        );
        log::info!("process completed in {:.2} seconds", stats.elapsed.as_secs_f64());
        log::info!("time taken for merging: {:.2} seconds", stats.merge_elapsed.as_secs_f64());

        return Ok(stats);
    }
}
