use std::path;

use env_logger;
use log;

use ext_dedup::{ExternalDeduplicator, ExternalDeduplicatorBuilder};

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();

    let deduplicator: ExternalDeduplicator = ExternalDeduplicatorBuilder::new()
        .with_tmp_dir(path::Path::new("./tmp"))
        .with_batch_size(100_000)
        .build()
        .unwrap();

    let stats = deduplicator
        .dedup(path::Path::new("input.txt"), path::Path::new("output.txt"))
        .unwrap();

    log::info!(
        "{} lines read, {} distinct lines written",
        stats.lines_read,
        stats.unique_lines
    );
}
