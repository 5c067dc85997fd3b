use std::io::{self, prelude::*};

use env_logger;
use log;

use ext_dedup::{Decoding, ExternalDeduplicator, ExternalDeduplicatorBuilder, RmpRun};

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Info).init();

    let deduplicator: ExternalDeduplicator<RmpRun> = ExternalDeduplicatorBuilder::new()
        .with_batch_size(10_000)
        .with_decoding(Decoding::Latin1)
        .build()
        .unwrap();

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut output = io::BufWriter::new(stdout.lock());
    deduplicator.dedup_stream(stdin.lock(), &mut output).unwrap();
    output.flush().unwrap();
}
