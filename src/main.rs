use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use ext_dedup::{Decoding, ExternalDeduplicator, ExternalDeduplicatorBuilder, ExternalRun, RmpRun, TextRun};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let run_format: RunFormat = arg_parser.value_of_t_or_exit("run_format");
    let decoding: InputDecoding = arg_parser.value_of_t_or_exit("decoding");
    let batch_size: usize = arg_parser.value_of_t_or_exit("batch_size");
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");
    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));
    let rw_buf_size: Option<usize> = arg_parser
        .value_of("rw_buf_size")
        .map(|v| parse_buf_size(v).expect("value is pre-validated"));

    let input = arg_parser.value_of("input").expect("value is required");
    let output = arg_parser.value_of("output").expect("value is required");

    let mut builder = ExternalDeduplicatorBuilder::new()
        .with_batch_size(batch_size)
        .with_decoding(decoding.into())
        .with_count_lines(!arg_parser.is_present("no_count"));

    if let Some(threads) = threads {
        builder = builder.with_threads_number(threads);
    }

    if let Some(tmp_dir) = tmp_dir {
        builder = builder.with_tmp_dir(path::Path::new(tmp_dir));
    }

    if let Some(rw_buf_size) = rw_buf_size {
        builder = builder.with_rw_buf_size(rw_buf_size);
    }

    let (input, output) = (path::Path::new(input), path::Path::new(output));
    match run_format {
        RunFormat::Text => dedup::<TextRun>(builder, input, output),
        RunFormat::Rmp => dedup::<RmpRun>(builder.into_run_format(), input, output),
    }
}

fn dedup<C: ExternalRun>(builder: ExternalDeduplicatorBuilder<C>, input: &path::Path, output: &path::Path) {
    let deduplicator: ExternalDeduplicator<C> = match builder.build() {
        Ok(deduplicator) => deduplicator,
        Err(err) => {
            log::error!("deduplicator initialization error: {}", err);
            process::exit(1);
        }
    };

    if let Err(err) = deduplicator.dedup(input, output) {
        log::error!("deduplication error: {}", err);
        process::exit(1);
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum RunFormat {
    Text,
    Rmp,
}

impl RunFormat {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        RunFormat::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for RunFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <RunFormat as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum InputDecoding {
    Utf8Lossy,
    Latin1,
}

impl InputDecoding {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        InputDecoding::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for InputDecoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <InputDecoding as clap::ArgEnum>::from_str(s, false)
    }
}

impl From<InputDecoding> for Decoding {
    fn from(decoding: InputDecoding) -> Self {
        match decoding {
            InputDecoding::Utf8Lossy => Decoding::Utf8Lossy,
            InputDecoding::Latin1 => Decoding::Latin1,
        }
    }
}

fn parse_buf_size(value: &str) -> Result<usize, String> {
    let size = value
        .parse::<ByteSize>()
        .map_err(|err| format!("Buffer size format incorrect: {}", err))?;
    usize::try_from(size.as_u64()).map_err(|_| format!("Buffer size {} exceeds platform address space", size))
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("ext-dedup")
        .about("external line deduplicator")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file to be deduplicated")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for parallel sorting")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data, created if absent")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("batch_size")
                .short('b')
                .long("batch-size")
                .help("number of lines held in memory per chunk")
                .takes_value(true)
                .default_value("100000")
                .validator(|v| match v.parse::<usize>() {
                    Ok(0) => Err("Batch size must be positive".to_string()),
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Batch size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("decoding")
                .long("decoding")
                .help("input decoding, malformed bytes are substituted")
                .takes_value(true)
                .default_value("utf8-lossy")
                .possible_values(InputDecoding::possible_values()),
        )
        .arg(
            clap::Arg::new("run_format")
                .long("run-format")
                .help("sorted chunks storage format")
                .takes_value(true)
                .default_value("text")
                .possible_values(RunFormat::possible_values()),
        )
        .arg(
            clap::Arg::new("rw_buf_size")
                .long("rw-buf-size")
                .help("chunk and output files read/write buffer size")
                .takes_value(true)
                .validator(|v| parse_buf_size(v).map(|_| ())),
        )
        .arg(
            clap::Arg::new("no_count")
                .long("no-count")
                .help("do not count input lines before processing"),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::parse_buf_size;

    #[rstest]
    #[case("64KiB", Some(65_536))]
    #[case("4096", Some(4_096))]
    #[case("lots", None)]
    fn test_parse_buf_size(#[case] value: &str, #[case] expected: Option<usize>) {
        assert_eq!(parse_buf_size(value).ok(), expected);
    }

    #[cfg(target_pointer_width = "32")]
    #[test]
    fn test_parse_buf_size_overflow() {
        assert!(parse_buf_size("8 GiB").is_err());
    }
}
