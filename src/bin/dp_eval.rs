// dp-eval: Offline evaluator for the raw-data correlation pipeline.
//
// Pushes named frame fixtures through a RawDataCorrelator for every
// requested (threads, pivot) combination and reports wall time, block
// count, and bytes processed.  Optionally persists a fixture as a
// binary-serialised block of response frames (a tool-local format: magic,
// frame count, then length-delimited messages).
//
// Exit codes: 0 success, 1 invalid config, 2 invalid argument.

use clap::{Arg, ArgAction, Command};
use dp_client::correlate::CorrelatorConfig;
use dp_client::models::DataFrame;
use dp_client::{ClientConfig, RawDataCorrelator, load_config_from_path};
use prost::Message;
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tracing::info;

const OUTPUT_MAGIC: &[u8; 5] = b"DPEV\x01";

fn validate_count(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) | Err(_) => Err("must be a positive integer".to_owned()),
        Ok(n) => Ok(n),
    }
}

fn validate_pivot(value: &str) -> Result<usize, String> {
    value
        .parse::<usize>()
        .map_err(|_| "must be a non-negative integer".to_owned())
}

fn main() {
    let matches = Command::new("dp-eval")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Correlation pipeline evaluator for the Data Platform client")
        .arg(
            Arg::new("fixture")
                .help("Fixture name(s): single_source_short_range, vertical_split, \
                       horizontal_split, grid, mixed_domains, wide")
                .value_name("fixture")
                .num_args(1..)
                .required(true),
        )
        .arg(
            Arg::new("threads")
                .help("Correlator thread count (repeatable)")
                .long("threads")
                .value_parser(validate_count)
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("pivot")
                .help("Concurrency pivot: buckets per frame before fan-out (repeatable)")
                .long("pivot")
                .value_parser(validate_pivot)
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("output")
                .help("Persist the fixture's frames to a file, or '-' for stdout")
                .long("output")
                .value_name("path"),
        )
        .arg(
            Arg::new("config")
                .help("Client config TOML (defaults apply when omitted)")
                .long("config")
                .value_name("path"),
        )
        .get_matches();

    let config = match matches.get_one::<String>("config") {
        Some(path) => match load_config_from_path(Path::new(path)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("FATAL: failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => ClientConfig::default(),
    };

    if config.query.logging.enabled {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new(config.query.logging.level.clone())
                }),
            )
            .init();
    }

    let thread_counts: Vec<usize> = matches
        .get_many::<usize>("threads")
        .map_or_else(|| vec![1], |v| v.copied().collect());
    let pivots: Vec<usize> = matches
        .get_many::<usize>("pivot")
        .map_or_else(|| vec![64], |v| v.copied().collect());

    println!(
        "{:<28} {:>7} {:>7} {:>9} {:>12} {:>10}",
        "fixture", "threads", "pivot", "blocks", "bytes", "elapsed"
    );
    for name in matches.get_many::<String>("fixture").expect("required") {
        let Some(frames) = fixtures::generate(name) else {
            eprintln!("FATAL: unknown fixture '{}'", name);
            std::process::exit(2);
        };
        info!(fixture = %name, frames = frames.len(), "fixture generated");

        if let Some(output) = matches.get_one::<String>("output") {
            if let Err(e) = persist(output, &frames) {
                eprintln!("FATAL: writing '{}': {}", output, e);
                std::process::exit(1);
            }
        }

        let decoded: Vec<DataFrame> = match frames
            .iter()
            .enumerate()
            .map(|(i, f)| DataFrame::from_wire(i, f.clone()))
            .collect()
        {
            Ok(decoded) => decoded,
            Err(e) => {
                eprintln!("FATAL: fixture '{}' does not decode: {}", name, e);
                std::process::exit(1);
            }
        };

        for &threads in &thread_counts {
            for &pivot in &pivots {
                match evaluate(&config, &decoded, threads, pivot) {
                    Ok((blocks, bytes, elapsed_us)) => println!(
                        "{:<28} {:>7} {:>7} {:>9} {:>12} {:>8}us",
                        name, threads, pivot, blocks, bytes, elapsed_us
                    ),
                    Err(e) => {
                        eprintln!("FATAL: correlating '{}': {}", name, e);
                        std::process::exit(1);
                    }
                }
            }
        }
    }
}

fn evaluate(
    config: &ClientConfig,
    frames: &[DataFrame],
    threads: usize,
    pivot: usize,
) -> Result<(usize, u64, u128), dp_client::DpError> {
    let correlator_config = CorrelatorConfig {
        concurrency_enabled: threads > 1,
        concurrency_pivot: pivot,
        max_threads: threads,
        allow_domain_collision: config.query.table.domain_collision,
        error_checking: config.query.table.error_checking,
    };
    let mut correlator = RawDataCorrelator::new(correlator_config)?;
    let started = Instant::now();
    for frame in frames {
        correlator.push_frame(frame)?;
    }
    let blocks = correlator.finish()?;
    Ok((
        blocks.len(),
        correlator.bytes_processed(),
        started.elapsed().as_micros(),
    ))
}

fn persist(target: &str, frames: &[dp_wire::QueryDataResponse]) -> std::io::Result<()> {
    let mut body = Vec::new();
    body.extend_from_slice(OUTPUT_MAGIC);
    body.extend_from_slice(&u32::try_from(frames.len()).unwrap_or(u32::MAX).to_le_bytes());
    for frame in frames {
        frame
            .encode_length_delimited(&mut body)
            .expect("vec write is infallible");
    }
    if target == "-" {
        std::io::stdout().write_all(&body)
    } else {
        std::fs::write(target, body)
    }
}

mod fixtures {
    //! Synthetic frame sets with known shapes, mirroring the end-to-end
    //! recovery scenarios plus two stress shapes.

    use dp_wire::{
        DataBucket, QueryDataResponse, SamplingClock, Timestamp, TimestampList, data_bucket,
    };

    const NANOS_PER_SEC: i64 = 1_000_000_000;

    pub fn generate(name: &str) -> Option<Vec<QueryDataResponse>> {
        match name {
            "single_source_short_range" => Some(uniform(&["src_1"], 0, NANOS_PER_SEC, 1_000)),
            "vertical_split" => {
                let mut frames = Vec::new();
                for slice in 0..4 {
                    let begin = slice * NANOS_PER_SEC;
                    let end = if slice == 3 {
                        4 * NANOS_PER_SEC
                    } else {
                        (slice + 1) * NANOS_PER_SEC - 1
                    };
                    frames.extend(uniform(&["src_1"], begin, end, 1_000));
                }
                Some(frames)
            }
            "horizontal_split" => Some(uniform(
                &["src_1", "src_2", "src_3", "src_4", "src_5"],
                0,
                NANOS_PER_SEC,
                1_000,
            )),
            "grid" => {
                let mut frames = Vec::new();
                for slice in 0..3 {
                    let begin = slice * NANOS_PER_SEC;
                    let end = if slice == 2 {
                        3 * NANOS_PER_SEC
                    } else {
                        (slice + 1) * NANOS_PER_SEC - 1
                    };
                    frames.extend(uniform(&["src_1", "src_2", "src_3"], begin, end, 1_000));
                    frames.extend(uniform(&["src_4", "src_5"], begin, end, 1_000));
                }
                Some(frames)
            }
            "mixed_domains" => Some(mixed_domains()),
            "wide" => {
                let sources: Vec<String> = (0..512).map(|i| format!("src_{i:03}")).collect();
                let names: Vec<&str> = sources.iter().map(String::as_str).collect();
                Some(uniform(&names, 0, 60 * NANOS_PER_SEC, 10))
            }
            _ => None,
        }
    }

    fn timestamp(total_nanos: i64) -> Timestamp {
        Timestamp {
            epoch_seconds: total_nanos.div_euclid(NANOS_PER_SEC),
            nanos: total_nanos.rem_euclid(NANOS_PER_SEC),
        }
    }

    /// One frame per source at `rate_hz` over the closed `[begin, end]`.
    fn uniform(sources: &[&str], begin: i64, end: i64, rate_hz: i64) -> Vec<QueryDataResponse> {
        let period = NANOS_PER_SEC / rate_hz;
        let count = (end - begin) / period + 1;
        sources
            .iter()
            .map(|source| QueryDataResponse {
                request_id: "eval".to_owned(),
                status: dp_wire::FrameStatus::Ok as i32,
                message: String::new(),
                buckets: vec![DataBucket {
                    source_name: (*source).to_owned(),
                    values: (0..count).map(|i| (i as f64).sin()).collect(),
                    timespec: Some(data_bucket::Timespec::Clock(SamplingClock {
                        start: Some(timestamp(begin)),
                        period_nanos: period,
                        count,
                    })),
                }],
            })
            .collect()
    }

    /// Many small frames over a spread of clock and list domains, enough
    /// buckets per frame to cross typical concurrency pivots.  Every frame
    /// carries its own time window, so no source collides within a domain.
    fn mixed_domains() -> Vec<QueryDataResponse> {
        let mut frames = Vec::new();
        for frame_index in 0i64..200 {
            let mut buckets = Vec::new();
            for bucket_index in 0i64..96 {
                let source = format!("pv_{bucket_index:02}");
                let domain = bucket_index % 8;
                let window = (frame_index * 8 + domain) * NANOS_PER_SEC;
                if domain == 7 {
                    buckets.push(DataBucket {
                        source_name: source,
                        values: vec![1.0, 2.0, 3.0],
                        timespec: Some(data_bucket::Timespec::List(TimestampList {
                            timestamps: vec![
                                timestamp(window),
                                timestamp(window + 10),
                                timestamp(window + 25),
                            ],
                        })),
                    });
                } else {
                    buckets.push(DataBucket {
                        source_name: source,
                        values: (0..50).map(f64::from).collect(),
                        timespec: Some(data_bucket::Timespec::Clock(SamplingClock {
                            start: Some(timestamp(window)),
                            period_nanos: 1_000_000,
                            count: 50,
                        })),
                    });
                }
            }
            frames.push(QueryDataResponse {
                request_id: "eval".to_owned(),
                status: dp_wire::FrameStatus::Ok as i32,
                message: String::new(),
                buckets,
            });
        }
        frames
    }
}
