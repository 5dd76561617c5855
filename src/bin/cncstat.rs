use clap::{App, Arg};
use seurat::cnc;
use seurat::util::semantic_version_to_string;
use seurat::{CncFile, CountersReader, ManyToOneRingBuffer, Result};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn main() -> Result<()> {
    env_logger::init();

    let matches = App::new("cncstat")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Inspect the CnC file of a running Aeron media driver")
        .arg(
            Arg::with_name("dir")
                .short("d")
                .long("dir")
                .value_name("DIR")
                .help("Aeron directory holding cnc.dat (defaults to $AERON_DIR or the platform default)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("file")
                .short("f")
                .long("file")
                .value_name("FILE")
                .help("Explicit path to a cnc.dat file (overrides --dir)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("counters")
                .short("c")
                .long("counters")
                .help("List allocated counters"),
        )
        .get_matches();

    let path = match matches.value_of("file") {
        Some(file) => PathBuf::from(file),
        None => {
            let dir = matches
                .value_of("dir")
                .map(PathBuf::from)
                .or_else(|| std::env::var_os("AERON_DIR").map(PathBuf::from))
                .unwrap_or_else(cnc::default_aeron_dir);
            dir.join(cnc::CNC_FILE)
        }
    };

    let cnc_file = CncFile::map(&path)?;
    let lengths = cnc_file.lengths();

    println!("CnC file: {}", path.display());
    println!(
        "version: {}",
        semantic_version_to_string(
            cnc_file
                .mapped_file()
                .buffer()
                .get_i32_volatile(cnc::CNC_VERSION_FIELD_OFFSET)
        )
    );
    println!("pid: {}", cnc_file.pid());
    println!("start timestamp (ms): {}", cnc_file.start_timestamp_ms());
    println!(
        "client liveness timeout: {} ns",
        cnc_file.client_liveness_timeout_ns()
    );
    println!("to-driver buffer: {} bytes", lengths.to_driver);
    println!("to-clients buffer: {} bytes", lengths.to_clients);
    println!("counters metadata: {} bytes", lengths.counters_metadata);
    println!("counters values: {} bytes", lengths.counters_values);
    println!("error log: {} bytes", lengths.error_log);

    let ring = ManyToOneRingBuffer::new(cnc_file.to_driver_buffer())?;
    let heartbeat_ms = ring.consumer_heartbeat_time_ms();
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    if heartbeat_ms > 0 {
        println!(
            "driver heartbeat age: {} ms (at {})",
            now_ms - heartbeat_ms,
            heartbeat_ms
        );
    } else {
        println!("driver heartbeat: not yet stamped");
    }

    if matches.is_present("counters") {
        let reader = CountersReader::new(
            cnc_file.counters_metadata_buffer(),
            cnc_file.counters_values_buffer(),
        );
        println!("allocated counters: {}", reader.allocated_count());
        let metadata_max = (lengths.counters_metadata / seurat::counters::METADATA_LENGTH) as i32 - 1;
        let max = reader.max_counter_id().min(metadata_max);
        for id in 0..=max {
            if reader.counter_state(id) == seurat::counters::RECORD_ALLOCATED {
                println!(
                    "  [{}] {} = {}",
                    id,
                    reader.counter_label(id),
                    reader.counter_value(id)
                );
            }
        }
    }

    Ok(())
}
