use anyhow::{Context, Result, bail};
use std::env;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use addrcount::config::CountOptions;
use addrcount::counting::count_unique_report;
use addrcount::runtime;

struct RunArgs {
    input: PathBuf,
    output: PathBuf,
}

fn usage() -> ! {
    eprintln!(
        "usage: addrcount <addresses.txt> <count_out.txt>\n\
         \n\
         tuning (environment):\n  \
         ADDRCOUNT_SIZE_THRESHOLD_BYTES  exact/sharded switch (default 50 MiB)\n  \
         ADDRCOUNT_BYTES_PER_SHARD       input bytes per shard (default 350 MiB)\n  \
         ADDRCOUNT_STRATEGY              auto | exact | sharded[:N]\n  \
         ADDRCOUNT_POLICY                strict | lenient\n  \
         ADDRCOUNT_TMPDIR                parent dir for shard files\n  \
         ADDRCOUNT_THREADS               shard worker threads\n  \
         ADDRCOUNT_TIMEOUT_SECS          limit for the sharded path\n  \
         ADDRCOUNT_MAX_RSS_{{BYTES,MB,GB}} memory ceiling\n  \
         ADDRCOUNT_PROGRESS              1 to draw progress bars"
    );
    std::process::exit(1);
}

fn parse_args() -> Result<RunArgs> {
    let mut args = env::args().skip(1);
    let first = args.next().unwrap_or_else(|| usage());
    if first == "-h" || first == "--help" {
        usage();
    }
    let output = args.next().unwrap_or_else(|| usage());
    if args.next().is_some() {
        usage();
    }

    let input = PathBuf::from(first);
    if !input.is_file() {
        bail!("input {:?} is not a readable file", input);
    }

    Ok(RunArgs {
        input,
        output: PathBuf::from(output),
    })
}

fn write_count(path: &Path, count: u64) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
        }
    }
    std::fs::write(path, count.to_string())
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_logging();
    runtime::configure_thread_pool();

    let args = parse_args()?;
    let opts = CountOptions::from_env();
    info!(input = %args.input.display(), ?opts, "counting");

    let report = count_unique_report(&args.input, &opts)
        .with_context(|| format!("count unique addresses in {}", args.input.display()))?;

    write_count(&args.output, report.unique)?;
    info!(
        unique = report.unique,
        lines = report.lines,
        path = ?report.path_taken,
        shards = report.shards,
        output = %args.output.display(),
        "done"
    );
    Ok(())
}
