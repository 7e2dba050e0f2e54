use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use granular_codecs::rmpv::Value as Msgpack;
use granular_codecs::{Array, Registry, Tree, Value};
use granular_core::layout::SPEC_FILE;
use granular_core::{
    Datapoint, DatasetReader, Field, Query, ReaderConfig, ShardedDatasetReader, Spec,
};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "granular",
    about = "Inspect, verify, and randomly access granular datasets",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the spec, datapoint count, shard layout, and size on disk
    Info {
        /// Dataset directory or sharded dataset root
        dir: PathBuf,
    },
    /// Print one datapoint, decoding fields whose type tag has a codec
    Show {
        /// Dataset directory or sharded dataset root
        dir: PathBuf,
        /// Zero-based global datapoint index
        index: u64,
        /// Comma-separated keys to read (default: all)
        #[arg(short, long, value_delimiter = ',')]
        keys: Vec<String>,
    },
    /// Check that every shard's refs partition its key bags
    Verify {
        /// Dataset directory or sharded dataset root
        dir: PathBuf,
    },
    /// Benchmark random datapoint reads
    Bench {
        /// Dataset directory or sharded dataset root
        dir: PathBuf,
        /// Number of random datapoints to read
        #[arg(short, long, default_value_t = 1000)]
        count: u64,
        /// Fixed random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Fetch index entries from disk on every read instead of caching them
        #[arg(long)]
        no_cache: bool,
        /// Comma-separated keys to read (default: all)
        #[arg(short, long, value_delimiter = ',')]
        keys: Vec<String>,
    },
}

// ── Dataset access ─────────────────────────────────────────────────────────

/// A single dataset directory or a root of shard directories.
enum Source {
    Single(DatasetReader),
    Sharded(ShardedDatasetReader),
}

impl Source {
    fn open(dir: &Path, config: &ReaderConfig) -> anyhow::Result<Self> {
        if dir.join(SPEC_FILE).is_file() {
            debug!(dir = %dir.display(), "opening single dataset");
            let reader = DatasetReader::open(dir, config)
                .with_context(|| format!("opening dataset {:?}", dir))?;
            Ok(Source::Single(reader))
        } else {
            debug!(dir = %dir.display(), "opening sharded dataset");
            let reader = ShardedDatasetReader::open(dir, config)
                .with_context(|| format!("opening sharded dataset {:?}", dir))?;
            Ok(Source::Sharded(reader))
        }
    }

    fn len(&self) -> u64 {
        match self {
            Source::Single(r) => r.len(),
            Source::Sharded(r) => r.len(),
        }
    }

    fn spec(&self) -> Option<&Spec> {
        match self {
            Source::Single(r) => Some(r.spec()),
            Source::Sharded(r) => r.spec(),
        }
    }

    fn get(&mut self, d: u64, query: &Query) -> anyhow::Result<Datapoint> {
        let datapoint = match self {
            Source::Single(r) => r.get_with(d, query)?,
            Source::Sharded(r) => r.get_with(d, query)?,
        };
        Ok(datapoint)
    }

    fn verify(&mut self) -> anyhow::Result<()> {
        match self {
            Source::Single(r) => r.verify()?,
            Source::Sharded(r) => r.verify()?,
        }
        Ok(())
    }

    fn size(&self) -> anyhow::Result<u64> {
        let size = match self {
            Source::Single(r) => r.size()?,
            Source::Sharded(r) => r.size()?,
        };
        Ok(size)
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

/// Query for `keys`, or every spec key when `keys` is empty.
fn build_query(spec: Option<&Spec>, keys: &[String]) -> Query {
    if keys.is_empty() {
        Query::keys(spec.into_iter().flat_map(|s| s.keys()))
    } else {
        Query::keys(keys.iter().cloned())
    }
}

fn hex_preview(bytes: &[u8]) -> String {
    let shown: Vec<String> = bytes.iter().take(32).map(|b| format!("{:02x}", b)).collect();
    if bytes.len() > 32 {
        format!("{} ... ({} bytes)", shown.join(" "), bytes.len())
    } else {
        format!("{} ({} bytes)", shown.join(" "), bytes.len())
    }
}

fn describe_value(value: &Value) -> String {
    match value {
        Value::Bytes(b) => hex_preview(b),
        Value::Text(s) => format!("{:?}", s),
        Value::Int(n) => n.to_string(),
        Value::Json(tree) => tree.to_string(),
        Value::Msgpack(inner) => describe_msgpack(inner),
        Value::Array(array) => describe_array(array),
        Value::Tree(tree) => describe_tree(tree),
        Value::List(items) => {
            let inner: Vec<String> = items.iter().map(describe_value).collect();
            format!("[{}]", inner.join(", "))
        }
    }
}

fn describe_array(array: &Array) -> String {
    format!("array {} {:?} ({} bytes)", array.dtype, array.shape, array.data.len())
}

/// Like msgpack's own display, but binary payloads as a hex preview.
fn describe_msgpack(value: &Msgpack) -> String {
    match value {
        Msgpack::Binary(bytes) => hex_preview(bytes),
        Msgpack::String(text) => match text.as_str() {
            Some(text) => format!("{:?}", text),
            None => hex_preview(text.as_bytes()),
        },
        Msgpack::Array(items) => {
            let inner: Vec<String> = items.iter().map(describe_msgpack).collect();
            format!("[{}]", inner.join(", "))
        }
        Msgpack::Map(entries) => {
            let inner: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{}: {}", describe_msgpack(k), describe_msgpack(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
        other => other.to_string(),
    }
}

fn describe_tree(tree: &Tree) -> String {
    match tree {
        Tree::Leaf(value) => describe_msgpack(value),
        Tree::Array(array) => describe_array(array),
        Tree::List(items) => {
            let inner: Vec<String> = items.iter().map(describe_tree).collect();
            format!("[{}]", inner.join(", "))
        }
        Tree::Map(entries) => {
            let inner: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{:?}: {}", k, describe_tree(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
    }
}

fn describe_raw(field: &Field) -> String {
    match field {
        Field::Scalar(bytes) => hex_preview(bytes),
        Field::List(items) => {
            let inner: Vec<String> = items.iter().map(|b| hex_preview(b)).collect();
            format!("[{}]", inner.join(", "))
        }
    }
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_info(dir: PathBuf) -> anyhow::Result<()> {
    let source = Source::open(&dir, &ReaderConfig::default())?;

    println!("=== granular dataset: {:?} ===", dir);
    println!();
    match &source {
        Source::Single(_) => println!("  layout         : single dataset"),
        Source::Sharded(r) => {
            println!("  layout         : sharded");
            println!("  shards         : {}", r.shards());
        }
    }
    println!("  datapoints     : {}", source.len());
    println!("  size on disk   : {}", human_bytes(source.size()?));

    if let Some(spec) = source.spec() {
        println!();
        println!("  {:<24}  {}", "key", "type");
        println!("  {}", "-".repeat(40));
        for (key, tag) in spec.iter() {
            println!("  {:<24}  {}", key, tag);
        }
    }

    if let Source::Sharded(r) = &source {
        println!();
        println!("  {:>8}  {:>12}", "shard", "datapoints");
        for (index, len) in r.shard_indices().into_iter().zip(r.shard_lengths()) {
            println!("  {:>8}  {:>12}", index, len);
        }
    }
    Ok(())
}

fn run_show(dir: PathBuf, index: u64, keys: Vec<String>) -> anyhow::Result<()> {
    let mut source = Source::open(&dir, &ReaderConfig::default())?;
    let spec = source
        .spec()
        .cloned()
        .context("dataset has no shards")?;
    let query = build_query(Some(&spec), &keys);

    let t0 = Instant::now();
    let datapoint = source.get(index, &query)?;
    let elapsed = t0.elapsed();

    let registry = Registry::default();
    println!("--- datapoint {} ({:.3}ms) ---", index, elapsed.as_secs_f64() * 1000.0);
    for (key, field) in &datapoint {
        let tag = spec.tag(key).unwrap_or("?");
        let single = Datapoint::from([(key.clone(), field.clone())]);
        let shown = match registry.decode(&spec, &single) {
            Ok(decoded) => decoded.get(key).map(describe_value).unwrap_or_default(),
            Err(err) => {
                debug!(key = %key, error = %err, "showing raw bytes");
                describe_raw(field)
            }
        };
        println!("  {} ({}): {}", key, tag, shown);
    }
    Ok(())
}

fn run_verify(dir: PathBuf) -> anyhow::Result<()> {
    let mut source = Source::open(&dir, &ReaderConfig::default())?;
    let t0 = Instant::now();
    source.verify().with_context(|| format!("verifying {:?}", dir))?;
    println!(
        "ok: {} datapoints verified in {:.3}s",
        source.len(),
        t0.elapsed().as_secs_f64()
    );
    Ok(())
}

fn run_bench(dir: PathBuf, count: u64, seed: u64, no_cache: bool, keys: Vec<String>) -> anyhow::Result<()> {
    let config = ReaderConfig {
        cache_index: !no_cache,
        ..Default::default()
    };
    let t_open = Instant::now();
    let mut source = Source::open(&dir, &config)?;
    let open_elapsed = t_open.elapsed();
    let len = source.len();

    if len == 0 {
        anyhow::bail!("dataset has no datapoints");
    }
    let query = build_query(source.spec(), &keys);

    // Simple LCG for reproducible random indices (no external dep)
    let indices: Vec<u64> = {
        let mut rng = seed;
        (0..count)
            .map(|_| {
                rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (rng >> 33) % len
            })
            .collect()
    };

    eprintln!("benchmarking {} random datapoint reads across {} datapoints...", count, len);

    let t0 = Instant::now();
    let mut total_bytes = 0u64;
    let mut latencies_us: Vec<u64> = Vec::with_capacity(count as usize);

    for &d in &indices {
        let t = Instant::now();
        let datapoint = source.get(d, &query)?;
        latencies_us.push(t.elapsed().as_micros() as u64);
        total_bytes += datapoint
            .values()
            .map(|field| match field {
                Field::Scalar(b) => b.len() as u64,
                Field::List(items) => items.iter().map(|b| b.len() as u64).sum(),
            })
            .sum::<u64>();
    }

    let elapsed = t0.elapsed();
    if latencies_us.is_empty() {
        return Ok(());
    }
    latencies_us.sort_unstable();

    let p50 = latencies_us[latencies_us.len() / 2];
    let p95 = latencies_us[(latencies_us.len() as f64 * 0.95) as usize];
    let p99 = latencies_us[(latencies_us.len() as f64 * 0.99) as usize];
    let min = latencies_us[0];
    let max = latencies_us[latencies_us.len() - 1];

    println!();
    println!("=== Random Datapoint Access Benchmark ===");
    println!("  index cache : {}", if no_cache { "off" } else { "on" });
    println!("  open        : {:.3}ms", open_elapsed.as_secs_f64() * 1000.0);
    println!("  reads       : {}", count);
    println!("  total bytes : {}", human_bytes(total_bytes));
    println!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    println!(
        "  throughput  : {}/s",
        human_bytes((total_bytes as f64 / elapsed.as_secs_f64()) as u64)
    );
    println!("  latency:");
    println!("    min  : {} µs", min);
    println!("    p50  : {} µs", p50);
    println!("    p95  : {} µs", p95);
    println!("    p99  : {} µs", p99);
    println!("    max  : {} µs", max);

    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Info { dir } => run_info(dir),
        Commands::Show { dir, index, keys } => run_show(dir, index, keys),
        Commands::Verify { dir } => run_verify(dir),
        Commands::Bench {
            dir,
            count,
            seed,
            no_cache,
            keys,
        } => run_bench(dir, count, seed, no_cache, keys),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_picks_units() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.00 KB");
        assert_eq!(human_bytes(3 * 1024 * 1024), "3.00 MB");
    }

    #[test]
    fn empty_key_list_selects_whole_spec() {
        let spec = Spec::new([("a", "bytes"), ("b", "utf8[]")]).unwrap();
        assert_eq!(build_query(Some(&spec), &[]), Query::keys(["a", "b"]));
        assert_eq!(build_query(Some(&spec), &["b".to_string()]), Query::keys(["b"]));
    }

    #[test]
    fn hex_preview_truncates_long_payloads() {
        assert_eq!(hex_preview(b"\x00\xff"), "00 ff (2 bytes)");
        assert!(hex_preview(&[7u8; 40]).ends_with("... (40 bytes)"));
    }

    #[test]
    fn nested_values_show_arrays_and_binary_compactly() {
        let array = Array::new("<f4", vec![2, 2], vec![0; 16]).unwrap();
        let tree = Tree::Map(vec![
            ("step".into(), Tree::Leaf(Msgpack::from(3u64))),
            ("obs".into(), Tree::Array(array)),
        ]);
        assert_eq!(
            describe_value(&Value::Tree(tree)),
            r#"{"step": 3, "obs": array <f4 [2, 2] (16 bytes)}"#
        );

        let blob = Msgpack::Array(vec![Msgpack::from("id"), Msgpack::Binary(vec![0xab; 40])]);
        let shown = describe_value(&Value::Msgpack(blob));
        assert!(shown.starts_with(r#"["id", ab ab"#), "{shown}");
        assert!(shown.ends_with("(40 bytes)]"), "{shown}");
    }
}
