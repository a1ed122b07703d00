use std::error::Error;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, error::ErrorKind};
use tracing::info;

use crate::config::PipelineConfig;
use crate::constants::encoder::DEFAULT_BYTE_BUDGET;
use crate::lookup::{FixtureLookup, Lookup, OfflineLookup};
use crate::pipeline::{IngestRequest, IngestionPipeline, cluster_payload};
use crate::store::ClusterStore;
use crate::transport::InputFile;

#[derive(Debug, Parser)]
#[command(
    name = "imei-clusters",
    disable_help_subcommand = true,
    about = "Ingest IMEI inventory files into clusters",
    long_about = "Group IMEI inventory CSV files (raw or zipped), reconcile each id with an upstream lookup, store the result as a cluster, and encode byte-budgeted cluster summaries.",
    after_help = "The store defaults to .imei_clusters/clusters.bin; --store accepts a file or a directory."
)]
/// CLI for `imei-clusters`.
///
/// Common usage:
/// - Count ids only: `imei-clusters ingest lote.csv --no-cluster`
/// - Ingest with an offline fixture: `imei-clusters ingest lote.zip --lookup-fixture upstream.json`
/// - Encode a summary: `imei-clusters payload <CLUSTER_ID> --out payload.json`
struct ImeiClustersCli {
    #[arg(
        long = "store",
        value_name = "STORE_PATH",
        global = true,
        help = "Cluster store file or directory"
    )]
    store: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Group, reconcile, and store an input file.
    Ingest(IngestArgs),
    /// List stored clusters.
    List,
    /// Print a cluster with its rows as JSON.
    Show {
        #[arg(value_name = "CLUSTER_ID")]
        cluster_id: String,
        #[arg(long, help = "Include every stored column")]
        detailed: bool,
    },
    /// Write the byte-budgeted summary payload of a cluster.
    Payload {
        #[arg(value_name = "CLUSTER_ID")]
        cluster_id: String,
        #[arg(
            long,
            default_value_t = DEFAULT_BYTE_BUDGET,
            value_parser = parse_positive_usize,
            help = "Maximum payload size in bytes"
        )]
        budget: usize,
        #[arg(long, value_name = "FILE", help = "Write payload bytes to FILE instead of stdout")]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
struct IngestArgs {
    #[arg(value_name = "FILE", help = "A .csv file or a .zip archive containing one")]
    input: PathBuf,
    #[arg(long, help = "Cluster name (defaults to one derived from the file name)")]
    name: Option<String>,
    #[arg(long, help = "Cluster description")]
    description: Option<String>,
    #[arg(long = "no-cluster", help = "Only group and count ids")]
    no_cluster: bool,
    #[arg(
        long = "lookup-fixture",
        value_name = "JSON",
        help = "JSON object mapping ids to upstream responses; without it every lookup fails"
    )]
    lookup_fixture: Option<PathBuf>,
    #[arg(
        long,
        value_parser = parse_positive_usize,
        help = "Lookup worker threads"
    )]
    workers: Option<usize>,
    #[arg(long = "encoding", value_name = "LABEL", help = "Primary input encoding")]
    primary_encoding: Option<String>,
    #[arg(
        long = "fallback-encoding",
        value_name = "LABEL",
        help = "Encoding tried when the primary one fails"
    )]
    fallback_encoding: Option<String>,
}

/// Run the command line front end with `args_iter` (program name excluded).
///
/// Reports and payloads go to `out`; logging follows `RUST_LOG`.
pub fn run<I>(args_iter: I, out: &mut dyn Write) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();

    let Some(cli) = parse_cli::<ImeiClustersCli, _>(
        std::iter::once("imei-clusters".to_string()).chain(args_iter),
    )?
    else {
        return Ok(());
    };

    let store = ClusterStore::open(cli.store.unwrap_or_else(ClusterStore::default_path))?;
    match cli.command {
        Command::Ingest(args) => run_ingest(&store, args, out),
        Command::List => {
            for cluster in store.list_clusters()? {
                writeln!(
                    out,
                    "{}\t{}\t{}\t{}",
                    cluster.id,
                    cluster.record_count,
                    cluster.created_at.to_rfc3339(),
                    cluster.name
                )?;
            }
            Ok(())
        }
        Command::Show {
            cluster_id,
            detailed,
        } => {
            let details = store
                .cluster_details(&cluster_id, detailed)?
                .ok_or_else(|| format!("unknown cluster '{cluster_id}'"))?;
            writeln!(out, "{}", serde_json::to_string_pretty(&details)?)?;
            Ok(())
        }
        Command::Payload {
            cluster_id,
            budget,
            out: target,
        } => {
            let config = PipelineConfig::default().with_byte_budget(budget);
            let payload = cluster_payload(&store, &cluster_id, &config)?
                .ok_or_else(|| format!("unknown cluster '{cluster_id}'"))?;
            info!(
                cluster_id = %cluster_id,
                tier = %payload.tier,
                bytes = payload.len(),
                within_budget = payload.within_budget,
                error_correction = ?payload.error_correction,
                "encoded payload"
            );
            match target {
                Some(path) => fs::write(path, &payload.bytes)?,
                None => {
                    out.write_all(&payload.bytes)?;
                    writeln!(out)?;
                }
            }
            Ok(())
        }
    }
}

fn run_ingest(
    store: &ClusterStore,
    args: IngestArgs,
    out: &mut dyn Write,
) -> Result<(), Box<dyn Error>> {
    let mut config = PipelineConfig::default();
    if let Some(workers) = args.workers {
        config = config.with_lookup_workers(workers);
    }
    if args.primary_encoding.is_some() || args.fallback_encoding.is_some() {
        let primary = args
            .primary_encoding
            .unwrap_or_else(|| config.primary_encoding.clone());
        let fallback = args
            .fallback_encoding
            .unwrap_or_else(|| config.fallback_encoding.clone());
        config = config.with_encodings(primary, fallback);
    }

    let fixture = args
        .lookup_fixture
        .as_ref()
        .map(FixtureLookup::from_json_file)
        .transpose()?;
    let lookup: &dyn Lookup = match &fixture {
        Some(fixture) => fixture,
        None => &OfflineLookup,
    };

    let input = InputFile::from_path(&args.input)?;
    let request = if args.no_cluster {
        IngestRequest::count_only()
    } else {
        IngestRequest::with_cluster(args.name.as_deref(), args.description.as_deref())
    };
    let pipeline = IngestionPipeline::new(config, lookup, store)?;
    let report = pipeline.ingest(&input, &request)?;
    writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
    Ok(())
}

fn parse_positive_usize(raw: &str) -> Result<usize, String> {
    let parsed = raw
        .parse::<usize>()
        .map_err(|_| format!("Could not parse '{}' as a positive integer", raw))?;
    if parsed == 0 {
        return Err("value must be greater than zero".to_string());
    }
    Ok(parsed)
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}
