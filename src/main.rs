use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{
    fmt::{format::FmtSpan, Subscriber},
    prelude::*,
    EnvFilter,
};

use geotag_tweets::config::Config;
use geotag_tweets::driver::Driver;
use geotag_tweets::errors::display_causes_and_backtrace;
use geotag_tweets::gazetteer::{Gazetteer, MemoryGazetteer};
use geotag_tweets::geometry::AreaIndex;
use geotag_tweets::reference::ReferenceData;
use geotag_tweets::scorer::Scorer;
use geotag_tweets::sink::JsonLinesSink;
use geotag_tweets::store::JsonLinesStore;
use geotag_tweets::Result;

/// Our command-line arguments.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "geotag a stream of short social-media messages"
)]
struct Opt {
    /// A JSON file with scoring and resolution settings. Defaults apply
    /// for anything omitted.
    #[arg(long = "config")]
    config_path: Option<PathBuf>,

    /// The gazetteer index: a JSON object mapping each lower-cased name
    /// to its candidate entries.
    #[arg(long = "gazetteer")]
    gazetteer_path: PathBuf,

    /// The reference bundle: tags, common words, administrative names,
    /// timezone sets, continent membership.
    #[arg(long = "reference")]
    reference_path: PathBuf,

    /// GeoJSON feature collection with country and continent polygons.
    /// Without it, coordinate evidence for non-towns scores zero.
    #[arg(long = "areas")]
    areas_path: Option<PathBuf>,

    /// JSON-lines file of input messages.
    #[arg(long = "messages")]
    messages_path: PathBuf,

    /// JSON-lines file the per-message assignments are appended to.
    #[arg(long = "assignments-out")]
    assignments_path: PathBuf,

    /// File the real-time resolution table is rewritten into on each
    /// pass.
    #[arg(long = "resolution-table-out")]
    resolution_table_path: Option<PathBuf>,

    /// Start of the historic analysis (RFC 3339, e.g.
    /// 2016-01-01T00:00:00Z).
    #[arg(long = "start")]
    start: DateTime<Utc>,

    /// End of the historic analysis (RFC 3339). Open-ended if absent.
    #[arg(long = "end")]
    end: Option<DateTime<Utc>>,

    /// Keep tagging in real time once the historic range is done.
    #[arg(long = "realtime")]
    realtime: bool,

    /// How many times to retry a failed commit. Each retry waits twice
    /// as long as the last.
    #[arg(long = "max-retries", default_value = "4")]
    max_retries: u8,
}

// Our main entrypoint. Kept as a thin shell around `run` so we can print
// the full error chain (causes and backtrace included) before exiting
// non-zero.
#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        display_causes_and_backtrace(&err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Configure tracing.
    let filter = EnvFilter::from_default_env();
    Subscriber::builder()
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_env_filter(filter)
        .finish()
        .init();
    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let opt = Opt::parse();
    let config = match &opt.config_path {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };

    let reference = Arc::new(
        ReferenceData::from_path(&opt.reference_path, config.n_most_common_words)
            .context("could not load the reference bundle")?,
    );
    let gazetteer: Arc<dyn Gazetteer> = Arc::new(
        MemoryGazetteer::from_path(&opt.gazetteer_path)
            .context("could not load the gazetteer index")?,
    );
    let areas = Arc::new(match &opt.areas_path {
        Some(path) => AreaIndex::from_geojson_file(path)
            .context("could not load administrative areas")?,
        None => AreaIndex::new(),
    });

    let scorer = Scorer::new(gazetteer, reference, areas, &config);
    let store = Box::new(JsonLinesStore::new(opt.messages_path.clone()));
    let sink = Box::new(JsonLinesSink::new(
        opt.assignments_path.clone(),
        opt.resolution_table_path.clone(),
    ));
    let mut driver = Driver::new(scorer, store, sink, &config, opt.max_retries);
    driver.run(opt.start, opt.end, opt.realtime).await
}
