//! `ingestd` is a thin reference entrypoint: it wires the ingestion pipeline
//! (`ingest_core`), its Postgres binding (`ingest_sql`), and the usage
//! recorder sidecar (`ingest_usage`) together, and feeds one event payload
//! read from stdin through them. Actual HTTP routing, auth, and
//! configuration loading belong to the surrounding deployment, not here --
//! this binary exists to prove the pieces compose, the way an integration
//! smoke test would.

use std::io::Read as _;

use anyhow::Context;
use clap::Parser;

use ingest_core::config::IngestConfig;
use ingest_sql::{PgRepository, PgUsageStore};
use ingest_usage::{RecorderConfig, UsageRecorder};

#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// URL of the Postgres database backing the ingest pipeline.
    #[clap(long = "database", env = "DATABASE_URL")]
    database_url: String,
    /// Host used to validate and render canonical `@id` URIs.
    #[clap(long, env = "NODE_DOMAIN", default_value = "example.dev")]
    node_domain: String,
    /// When set, a missing `image` forces an event to review.
    #[clap(long, env = "REQUIRE_IMAGE")]
    require_image: bool,
    /// Similarity cutoff for near-duplicate detection; 0 disables the layer.
    #[clap(long, env = "NEAR_DUPLICATE_THRESHOLD", default_value = "0.92")]
    near_duplicate_threshold: f64,
    /// IANA zone assumed for occurrences that omit one.
    #[clap(long, env = "DEFAULT_TIMEZONE", default_value = "America/Toronto")]
    default_timezone: String,
    /// Identifies the API key this invocation's usage is recorded under.
    #[clap(long, env = "API_KEY_ID", default_value = "local")]
    api_key_id: String,
}

fn main() -> Result<(), anyhow::Error> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let args = Args::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<(), anyhow::Error> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&args.database_url)
        .await
        .context("connecting to the ingest database")?;

    let repo = PgRepository::new(pool.clone());
    let usage = UsageRecorder::start(PgUsageStore::new(pool), RecorderConfig::default());

    let config = IngestConfig {
        require_image: args.require_image,
        near_duplicate_threshold: args.near_duplicate_threshold,
        default_timezone: args.default_timezone,
        node_domain: args.node_domain,
    };

    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("reading event payload from stdin")?;
    let payload: serde_json::Value = serde_json::from_str(&raw).context("parsing event payload as JSON")?;

    let result = ingest_core::ingest(&repo, &config, &payload, None, false, chrono::Utc::now()).await;
    usage.record_request(&args.api_key_id, result.is_err());

    match result {
        Ok(outcome) => {
            tracing::info!(?outcome, "ingest completed");
            println!("{}", serde_json::to_string_pretty(&IngestResultView::from(outcome))?);
        }
        Err(err) => {
            tracing::error!(error = %err, "ingest failed");
            usage.close().await;
            return Err(err.into());
        }
    }

    usage.close().await;
    Ok(())
}

#[derive(Debug, serde::Serialize)]
struct IngestResultView {
    event_id: String,
    created: bool,
    needs_review: bool,
}

impl From<ingest_core::IngestOutcome> for IngestResultView {
    fn from(outcome: ingest_core::IngestOutcome) -> Self {
        IngestResultView {
            event_id: outcome.event_id.to_string(),
            created: outcome.created,
            needs_review: outcome.needs_review,
        }
    }
}
