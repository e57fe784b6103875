//! `ybm-allowlist` binary.
//!
//! Maintains versioned allow lists on YugabyteDB Managed:
//! - `update` ensures the latest version of a prefix permits the given entries
//! - `show` prints the latest version of a prefix
//! - `purge` detaches and deletes every version of a prefix
//!
//! Results are printed as JSON on stdout; logs go to stderr.

mod logging;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use ybm_allowlist::version::{VERSION_DELIMITER, parse_versioned_name};
use ybm_allowlist::{AllowList, Outcome, Reconciler, ReconciliationRequest};
use ybm_allowlist_client::YbmClient;

use crate::settings::{Overrides, Settings};

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "ybm-allowlist", version)]
#[command(about = "Versioned allow lists for YugabyteDB Managed clusters")]
struct Args {
	/// TOML settings file
	#[arg(short, long, value_name = "PATH", global = true)]
	config: Option<PathBuf>,

	#[command(flatten)]
	overrides: Overrides,

	/// Verbose logging
	#[arg(short, long, global = true)]
	verbose: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Make the latest version of PREFIX permit ENTRIES, creating a new version if needed
	Update {
		#[arg(value_parser = parse_prefix)]
		prefix: String,

		/// IP addresses or CIDR blocks, space or comma separated
		#[arg(value_delimiter = ',')]
		entries: Vec<String>,

		/// Cluster that must be associated with the latest version
		#[arg(long, value_name = "CLUSTER_ID")]
		cluster: Option<String>,
	},
	/// Print the latest version of PREFIX
	Show {
		#[arg(value_parser = parse_prefix)]
		prefix: String,
	},
	/// Detach every version of PREFIX from its clusters and delete them
	Purge {
		#[arg(value_parser = parse_prefix)]
		prefix: String,
	},
}

/// A prefix names a lineage, so it must not itself look like a version.
fn parse_prefix(raw: &str) -> Result<String, String> {
	if raw.is_empty() {
		return Err("prefix must not be empty".into());
	}
	if raw.chars().any(char::is_whitespace) {
		return Err("prefix must not contain whitespace".into());
	}
	if let Some((base, _)) = raw.rsplit_once(VERSION_DELIMITER)
		&& matches!(parse_versioned_name(raw, base), Ok(Some(_)) | Err(_))
	{
		return Err(format!("prefix must not end in `{VERSION_DELIMITER}<number>`; did you mean `{base}`?"));
	}
	Ok(raw.to_owned())
}

#[derive(Serialize)]
struct UpdateOutput<'a> {
	created: bool,
	allow_list: &'a AllowList,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}

fn connect(settings: &Settings) -> anyhow::Result<Reconciler<YbmClient>> {
	let client = YbmClient::new(&settings.client_config()?).context("building HTTP client")?;
	Ok(Reconciler::new(Arc::new(client), settings.reconcile_config()))
}

async fn run(args: Args) -> anyhow::Result<()> {
	let settings = match &args.config {
		Some(path) => Settings::load(path)?,
		None => Settings::default(),
	}
	.merge(&args.overrides);

	match args.command {
		Command::Update { prefix, entries, cluster } => {
			// Entries are checked before any credential is required.
			let mut request = ReconciliationRequest::new(prefix, &entries)?;
			if let Some(cluster) = cluster {
				request = request.with_cluster(cluster);
			}
			let outcome = connect(&settings)?
				.reconcile(&request)
				.await
				.with_context(|| format!("updating allow list `{}`", request.prefix))?;
			let created = matches!(outcome, Outcome::Created(_));
			info!(created, name = %outcome.allow_list().name, "cli.update.done");
			print_json(&UpdateOutput {
				created,
				allow_list: outcome.allow_list(),
			})
		}
		Command::Show { prefix } => {
			let latest = connect(&settings)?
				.latest(&prefix)
				.await
				.with_context(|| format!("reading allow list `{prefix}`"))?
				.with_context(|| format!("no allow list found for prefix `{prefix}`"))?;
			print_json(&latest)
		}
		Command::Purge { prefix } => {
			let report = connect(&settings)?
				.purge(&prefix)
				.await
				.with_context(|| format!("purging allow list `{prefix}`"))?;
			info!(detached = report.detached.len(), deleted = report.deleted.len(), "cli.purge.done");
			print_json(&report)
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	logging::setup_tracing(args.verbose);

	run(args).await
}
