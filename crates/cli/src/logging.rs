use std::fs::OpenOptions;
use std::path::PathBuf;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

fn default_filter(verbose: bool) -> EnvFilter {
	EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		if verbose {
			EnvFilter::new("ybm_allowlist=debug,ybm_allowlist_client=debug,ybm_allowlist_cli=debug,info")
		} else {
			EnvFilter::new("ybm_allowlist=info,ybm_allowlist_cli=info,warn")
		}
	})
}

/// Installs the global subscriber. Stdout is reserved for command output.
pub fn setup_tracing(verbose: bool) {
	// YBM_LOG_DIR redirects logs to a per-process file
	if let Some(log_dir) = std::env::var("YBM_LOG_DIR").ok().map(PathBuf::from)
		&& std::fs::create_dir_all(&log_dir).is_ok()
	{
		let log_path = log_dir.join(format!("ybm-allowlist.{}.log", std::process::id()));

		if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
			let file_layer = tracing_subscriber::fmt::layer()
				.with_writer(file)
				.with_ansi(false)
				.with_span_events(FmtSpan::CLOSE)
				.with_target(true);

			tracing_subscriber::registry()
				.with(default_filter(verbose))
				.with(file_layer)
				.init();

			tracing::info!(path = ?log_path, "cli.tracing.file");
			return;
		}
	}

	tracing_subscriber::fmt()
		.with_env_filter(default_filter(verbose))
		.with_writer(std::io::stderr)
		.init();
}
