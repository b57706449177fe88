mod config;

use std::sync::Arc;

use anyhow::Context;
use ferry_upload::{
    ByteSource, FileSource, StaticCredential, TracingListener, TransportClient, UploadOrchestrator,
};
use tracing::{info, warn};

use crate::config::Config;

const USAGE: &str = "usage: ferry <file> [session-id-to-resume]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_upload=info,ferry_cli=info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };
    let resume = args.next();

    let config = Config::from_env()?;
    let source = FileSource::open(&path)
        .await
        .with_context(|| format!("cannot open {path}"))?;
    info!(
        file = %source.path().display(),
        size = source.len(),
        endpoint = %config.endpoint,
        "starting upload"
    );

    let transport = TransportClient::new(&config.endpoint, Arc::new(StaticCredential::new(config.token)))?
        .with_timeout(config.options.network_timeout);
    let options = config.options.with_listener(Arc::new(TracingListener));

    // Ctrl+C cancels; the upload task observes it at the next check.
    let cancel = options.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling upload");
            cancel.cancel();
        }
    });

    let orchestrator = UploadOrchestrator::new(transport);
    let result = match resume {
        Some(session_id) => orchestrator.resume(&session_id, &source, &options).await,
        None => {
            orchestrator
                .upload(&source, &source.file_name(), &options)
                .await
        }
    };

    match result {
        Ok(done) => {
            println!("{}", done.file_url);
            Ok(())
        }
        Err(e) => {
            if let Some(session_id) = e.session_id.as_deref().filter(|_| !e.is_cancelled()) {
                eprintln!("resume with: ferry {path} {session_id}");
            }
            Err(e.into())
        }
    }
}
