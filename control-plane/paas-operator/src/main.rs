use envconfig::Envconfig;
use paas_operator::{config::OperatorConfig, init_tracing, runtime};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    // Ensure rustls uses the aws-lc-rs provider explicitly.
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::aws_lc_rs::default_provider(),
    ) {
        tracing::debug!(
            ?e,
            "CryptoProvider already installed or incompatible; proceeding"
        );
    }

    let cfg = OperatorConfig::init_from_env()?;
    cfg.validate()?;
    info!(?cfg, "Starting Paas operator");

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("ctrl-c received; shutting down"),
            Err(e) => {
                warn!(error = %e, "cannot listen for ctrl-c");
                return;
            }
        }
        on_signal.cancel();
    });

    runtime::run_with_backend(cfg, shutdown).await
}
