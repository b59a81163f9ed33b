use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use podium_auth::cli::{parse_command, run, USAGE};
use podium_auth::config::SessionConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging; warn by default so command output stays readable
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("warn"))?;
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cmd = match parse_command(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };
    let cfg = SessionConfig::from_env().apply_args(&args)?;
    info!(
        target: "podium_auth",
        "podium-auth starting: api_url='{}', idp_url='{}', store='{}', exchange_on_bootstrap={}",
        cfg.api_url,
        cfg.idp_url,
        cfg.store_path.display(),
        cfg.exchange_on_bootstrap
    );

    run(cfg, cmd).await
}
