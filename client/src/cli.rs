use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::api::CandlepinApi;
use crate::config::Settings;
use crate::importer::Importer;
use crate::records;

#[derive(Parser, Debug)]
#[command(name = "import-test-data")]
#[command(about = "Carga usuarios, owners y activation keys de prueba en Candlepin")]
struct Cli {
    /// Log en modo debug
    #[arg(short, long)]
    verbose: bool,

    /// Máximo de llamadas REST en paralelo (pisa IMPORT_CONCURRENCY)
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Archivo JSON con "users" y "owners"
    #[arg(value_name = "DATA_FILE")]
    data_file: PathBuf,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "import_test_data=debug,orchestrator=debug,reqwest=info"
    } else {
        "import_test_data=info,orchestrator=info,reqwest=warn"
    };
    // RUST_LOG manda si está definida
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut settings = Settings::from_env();
    if cli.concurrency.is_some() {
        settings.concurrency = cli.concurrency;
    }

    info!("iniciando importación");
    debug!(?cli, ?settings);

    info!("cargando {}", cli.data_file.display());
    let data = records::load_data(&cli.data_file)?;

    let api = CandlepinApi::new(&settings)?;
    Importer::new(api, &settings).import(&data).await?;

    info!("importación terminada");
    Ok(())
}
