//! Seedium - a reseed server for the I2P anonymity network

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use tokio::sync::broadcast;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use seedium::config::Config;
use seedium::error::{Error, Result};
use seedium::keys;
use seedium::netdb::{AcceptAll, LocalNetDb};
use seedium::reseed::Reseeder;
use seedium::server::{self, AppState, Blacklist, DefaultUi, RateLimiter, TokenStore};
use seedium::transport::{self, tls::TlsIdentity};

fn main() -> Result<()> {
    let args = Args::parse();

    if args.version {
        print_version();
        return Ok(());
    }

    if args.gen_config {
        println!(
            "{}",
            serde_json::to_string_pretty(&Config::example()).unwrap()
        );
        return Ok(());
    }

    // Initialize logging
    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let config_path = args.config.ok_or_else(|| {
        Error::Config("no config file specified, see --help".into())
    })?;
    let config = Config::load(&config_path)?;

    if args.keygen {
        return keygen(&config);
    }

    info!("Seedium v{} starting...", env!("CARGO_PKG_VERSION"));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    let signing_key = load_signing_key(&config.signing_key_file)?;

    let netdb = LocalNetDb::new(&config.netdb_dir, config.max_age, Arc::new(AcceptAll));
    let reseeder = Arc::new(
        Reseeder::new(netdb, config.signer_id.clone().into_bytes(), signing_key)
            .with_num_ri(config.num_ri)
            .with_num_su3(config.num_su3)
            .with_rebuild_interval(config.rebuild_interval),
    );

    let blacklist = Arc::new(Blacklist::new());
    if let Some(path) = &config.blacklist_file {
        blacklist.load_file(path)?;
    }

    let state = AppState {
        reseeder: Arc::clone(&reseeder),
        tokens: Arc::new(TokenStore::new()),
        bundle_limiter: Arc::new(RateLimiter::per_hour(config.ratelimit)),
        web_limiter: Arc::new(RateLimiter::per_hour(config.ratelimit_web)),
        ui: Arc::new(DefaultUi),
        trust_proxy: config.trust_proxy,
    };
    let app = server::build_router(state, &config.prefix);

    let (shutdown_tx, _) = broadcast::channel(1);
    let engine = reseeder.start(&shutdown_tx);

    let listener = match &config.tls {
        Some(tls_files) => {
            let identity = TlsIdentity::load(&tls_files.cert_file, &tls_files.key_file)?;
            if identity.needs_renewal() {
                warn!("TLS certificate expires within 48 hours, renew it");
            }
            transport::bind_clearnet_tls(
                &config.listen,
                Arc::clone(&blacklist),
                identity.into_server_config()?,
            )
            .await?
        }
        None => transport::bind_clearnet(&config.listen, Arc::clone(&blacklist)).await?,
    };

    let mut serve = tokio::spawn(transport::serve_all(
        app,
        vec![("clearnet", listener)],
        shutdown_tx.clone(),
    ));

    let mut serve_done = false;
    let result = tokio::select! {
        res = &mut serve => {
            serve_done = true;
            match res {
                Ok(r) => r,
                Err(e) => Err(Error::Transport(e.to_string())),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            Ok(())
        }
    };

    let _ = shutdown_tx.send(());
    let _ = engine.await;
    if !serve_done {
        let _ = serve.await;
    }

    info!("Goodbye!");
    result
}

/// Generate a fresh RSA-4096 signing key and its signer certificate.
fn keygen(config: &Config) -> Result<()> {
    info!("generating RSA-4096 signing key, this can take a moment");
    let key = RsaPrivateKey::new(&mut OsRng, 4096)
        .map_err(|e| Error::Crypto(format!("key generation failed: {}", e)))?;

    let key_pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| Error::Crypto(format!("key encoding failed: {}", e)))?;
    std::fs::write(&config.signing_key_file, key_pem.as_bytes())?;

    let cert_der = seedium::su3::new_signing_certificate(&config.signer_id, &key)?;
    let cert_dir = config.keystore_dir.join("reseed");
    std::fs::create_dir_all(&cert_dir)?;
    let cert_path = cert_dir.join(keys::signer_filename(&config.signer_id));
    std::fs::write(&cert_path, keys::certificate_pem(&cert_der))?;

    info!(
        key = %config.signing_key_file.display(),
        cert = %cert_path.display(),
        "wrote signing material"
    );
    Ok(())
}

fn load_signing_key(path: &Path) -> Result<RsaPrivateKey> {
    let pem = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read signing key {}: {}", path.display(), e)))?;

    RsaPrivateKey::from_pkcs8_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&pem))
        .map_err(|e| Error::Config(format!("unusable signing key {}: {}", path.display(), e)))
}

/// Command line arguments
struct Args {
    config: Option<PathBuf>,
    gen_config: bool,
    keygen: bool,
    version: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut config = None;
        let mut gen_config = false;
        let mut keygen = false;
        let mut version = false;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "-c" | "--config" => {
                    if i + 1 < args.len() {
                        config = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--gen-config" => gen_config = true,
                "--keygen" => keygen = true,
                "-v" | "--version" => version = true,
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                arg if !arg.starts_with('-') && config.is_none() => {
                    // Positional argument: treat as config file
                    config = Some(PathBuf::from(arg));
                }
                _ => {}
            }
            i += 1;
        }

        Self {
            config,
            gen_config,
            keygen,
            version,
        }
    }
}

fn print_help() {
    println!(
        r#"Seedium - a reseed server for the I2P anonymity network

USAGE:
    seedium [OPTIONS]

OPTIONS:
    -c, --config <FILE>     Path to configuration file
    --gen-config            Print an example configuration
    --keygen                Generate a signing key and certificate, then exit
    -v, --version           Print version information
    -h, --help              Print help information

EXAMPLES:
    seedium --gen-config > reseed.json
    seedium -c reseed.json --keygen
    seedium -c reseed.json
"#
    );
}

fn print_version() {
    println!("Seedium v{}", env!("CARGO_PKG_VERSION"));
    println!("A reseed server for the I2P anonymity network");
}
