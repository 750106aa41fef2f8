/*!
Command-line bulk import of grade-record CSV files.

Ensures the database schema and the default login accounts exist, then
imports each file named on the command line, printing the per-file
report. Configuration comes from the file named by the
`GRADEBOOK_CONFIG` environment variable, or built-in defaults.
*/
use simplelog::{ColorChoice, TerminalMode, TermLogger};

use gradebook::config::Cfg;
use gradebook::import;
use gradebook::store::Store;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let log_cfg = simplelog::ConfigBuilder::new()
        .add_filter_allow_str("gradebook")
        .build();
    TermLogger::init(
        gradebook::log_level_from_env(),
        log_cfg,
        TerminalMode::Stdout,
        ColorChoice::Auto
    ).unwrap();
    log::info!("Logging started.");

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("usage: gbimport FILE.csv [FILE.csv ...]");
        std::process::exit(2);
    }

    let cfg = match std::env::var("GRADEBOOK_CONFIG") {
        Ok(path) => match Cfg::from_file(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Error loading config {:?}: {}", &path, &e);
                std::process::exit(1);
            },
        },
        Err(_) => Cfg::default(),
    };
    log::info!("Configuration:\n{:#?}", &cfg);

    let store = Store::new(cfg.db_connect_string.clone());
    if let Err(e) = store.ensure_db_schema().await {
        eprintln!("Unable to ensure database schema: {}", &e);
        std::process::exit(1);
    }
    if let Err(e) = store.ensure_default_accounts(&cfg.default_accounts()).await {
        eprintln!("Unable to ensure default accounts: {}", &e);
        std::process::exit(1);
    }

    let mut failed = false;
    for path in args.iter() {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                eprintln!("{}: unable to read: {}", path, &e);
                failed = true;
                continue;
            },
        };
        let filename = std::path::Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        match import::import_csv_file(
            &store, &cfg.upload_dir, &filename, &data
        ).await {
            Ok(report) => { println!("{}: {}", path, &report); },
            Err(e) => {
                eprintln!("{}: {}", path, &e);
                failed = true;
            },
        }
    }

    if failed {
        std::process::exit(1);
    }
}
