use std::fs;
use std::path::Path;

use spv_client::{load_conf, load_seed, CliAction, Config};
use spv_consensus::{hash256_to_hex, Network};
use spv_log::{Format, Level};

fn parse(args: &[&str]) -> Result<Config, String> {
    match Config::parse_args_from(args.iter().map(|s| s.to_string()))? {
        CliAction::Run(config) => Ok(*config),
        CliAction::PrintHelp => Err("help".to_string()),
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

#[test]
fn conf_file_fills_unset_options() {
    let dir = tempfile::tempdir().expect("tempdir");
    let conf = dir.path().join("spv.conf");
    fs::write(
        &conf,
        "# client settings\n\
         regtest\n\
         compact=0\n\
         headercache = 10  # inline comment\n\
         ; full line comment\n\
         txcache=5\n\
         txcache=7\n\
         LogFormat=json\n\
         loglevel=debug\n",
    )
    .expect("write conf");

    let conf_arg = path_arg(&conf);
    let config = parse(&["--conf", &conf_arg, "--log-level", "warn"]).expect("parse");
    assert_eq!(config.network, Network::Regtest);
    assert!(!config.compact_mode);
    assert_eq!(config.cache.headers, 10);
    assert_eq!(config.cache.txs, 7);
    assert_eq!(config.log.format, Format::Json);
    // Flags win over the file.
    assert_eq!(config.log.level, Level::Warn);
    assert_eq!(config.conf_path.as_deref(), Some(conf.as_path()));
}

#[test]
fn flags_override_conf_network() {
    let dir = tempfile::tempdir().expect("tempdir");
    let conf = dir.path().join("spv.conf");
    fs::write(&conf, "network=testnet\ncompact=yes\n").expect("write conf");

    let conf_arg = path_arg(&conf);
    let config = parse(&["--network", "mainnet", "--conf", &conf_arg]).expect("parse");
    assert_eq!(config.network, Network::Mainnet);
    assert!(config.compact_mode);

    let config = parse(&["--conf", &conf_arg]).expect("parse");
    assert_eq!(config.network, Network::Testnet);
}

#[test]
fn conf_errors_name_the_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let conf = dir.path().join("spv.conf");
    fs::write(&conf, "chunkcache=lots\n").expect("write conf");

    let conf_arg = path_arg(&conf);
    let err = parse(&["--conf", &conf_arg]).expect_err("bad value");
    assert!(err.contains("invalid chunkcache 'lots'"));
    assert!(err.contains(&conf_arg));

    let missing = path_arg(&dir.path().join("absent.conf"));
    let err = parse(&["--conf", &missing]).expect_err("missing file");
    assert!(err.contains("not found"));
    assert_eq!(load_conf(&dir.path().join("absent.conf")).expect("load"), None);
}

#[test]
fn repeated_keys_keep_every_value() {
    let dir = tempfile::tempdir().expect("tempdir");
    let conf = dir.path().join("spv.conf");
    fs::write(&conf, "seed=a.json\nSEED=b.json\n=ignored\n").expect("write conf");

    let values = load_conf(&conf).expect("load").expect("present");
    assert_eq!(
        values.get("seed"),
        Some(&vec!["a.json".to_string(), "b.json".to_string()])
    );
    assert_eq!(values.len(), 1);
}

#[test]
fn seed_file_uses_display_hex() {
    let dir = tempfile::tempdir().expect("tempdir");
    let seed = dir.path().join("seed.json");
    let mut last = [0u8; 32];
    last[31] = 0xab;
    let mut chunk = [0u8; 32];
    chunk[0] = 0x01;
    fs::write(
        &seed,
        format!(
            "{{\"last_hash\":\"{}\",\"chunk_hashes\":[\"{}\"]}}",
            hash256_to_hex(&last),
            hash256_to_hex(&chunk)
        ),
    )
    .expect("write seed");

    let loaded = load_seed(&seed).expect("seed");
    assert_eq!(loaded.last_hash, last);
    assert_eq!(loaded.chunk_hashes, vec![chunk]);
    assert!(hash256_to_hex(&last).starts_with("ab"));

    fs::write(&seed, "{\"last_hash\":\"00\"}").expect("write seed");
    assert!(load_seed(&seed).is_err());
}
