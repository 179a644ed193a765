//! Client configuration: defaults, then a `key=value` conf file, then
//! command-line flags.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use spv_chainstate::{CacheConfig, ChunkSeed};
use spv_consensus::{hash256_from_hex, hash256_to_hex, Network};
use spv_log::{Format, Level, LogConfig};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub network: Network,
    pub compact_mode: bool,
    pub cache: CacheConfig,
    pub log: LogConfig,
    pub conf_path: Option<PathBuf>,
    pub seed_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            compact_mode: true,
            cache: CacheConfig::default(),
            log: LogConfig::default(),
            conf_path: None,
            seed_path: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CliAction {
    Run(Box<Config>),
    PrintHelp,
}

impl Config {
    /// Parses `--flag value` arguments (program name already stripped). Values
    /// given on the command line win over the conf file named by `--conf`.
    pub fn parse_args_from<I>(raw_args: I) -> Result<CliAction, String>
    where
        I: IntoIterator<Item = String>,
    {
        let defaults = Config::default();
        let mut network = defaults.network;
        let mut network_set = false;
        let mut compact_mode = defaults.compact_mode;
        let mut compact_mode_set = false;
        let mut header_cache = defaults.cache.headers;
        let mut header_cache_set = false;
        let mut tx_cache = defaults.cache.txs;
        let mut tx_cache_set = false;
        let mut chunk_cache = defaults.cache.chunks;
        let mut chunk_cache_set = false;
        let mut log_level = defaults.log.level;
        let mut log_level_set = false;
        let mut log_format = defaults.log.format;
        let mut log_format_set = false;
        let mut log_timestamps = defaults.log.timestamps;
        let mut log_timestamps_set = false;
        let mut conf_path: Option<PathBuf> = None;
        let mut seed_path: Option<PathBuf> = None;

        let mut args = raw_args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--network" => {
                    let value = args
                        .next()
                        .ok_or_else(|| format!("missing value for --network\n{}", usage()))?;
                    network = Network::parse(&value)
                        .ok_or_else(|| format!("invalid network '{value}'\n{}", usage()))?;
                    network_set = true;
                }
                "--testnet" => {
                    network = Network::Testnet;
                    network_set = true;
                }
                "--regtest" => {
                    network = Network::Regtest;
                    network_set = true;
                }
                "--full" => {
                    compact_mode = false;
                    compact_mode_set = true;
                }
                "--compact" => {
                    compact_mode = true;
                    compact_mode_set = true;
                }
                "--header-cache" => {
                    let value = args
                        .next()
                        .ok_or_else(|| format!("missing value for --header-cache\n{}", usage()))?;
                    header_cache = parse_capacity(&value)
                        .ok_or_else(|| format!("invalid header cache size '{value}'\n{}", usage()))?;
                    header_cache_set = true;
                }
                "--tx-cache" => {
                    let value = args
                        .next()
                        .ok_or_else(|| format!("missing value for --tx-cache\n{}", usage()))?;
                    tx_cache = parse_capacity(&value)
                        .ok_or_else(|| format!("invalid tx cache size '{value}'\n{}", usage()))?;
                    tx_cache_set = true;
                }
                "--chunk-cache" => {
                    let value = args
                        .next()
                        .ok_or_else(|| format!("missing value for --chunk-cache\n{}", usage()))?;
                    chunk_cache = parse_capacity(&value)
                        .ok_or_else(|| format!("invalid chunk cache size '{value}'\n{}", usage()))?;
                    chunk_cache_set = true;
                }
                "--log-level" => {
                    let value = args
                        .next()
                        .ok_or_else(|| format!("missing value for --log-level\n{}", usage()))?;
                    log_level = Level::parse(&value)
                        .ok_or_else(|| format!("invalid log level '{value}'\n{}", usage()))?;
                    log_level_set = true;
                }
                "--log-format" => {
                    let value = args
                        .next()
                        .ok_or_else(|| format!("missing value for --log-format\n{}", usage()))?;
                    log_format = Format::parse(&value).ok_or_else(|| {
                        format!("invalid log format '{value}' (expected text|json)\n{}", usage())
                    })?;
                    log_format_set = true;
                }
                "--no-log-timestamps" => {
                    log_timestamps = false;
                    log_timestamps_set = true;
                }
                "--conf" => {
                    let value = args
                        .next()
                        .ok_or_else(|| format!("missing value for --conf\n{}", usage()))?;
                    conf_path = Some(PathBuf::from(value));
                }
                "--seed" => {
                    let value = args
                        .next()
                        .ok_or_else(|| format!("missing value for --seed\n{}", usage()))?;
                    seed_path = Some(PathBuf::from(value));
                }
                "--help" | "-h" => return Ok(CliAction::PrintHelp),
                other => {
                    return Err(format!("unknown argument '{other}'\n{}", usage()));
                }
            }
        }

        if let Some(conf_file) = conf_path.as_deref() {
            let conf = load_conf(conf_file)?
                .ok_or_else(|| format!("conf file {} not found", conf_file.display()))?;

            if !network_set {
                if let Some(raw) = last_value(&conf, "network") {
                    network = Network::parse(raw).ok_or_else(|| {
                        format!("invalid network '{raw}' in {}", conf_file.display())
                    })?;
                }
                for (key, flagged) in [("testnet", Network::Testnet), ("regtest", Network::Regtest)] {
                    if let Some(raw) = last_value(&conf, key) {
                        match parse_conf_bool(raw) {
                            Some(true) => network = flagged,
                            Some(false) => {}
                            None => {
                                return Err(format!(
                                    "invalid {key} value '{raw}' in {}",
                                    conf_file.display()
                                ));
                            }
                        }
                    }
                }
            }
            if !compact_mode_set {
                if let Some(raw) = last_value(&conf, "compact") {
                    compact_mode = parse_conf_bool(raw).ok_or_else(|| {
                        format!("invalid compact value '{raw}' in {}", conf_file.display())
                    })?;
                }
            }
            for (key, set, slot) in [
                ("headercache", header_cache_set, &mut header_cache),
                ("txcache", tx_cache_set, &mut tx_cache),
                ("chunkcache", chunk_cache_set, &mut chunk_cache),
            ] {
                if set {
                    continue;
                }
                if let Some(raw) = last_value(&conf, key) {
                    *slot = parse_capacity(raw).ok_or_else(|| {
                        format!("invalid {key} '{raw}' in {}", conf_file.display())
                    })?;
                }
            }
            if !log_level_set {
                if let Some(raw) = last_value(&conf, "loglevel") {
                    log_level = Level::parse(raw).ok_or_else(|| {
                        format!("invalid loglevel '{raw}' in {}", conf_file.display())
                    })?;
                }
            }
            if !log_format_set {
                if let Some(raw) = last_value(&conf, "logformat") {
                    log_format = Format::parse(raw).ok_or_else(|| {
                        format!("invalid logformat '{raw}' in {}", conf_file.display())
                    })?;
                }
            }
            if !log_timestamps_set {
                if let Some(raw) = last_value(&conf, "logtimestamps") {
                    log_timestamps = parse_conf_bool(raw).ok_or_else(|| {
                        format!("invalid logtimestamps value '{raw}' in {}", conf_file.display())
                    })?;
                }
            }
            if seed_path.is_none() {
                if let Some(raw) = last_value(&conf, "seed") {
                    seed_path = Some(PathBuf::from(raw));
                }
            }
        }

        Ok(CliAction::Run(Box::new(Config {
            network,
            compact_mode,
            cache: CacheConfig {
                headers: header_cache,
                txs: tx_cache,
                chunks: chunk_cache,
            },
            log: LogConfig {
                level: log_level,
                format: log_format,
                timestamps: log_timestamps,
            },
            conf_path,
            seed_path,
        })))
    }

    /// Reads the seed bundle named by `seed_path`, if any.
    pub fn load_seed(&self) -> Result<Option<ChunkSeed>, String> {
        match self.seed_path.as_deref() {
            Some(path) => load_seed(path).map(Some),
            None => Ok(None),
        }
    }
}

pub fn usage() -> String {
    [
        "Usage:",
        "  spv-client [options]",
        "",
        "Options:",
        "  --help, -h  Print this help and exit",
        "  --network <mainnet|testnet|regtest>  Chain to follow (default: mainnet)",
        "  --testnet  Shorthand for --network testnet",
        "  --regtest  Shorthand for --network regtest",
        "  --compact  Store chunk hashes plus the trailing partial chunk (default)",
        "  --full  Store every header",
        "  --header-cache <n>  Header cache entries (default: 1000)",
        "  --tx-cache <n>  Raw transaction cache entries (default: 100)",
        "  --chunk-cache <n>  Verified chunk cache entries (default: 2)",
        "  --log-level <error|warn|info|debug|trace>  Log verbosity (default: info)",
        "  --log-format <text|json>  Log output format (default: text)",
        "  --no-log-timestamps  Omit timestamps from text logs",
        "  --conf <path>  key=value config file; flags override its values",
        "  --seed <path>  JSON chunk-hash bundle applied to an empty compact ledger",
        "",
        "Config keys:",
        "  network, testnet, regtest, compact, headercache, txcache, chunkcache,",
        "  loglevel, logformat, logtimestamps, seed",
    ]
    .join("\n")
}

fn parse_capacity(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok().filter(|n| *n > 0)
}

fn last_value<'a>(conf: &'a HashMap<String, Vec<String>>, key: &str) -> Option<&'a str> {
    conf.get(key)
        .and_then(|values| values.last())
        .map(String::as_str)
}

/// Parses a conf file into lowercase keys mapped to every value given, in
/// order. Returns `Ok(None)` when the file does not exist.
pub fn load_conf(path: &Path) -> Result<Option<HashMap<String, Vec<String>>>, String> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(format!("failed to read {}: {err}", path.display())),
    };

    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for raw_line in contents.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(idx) = line.find(['#', ';']) {
            line = &line[..idx];
        }
        line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, "1"),
        };
        if key.is_empty() {
            continue;
        }
        out.entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
    Ok(Some(out))
}

pub fn parse_conf_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.is_empty() {
        return Some(true);
    }
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// On-disk form of a [`ChunkSeed`], hashes in display hex.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedBundle {
    pub last_hash: String,
    pub chunk_hashes: Vec<String>,
}

impl SeedBundle {
    pub fn from_seed(seed: &ChunkSeed) -> Self {
        Self {
            last_hash: hash256_to_hex(&seed.last_hash),
            chunk_hashes: seed.chunk_hashes.iter().map(hash256_to_hex).collect(),
        }
    }

    pub fn into_seed(self) -> Result<ChunkSeed, String> {
        let last_hash = hash256_from_hex(&self.last_hash)
            .map_err(|err| format!("invalid last_hash: {err}"))?;
        let chunk_hashes = self
            .chunk_hashes
            .iter()
            .enumerate()
            .map(|(index, hex)| {
                hash256_from_hex(hex).map_err(|err| format!("invalid chunk hash {index}: {err}"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ChunkSeed {
            last_hash,
            chunk_hashes,
        })
    }
}

pub fn load_seed(path: &Path) -> Result<ChunkSeed, String> {
    let contents = fs::read_to_string(path)
        .map_err(|err| format!("failed to read seed {}: {err}", path.display()))?;
    let bundle: SeedBundle = serde_json::from_str(&contents)
        .map_err(|err| format!("invalid seed {}: {err}", path.display()))?;
    bundle.into_seed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn run(list: &[&str]) -> Config {
        match Config::parse_args_from(args(list)).expect("parse") {
            CliAction::Run(config) => *config,
            CliAction::PrintHelp => panic!("unexpected help"),
        }
    }

    #[test]
    fn defaults_without_arguments() {
        assert_eq!(run(&[]), Config::default());
    }

    #[test]
    fn flags_set_fields() {
        let config = run(&[
            "--regtest",
            "--full",
            "--header-cache",
            "50",
            "--log-level",
            "debug",
            "--log-format",
            "json",
            "--no-log-timestamps",
        ]);
        assert_eq!(config.network, Network::Regtest);
        assert!(!config.compact_mode);
        assert_eq!(config.cache.headers, 50);
        assert_eq!(config.cache.txs, CacheConfig::default().txs);
        assert_eq!(config.log.level, Level::Debug);
        assert_eq!(config.log.format, Format::Json);
        assert!(!config.log.timestamps);
    }

    #[test]
    fn help_and_bad_arguments() {
        assert_eq!(
            Config::parse_args_from(args(&["-h"])).expect("parse"),
            CliAction::PrintHelp
        );
        let err = Config::parse_args_from(args(&["--tx-cache"])).expect_err("missing value");
        assert!(err.starts_with("missing value for --tx-cache"));
        let err = Config::parse_args_from(args(&["--chunk-cache", "0"])).expect_err("zero");
        assert!(err.starts_with("invalid chunk cache size '0'"));
        let err = Config::parse_args_from(args(&["--bogus"])).expect_err("unknown");
        assert!(err.starts_with("unknown argument '--bogus'"));
    }

    #[test]
    fn conf_bool_values() {
        assert_eq!(parse_conf_bool(""), Some(true));
        assert_eq!(parse_conf_bool("Yes"), Some(true));
        assert_eq!(parse_conf_bool("0"), Some(false));
        assert_eq!(parse_conf_bool("no"), Some(false));
        assert_eq!(parse_conf_bool("maybe"), None);
    }

    #[test]
    fn seed_bundle_rejects_bad_hex() {
        let bundle = SeedBundle {
            last_hash: "00".repeat(32),
            chunk_hashes: vec!["zz".repeat(32)],
        };
        let err = bundle.into_seed().expect_err("bad hex");
        assert!(err.starts_with("invalid chunk hash 0"));
    }
}
