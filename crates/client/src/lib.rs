//! SPV client: a locally verified header chain over an untrusted indexing
//! backend, with transaction confirmation checks against it.

pub mod blockchain;
pub mod config;

pub use blockchain::{Blockchain, HeaderQuery, TxStatus};
pub use config::{load_conf, load_seed, parse_conf_bool, usage, CliAction, Config, SeedBundle};
