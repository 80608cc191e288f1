pub(crate) const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
pub(crate) const DEFAULT_DATA_DIR: &str = "./data";
pub(crate) const SNAPSHOT_FILE: &str = "blockchain.txt";
pub(crate) const SLED_DIR: &str = "sled";
