// src/constants.rs

/// The name of the directory holding confgraph's per-architecture state.
pub const STATE_DIR: &str = ".confgraph";

/// The default configuration file looked up in the working directory.
pub const CONFIGURE_FILENAME: &str = "confgraph.toml";

/// The name of the persisted result cache (inside the cache directory).
pub const RESULT_CACHE_FILENAME: &str = "results.cache.bin";

/// Bumped whenever the on-disk cache layout changes; older files are discarded.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Architecture name used when none is given.
pub const DEFAULT_ARCH: &str = "arch-default";

/// Directory (relative to the output directory) receiving the Makefile fragments.
pub const CONF_SUBDIR: &str = "conf";

pub const MAKE_MACROS_FILENAME: &str = "variables";

pub const MAKE_RULES_FILENAME: &str = "rules";

/// Machine-readable dump of all aggregated facts.
pub const FACTS_DUMP_FILENAME: &str = "configure-facts.json";

/// Suffix of the generated configuration header (`<prefix>conf.h`).
pub const HEADER_SUFFIX: &str = "conf.h";

/// Seconds a single compiler, linker or test program invocation may run.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 120;
