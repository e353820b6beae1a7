//! Process-wide tunables, read once from the environment.
//!
//! These mirror the knobs the mid-end has always been driven by: verbosity,
//! forced transcendental expansion, wide-vector folding, and per-pass
//! toggles used when bisecting rewrite problems.

use std::env;
use std::sync::OnceLock;

/// Flag values shared by every compilation in this process.
#[derive(Clone, Debug)]
pub struct Flags {
    /// Verbosity level (`DEBUG`).
    pub debug: u8,
    /// 0/1: expand transcendentals the backend lacks; 2: expand all of them
    /// (`TRANSCENDENTAL`).
    pub transcendental: u8,
    /// Enable 16- and 256-wide vector folds (`AMX`).
    pub amx: bool,
    /// Allow 8-wide half loads/stores in the float4 folder (`ALLOW_HALF8`).
    pub allow_half8: bool,
    /// Skip the arange loop collapse (`DISABLE_LOOP_COLLAPSE`).
    pub disable_loop_collapse: bool,
    /// Run the reducer pass; on by default (`DO_REDUCE`).
    pub do_reduce: bool,
    /// Skip expansion for the n'th linearization, -1 for all
    /// (`DEBUG_EXPAND`).
    pub debug_expand: i64,
    /// Running under CI; suppresses interactive debugging aids (`CI`).
    pub ci: bool,
}

fn env_int(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}

impl Flags {
    fn from_env() -> Self {
        Self {
            debug: env_int("DEBUG", 0) as u8,
            transcendental: env_int("TRANSCENDENTAL", 1) as u8,
            amx: env_int("AMX", 0) != 0,
            allow_half8: env_int("ALLOW_HALF8", 0) != 0,
            disable_loop_collapse: env_int("DISABLE_LOOP_COLLAPSE", 0) != 0,
            do_reduce: env_int("DO_REDUCE", 1) != 0,
            debug_expand: env_int("DEBUG_EXPAND", 0),
            ci: env::var("CI").is_ok(),
        }
    }
}

/// The process flag set. First call reads the environment; later calls are
/// free.
pub fn flags() -> &'static Flags {
    static FLAGS: OnceLock<Flags> = OnceLock::new();
    FLAGS.get_or_init(Flags::from_env)
}
