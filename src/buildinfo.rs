//! Startup build-info banner (spec §1: out of core scope, ambient only).
//! Grounded on `internal/buildinfo/info.go` — printed once, never
//! consulted by business logic.

const NA: &str = "N/A";

pub fn print_banner(process: &str) {
    println!("Build version: {}", option_env!("METSYS_BUILD_VERSION").unwrap_or(NA));
    println!("Build date: {}", option_env!("METSYS_BUILD_DATE").unwrap_or(NA));
    println!("Build commit: {}", option_env!("METSYS_BUILD_COMMIT").unwrap_or(NA));
    tracing::info!(process, "starting");
}
