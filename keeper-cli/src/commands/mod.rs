mod backup;
mod daemon;
mod list;
mod prune;
mod restore;
mod status;
mod verify;

pub use backup::run_backup;
pub use daemon::run_daemon;
pub use list::run_list;
pub use prune::run_prune;
pub use restore::run_restore;
pub use status::run_status;
pub use verify::run_verify;

use keeper_core::Result;
use serde::Serialize;

/// 以 JSON 输出到标准输出
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
