use crate::error::CollectorError;
use log::debug;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Run an external command and return its stdout, bounded by `timeout`
///
/// The child is killed when the deadline passes so a hung utility cannot
/// stall the calling monitor loop.
pub fn run_with_timeout(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<String, CollectorError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let description = format!("{} {}", program, args.join(" "));
    debug!("Running `{}` with timeout {:?}", description, timeout);

    runtime.block_on(run(program, args, timeout, description))
}

async fn run(
    program: &str,
    args: &[&str],
    timeout: Duration,
    description: String,
) -> Result<String, CollectorError> {
    let child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| CollectorError::SubprocessSpawn(format!("{}: {}", program, e)))?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| CollectorError::Timeout(timeout, description.clone()))??;

    if !output.status.success() {
        return Err(CollectorError::SubprocessTerminated(format!(
            "`{}` exited with {}",
            description, output.status
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
