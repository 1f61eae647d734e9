use rolodex_storage::{CredentialHasher, HashParams};
use std::time::Instant;

use super::Context;

/// Calibrate hash parameters against `auth.hashTargetMs` and report the result.
pub async fn run(ctx: &Context) -> anyhow::Result<()> {
    let target = ctx.config.hash_target();
    println!("Calibrating password hashing for ~{} ms per hash...", target.as_millis());

    let (params, elapsed) = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let params = HashParams::calibrate(target)?;
        let hasher = CredentialHasher::new(params)?;
        let start = Instant::now();
        hasher.hash("calibrate")?;
        Ok((params, start.elapsed()))
    })
    .await??;

    println!();
    println!("  memory (KiB): {}", params.m_cost);
    println!("  passes:       {}", params.t_cost);
    println!("  lanes:        {}", params.p_cost);
    println!("  one hash:     {} ms", elapsed.as_millis());
    Ok(())
}
