use super::Context;

/// Show the effective configuration as pretty-printed JSON.
pub async fn show(ctx: &Context) -> anyhow::Result<()> {
    let json = serde_json::to_value(&ctx.config)?;

    println!();
    println!("📋 Current Configuration");
    println!(
        "  File: {}{}",
        ctx.config_path.display(),
        if ctx.config_path.exists() { "" } else { " (not found, using defaults)" }
    );
    println!("  Database: {}", ctx.data_source());
    println!();
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
