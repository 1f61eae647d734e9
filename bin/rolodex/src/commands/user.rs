use rolodex_core::User;
use rolodex_storage::Database;

use super::Context;

pub async fn add(ctx: &Context, login: &str, password: &str, admin: bool) -> anyhow::Result<()> {
    let db = ctx.open_database(true).await?;

    let mut user = User::new(login, password);
    user.admin = admin;
    let stored = tokio::task::spawn_blocking(move || {
        let result = db.insert_user(user);
        db.close()?;
        result
    })
    .await??;

    println!("✓ Created user {} (id {}{})", stored.login, stored.id, if stored.admin { ", admin" } else { "" });
    Ok(())
}

pub async fn list(ctx: &Context) -> anyhow::Result<()> {
    let db = ctx.open_database(false).await?;
    let users = tokio::task::spawn_blocking(move || {
        let result = db.list_users();
        db.close()?;
        result
    })
    .await??;

    if users.is_empty() {
        println!("No users. Create one with: rolodex user add <login> --password <pw>");
        return Ok(());
    }

    println!("{:<6} {:<24} {:<6} {:<8} {}", "ID", "LOGIN", "ADMIN", "VERSION", "CHANGED");
    for u in users {
        println!(
            "{:<6} {:<24} {:<6} {:<8} {}",
            u.id,
            u.login,
            if u.admin { "yes" } else { "no" },
            u.version,
            u.changed_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}
