//! dccbot limit / reset commands

use dcc_foundation::{Allowance, BotConfig};
use dcc_task::{QuotaStore, UserId};

fn open_store(config: &BotConfig) -> QuotaStore {
    QuotaStore::open(&config.paths.quota_file, config.quota.clone())
}

/// Report text for one user
pub fn limit_report(store: &QuotaStore, user_id: &UserId) -> String {
    let count = store.get_count(user_id);
    match store.remaining(user_id).remaining {
        Allowance::Unlimited => format!(
            "👤 User: Owner\n📊 Conversions: {}\n∞ Remaining: Unlimited",
            count
        ),
        Allowance::Limited(remaining) => format!(
            "👤 User: {}\n📊 Conversions: {}/{}\n🎯 Remaining: {}",
            user_id,
            count,
            store.limit_for(user_id).unwrap_or_default(),
            remaining
        ),
    }
}

pub fn show_limit(config: &BotConfig, user: &str) -> anyhow::Result<()> {
    let store = open_store(config);
    println!("{}", limit_report(&store, &UserId::from(user)));
    Ok(())
}

pub fn reset_user(config: &BotConfig, user: &str) -> anyhow::Result<()> {
    let store = open_store(config);
    let user_id = UserId::from(user);
    let before = store.get_count(&user_id);
    store.reset(&user_id)?;
    println!("✓ Reset conversions for {} ({} -> 0)", user_id, before);
    Ok(())
}
