use crate::dispatch::traits::{AccountDirectory, QuotaView, Transport};
use crate::error::HubError;
use crate::store::{Account, AccountKey, SharingPreference, User};
use rand::Rng as _;
use std::collections::HashSet;
use tracing::debug;

/// Pick one usable account for `(user, model)`.
///
/// Pools are fetched per sharing flag, ordered by the user's preference,
/// filtered (exclusions, tier gate, quota availability), and the pick is
/// uniform random within the first non-empty pool. Randomness spreads
/// concurrent requests across accounts instead of hammering the first row.
pub async fn select_account(
    directory: &dyn AccountDirectory,
    quotas: &dyn QuotaView,
    transport: &dyn Transport,
    user: &User,
    model: &str,
    exclude: &HashSet<AccountKey>,
) -> Result<Option<Account>, HubError> {
    let provider = transport.provider();

    let dedicated = directory.available(provider, &user.id, Some(false)).await?;
    let shared = directory.available(provider, &user.id, Some(true)).await?;

    let ordered = match user.sharing {
        SharingPreference::PreferDedicated => [dedicated, shared],
        SharingPreference::PreferShared => [shared, dedicated],
    };

    for pool in ordered {
        let mut eligible: Vec<Account> = Vec::with_capacity(pool.len());
        for account in pool {
            if exclude.contains(&account.key()) {
                continue;
            }
            if !transport.allows(&account, model) {
                debug!(account = %account.key(), model, "tier gate filtered account");
                continue;
            }
            if !quotas.is_available(&user.id, &account, model).await? {
                debug!(account = %account.key(), model, "quota gate filtered account");
                continue;
            }
            eligible.push(account);
        }

        if !eligible.is_empty() {
            let idx = rand::rng().random_range(0..eligible.len());
            return Ok(Some(eligible.swap_remove(idx)));
        }
    }

    Ok(None)
}
