use sqlx::PgPool;

use crate::config::RuleSeedConfig;
use crate::db::repository;

/// Upsert the configured rule definitions. Runs once at startup; the
/// analyzer loads the resulting active set from the database.
pub async fn seed_rules(pool: &PgPool, rules: &[RuleSeedConfig]) -> eyre::Result<usize> {
    let mut count = 0;

    for rule in rules {
        let parameters = serde_json::to_value(&rule.parameters)
            .map_err(|e| eyre::eyre!("Rule '{}' has unencodable parameters: {}", rule.name, e))?;

        repository::upsert_rule(
            pool,
            &rule.name,
            &rule.description,
            &rule.status,
            &rule.severity,
            &parameters,
        )
        .await?;
        count += 1;
    }

    Ok(count)
}
