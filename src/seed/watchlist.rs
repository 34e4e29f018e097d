use alloy::primitives::Address;
use sqlx::PgPool;
use std::str::FromStr;

use crate::db::repository;

/// Seed configured whitelist addresses. Addresses were validated at
/// config load, so parse failures here are programmer errors.
pub async fn seed_whitelist(pool: &PgPool, addresses: &[String]) -> eyre::Result<usize> {
    let mut count = 0;
    for hex_addr in addresses {
        let address = Address::from_str(hex_addr)
            .map_err(|e| eyre::eyre!("Invalid whitelist address '{}': {}", hex_addr, e))?;
        repository::upsert_whitelist_address(pool, address.as_slice(), "config").await?;
        count += 1;
    }
    Ok(count)
}

/// Seed configured suspicious addresses.
pub async fn seed_suspicious(pool: &PgPool, addresses: &[String]) -> eyre::Result<usize> {
    let mut count = 0;
    for hex_addr in addresses {
        let address = Address::from_str(hex_addr)
            .map_err(|e| eyre::eyre!("Invalid suspicious address '{}': {}", hex_addr, e))?;
        repository::upsert_suspicious_address(pool, address.as_slice(), "config").await?;
        count += 1;
    }
    Ok(count)
}

/// Ingest a suspicious-address watchlist CSV (columns: address, label).
/// Malformed rows are skipped with a warning; the file as a whole only
/// fails when it cannot be opened.
pub async fn seed_suspicious_csv(pool: &PgPool, path: &str) -> eyre::Result<usize> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| eyre::eyre!("Failed to open watchlist CSV '{}': {}", path, e))?;

    let mut count = 0;
    for result in reader.records() {
        let record = result?;
        let Some((address, label)) = parse_watchlist_record(&record) else {
            tracing::warn!(row = ?record, "Skipping malformed watchlist row");
            continue;
        };

        repository::upsert_suspicious_address(pool, address.as_slice(), &label).await?;
        count += 1;
    }

    tracing::info!(count, path, "Watchlist CSV ingested");
    Ok(count)
}

fn parse_watchlist_record(record: &csv::StringRecord) -> Option<(Address, String)> {
    let raw = record.get(0)?.trim();
    let address = Address::from_str(raw).ok()?;
    let label = record.get(1).unwrap_or("watchlist").trim().to_string();
    Some((address, label))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_watchlist_record() {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(
                "address,label\n\
                 0x000000000000000000000000000000000000dEaD,burner\n\
                 not-an-address,bad\n\
                 0x1111111111111111111111111111111111111111\n"
                    .as_bytes(),
            );

        let rows: Vec<_> = reader
            .records()
            .filter_map(|r| r.ok())
            .filter_map(|r| parse_watchlist_record(&r))
            .collect();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].1, "burner");
        // Missing label falls back to a generic tag.
        assert_eq!(rows[1].1, "watchlist");
    }
}
