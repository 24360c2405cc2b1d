use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use rand::Rng;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

const PAYMENT_TYPES: [&str; 4] = ["cash", "card", "check", "mobile"];

/// Writes a synthetic sales fact table.
///
/// Usage: `data_generator [PATH] [ROWS]`
fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let path = PathBuf::from(
        args.next()
            .unwrap_or_else(|| "data/cleaned_sales.csv".to_string()),
    );
    let rows: u64 = match args.next() {
        Some(n) => n.parse().with_context(|| format!("invalid row count '{n}'"))?,
        None => 1_000_000,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    writeln!(
        writer,
        "sale_id,sale_date,customer_id,product_id,store_id,sale_amount,payment_type"
    )?;

    let start = NaiveDate::from_ymd_opt(2024, 1, 1).context("invalid start date")?;
    let mut rng = rand::rng();
    for id in 1..=rows {
        let date = start + Duration::days(rng.random_range(0..365));
        let customer = rng.random_range(1..5_000);
        let product = rng.random_range(1..500);
        let store = rng.random_range(1..20);
        let amount = rng.random_range(100..50_000) as f64 / 100.0;
        // roughly 1 in 50 sales has no recorded payment type
        let payment = if rng.random_range(0..50) == 0 {
            ""
        } else {
            PAYMENT_TYPES[rng.random_range(0..PAYMENT_TYPES.len())]
        };
        writeln!(
            writer,
            "{id},{},{customer},{product},{store},{amount:.2},{payment}",
            date.format("%Y-%m-%d")
        )?;
    }
    writer.flush()?;

    println!("Sample CSV generated: {} ({rows} rows)", path.display());
    Ok(())
}
