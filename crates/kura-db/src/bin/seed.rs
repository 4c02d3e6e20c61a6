//! # Seed Data Generator
//!
//! Populates a development database with stocked products, a register, a
//! reservation and a set deal.
//!
//! ## Usage
//! ```bash
//! # Generate 200 products (default)
//! cargo run -p kura-db --bin seed
//!
//! # Generate custom amount
//! cargo run -p kura-db --bin seed -- --count 1000
//!
//! # Specify database path
//! cargo run -p kura-db --bin seed -- --db ./data/kura.db
//! ```
//!
//! ## Generated Data
//! - Products across a few genres, each stocked through the ledger with two
//!   cost lots at different unit prices (so FIFO has something to walk)
//! - Every seventh product is infinite stock (services, gift wrapping)
//! - Register `reg-1` with a 50,000 opening balance, register `reg-2`
//!   bound to a terminal device
//! - An open reservation on the first product
//! - A published set deal over the first two products

use chrono::Utc;
use kura_core::stock::{StockSource, WholesaleRecord};
use kura_core::{
    Actor, Product, Register, Reservation, ReservationStatus, SetDeal, SetDealDiscountKind,
    SetDealProduct, SetDealStatus,
};
use kura_db::{Database, DbConfig, StockMove};
use std::env;
use uuid::Uuid;

const STORE_ID: &str = "store-1";

/// Genres for realistic test data
const GENRES: &[(&str, &[&str])] = &[
    (
        "SGL",
        &[
            "Dragon Knight",
            "Forest Sprite",
            "Iron Golem",
            "Storm Caller",
            "Shadow Thief",
            "Crystal Mage",
            "Ember Drake",
            "Tide Serpent",
        ],
    ),
    (
        "BOX",
        &[
            "Booster Box Vol.1",
            "Booster Box Vol.2",
            "Starter Deck Fire",
            "Starter Deck Water",
            "Premium Collection",
        ],
    ),
    (
        "SUP",
        &[
            "Card Sleeves",
            "Deck Box",
            "Playmat",
            "Binder",
            "Toploaders",
        ],
    ),
];

/// Condition variants: (suffix, price multiplier percent)
const CONDITIONS: &[(&str, i64)] = &[("NM", 100), ("EX", 80), ("PL", 55)];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut count: usize = 200;
    let mut db_path = String::from("./kura_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(200);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Kura Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of products to generate (default: 200)");
                println!("  -d, --db <PATH>    Database file path (default: ./kura_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Kura Seed Data Generator");
    println!("==========================");
    println!("Database: {}", db_path);
    println!("Products: {}", count);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let mut uow = db.begin().await?;
    let existing = uow.products().count(STORE_ID).await?;
    if existing > 0 {
        println!("⚠ Database already has {} products", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    println!();
    println!("Generating products...");

    let actor = Actor::system();
    let start = std::time::Instant::now();
    let mut product_ids = Vec::new();

    'outer: for (genre_idx, (genre, names)) in GENRES.iter().enumerate() {
        for (name_idx, name) in names.iter().enumerate() {
            for (cond_idx, (condition, pct)) in CONDITIONS.iter().enumerate() {
                if product_ids.len() >= count {
                    break 'outer;
                }
                let seed = genre_idx * 100 + name_idx * 10 + cond_idx;
                let product = generate_product(genre, name, condition, *pct, seed);
                let stock = 4 + (seed % 17) as i64;

                uow.products().insert(&product).await?;
                if !product.infinite_stock {
                    let first = stock / 2;
                    let older = product.buy_price - 20;
                    let records = [
                        WholesaleRecord::new(older.max(0), first),
                        WholesaleRecord::new(product.buy_price, stock - first),
                    ];
                    let mv = StockMove::new(
                        &product.id,
                        stock,
                        StockSource::Adjustment {
                            adjustment_id: None,
                        },
                        &actor,
                    )
                    .description(Some("Seed stock".to_string()));
                    uow.stock().increase(&mv, &records).await?;
                    uow.products().refresh_wholesale_stats(&product.id).await?;
                }

                product_ids.push(product.id.clone());
                if product_ids.len() % 50 == 0 {
                    println!("  Generated {} products...", product_ids.len());
                }
            }
        }
    }

    println!("Creating registers...");
    let now = Utc::now();
    uow.registers()
        .insert(&Register {
            id: "reg-1".to_string(),
            store_id: STORE_ID.to_string(),
            display_name: "Front Register".to_string(),
            cash_balance: 50_000,
            terminal_device_id: None,
            created_at: now,
        })
        .await?;
    uow.registers()
        .insert(&Register {
            id: "reg-2".to_string(),
            store_id: STORE_ID.to_string(),
            display_name: "Card Register".to_string(),
            cash_balance: 0,
            terminal_device_id: Some("terminal-001".to_string()),
            created_at: now,
        })
        .await?;

    if let [first, second, ..] = product_ids.as_slice() {
        println!("Creating reservation and set deal...");
        uow.reservations()
            .insert_reservation(&Reservation {
                id: Uuid::new_v4().to_string(),
                store_id: STORE_ID.to_string(),
                product_id: first.clone(),
                display_name: "Next release pre-order".to_string(),
                deposit_price: 500,
                limit_count: 20,
                status: ReservationStatus::Open,
                created_at: now,
            })
            .await?;

        let deal_id = Uuid::new_v4().to_string();
        let deal = SetDeal {
            id: deal_id.clone(),
            store_id: STORE_ID.to_string(),
            display_name: "Starter bundle".to_string(),
            discount_kind: SetDealDiscountKind::Percent,
            discount_amount: -10,
            status: SetDealStatus::Published,
            start_at: now,
            expire_at: None,
        };
        let products = [first, second].map(|id| SetDealProduct {
            set_deal_id: deal_id.clone(),
            product_id: id.clone(),
            item_count: 1,
        });
        uow.set_deals().insert(&deal, &products).await?;
    }

    uow.commit().await?;

    let elapsed = start.elapsed();
    println!();
    println!("✓ Generated {} products in {:?}", product_ids.len(), elapsed);
    println!("✓ Seed complete!");

    Ok(())
}

/// Generates a single product with realistic data.
fn generate_product(genre: &str, name: &str, condition: &str, pct: i64, seed: usize) -> Product {
    let now = Utc::now();

    let base_price = 300 + ((seed * 37) % 4000) as i64;
    let sell_price = base_price * pct / 100;
    // buy-in at roughly half
    let buy_price = sell_price * (45 + (seed % 15) as i64) / 100;

    Product {
        id: Uuid::new_v4().to_string(),
        store_id: STORE_ID.to_string(),
        display_name: format!("{} [{}]", name, condition),
        sell_price,
        buy_price,
        stock_number: 0,
        infinite_stock: seed % 7 == 6,
        genre_id: Some(genre.to_lowercase()),
        category_id: Some(format!("{}-{}", genre.to_lowercase(), condition.to_lowercase())),
        consignment_client_id: None,
        average_wholesale_price: None,
        minimum_wholesale_price: None,
        maximum_wholesale_price: None,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}
