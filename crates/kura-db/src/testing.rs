//! Fixtures shared by the repository tests.

use chrono::{Duration, Utc};
use kura_core::stock::{StockSource, WholesaleRecord};
use kura_core::{
    Actor, Payment, PaymentMethod, PaymentMode, Product, ReceptionStatus, Register, Reservation,
    ReservationReception, ReservationStatus, SalesChannel, SetDeal, SetDealDiscountKind,
    SetDealProduct, SetDealStatus, TaxMode, Transaction, TransactionKind, TransactionStatus,
};

use crate::repository::stock::StockMove;
use crate::Database;

pub fn actor() -> Actor {
    Actor::staff("staff-1")
}

pub fn product(id: &str, stock_number: i64) -> Product {
    let now = Utc::now();
    Product {
        id: id.to_string(),
        store_id: "s-1".to_string(),
        display_name: format!("Product {id}"),
        sell_price: 1000,
        buy_price: 500,
        stock_number,
        infinite_stock: false,
        genre_id: None,
        category_id: None,
        consignment_client_id: None,
        average_wholesale_price: None,
        minimum_wholesale_price: None,
        maximum_wholesale_price: None,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

/// Manual increase of `count` units.
pub fn increase(product_id: &str, count: i64) -> StockMove {
    StockMove::new(
        product_id,
        count,
        StockSource::Adjustment {
            adjustment_id: None,
        },
        &actor(),
    )
}

/// Inserts a product and stocks `count` units at `unit_cost` through the ledger.
pub async fn seed_product(db: &Database, id: &str, count: i64, unit_cost: i64) {
    let mut uow = db.begin().await.unwrap();
    uow.products().insert(&product(id, 0)).await.unwrap();
    if count > 0 {
        uow.stock()
            .increase(&increase(id, count), &[WholesaleRecord::new(unit_cost, count)])
            .await
            .unwrap();
    }
    uow.commit().await.unwrap();
}

pub fn register(id: &str, terminal_device_id: Option<&str>) -> Register {
    Register {
        id: id.to_string(),
        store_id: "s-1".to_string(),
        display_name: format!("Register {id}"),
        cash_balance: 0,
        terminal_device_id: terminal_device_id.map(str::to_string),
        created_at: Utc::now(),
    }
}

pub fn reservation(id: &str, product_id: &str, deposit_price: i64, status: ReservationStatus) -> Reservation {
    Reservation {
        id: id.to_string(),
        store_id: "s-1".to_string(),
        product_id: product_id.to_string(),
        display_name: format!("Reservation {id}"),
        deposit_price,
        limit_count: 10,
        status,
        created_at: Utc::now(),
    }
}

pub fn reception(
    id: &str,
    reservation_id: &str,
    customer_id: &str,
    item_count: i64,
    status: ReceptionStatus,
) -> ReservationReception {
    ReservationReception {
        id: id.to_string(),
        reservation_id: reservation_id.to_string(),
        customer_id: customer_id.to_string(),
        item_count,
        status,
        updated_at: Utc::now(),
    }
}

pub fn set_deal(id: &str, products: &[(&str, i64)]) -> (SetDeal, Vec<SetDealProduct>) {
    let deal = SetDeal {
        id: id.to_string(),
        store_id: "s-1".to_string(),
        display_name: format!("Deal {id}"),
        discount_kind: SetDealDiscountKind::Fixed,
        discount_amount: -100,
        status: SetDealStatus::Published,
        start_at: Utc::now() - Duration::days(1),
        expire_at: None,
    };
    let products = products
        .iter()
        .map(|(product_id, item_count)| SetDealProduct {
            set_deal_id: id.to_string(),
            product_id: product_id.to_string(),
            item_count: *item_count,
        })
        .collect();
    (deal, products)
}

pub fn draft_transaction(id: &str, total_price: i64) -> Transaction {
    let now = Utc::now();
    Transaction {
        id: id.to_string(),
        store_id: "s-1".to_string(),
        kind: TransactionKind::Sell,
        status: TransactionStatus::Draft,
        payment_method: PaymentMethod::Cash,
        channel: SalesChannel::Register,
        tax_mode: TaxMode::Inclusive,
        tax_rate_bps: 0,
        subtotal_price: total_price,
        discount_price: 0,
        set_deal_discount_price: 0,
        point_discount_price: 0,
        tax_price: 0,
        included_tax_price: 0,
        total_price,
        total_reservation_price: 0,
        total_consignment_sale_price: 0,
        total_consignment_commission_price: 0,
        point_amount: 0,
        total_point_amount: 0,
        used_point: 0,
        customer_id: None,
        original_transaction_id: None,
        is_return: false,
        register_id: None,
        terminal_checkout_id: None,
        staff_id: "staff-1".to_string(),
        created_at: now,
        updated_at: now,
        finished_at: None,
    }
}

pub fn payment(id: &str, transaction_id: &str, total_amount: i64) -> Payment {
    Payment {
        id: id.to_string(),
        transaction_id: transaction_id.to_string(),
        mode: PaymentMode::Pay,
        method: PaymentMethod::Cash,
        total_amount,
        cash_received: Some(total_amount),
        cash_change: Some(0),
        cash_portion: None,
        terminal_checkout_id: None,
        external_refund_id: None,
        created_at: Utc::now(),
    }
}
