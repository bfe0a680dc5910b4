use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::stores)]
pub struct Store {
    pub id: i64,
    pub name: String,
    pub is_active: bool,
    pub last_inventory_sync_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::store_stocks)]
pub struct StoreStock {
    pub id: i64,
    pub store_id: i64,
    pub ingredient_id: i64,
    pub quantity: BigDecimal,
    pub low_stock_threshold: Option<BigDecimal>,
    pub is_out_of_stock: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = crate::schema::store_stocks)]
pub struct NewStoreStock {
    pub store_id: i64,
    pub ingredient_id: i64,
    pub quantity: BigDecimal,
    pub low_stock_threshold: Option<BigDecimal>,
    pub is_out_of_stock: bool,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::store_additives)]
pub struct StoreAdditive {
    pub id: i64,
    pub store_id: i64,
    pub additive_id: i64,
    pub store_price: BigDecimal,
    pub is_out_of_stock: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = crate::schema::store_additives)]
pub struct NewStoreAdditive {
    pub store_id: i64,
    pub additive_id: i64,
    pub store_price: BigDecimal,
    pub is_out_of_stock: bool,
}

/// One ingredient a store-local row needs in order to be sellable.
///
/// `owner_id` is the store product size or store additive the requirement
/// belongs to.
#[derive(Debug, Clone, PartialEq, Queryable)]
pub struct Requirement {
    pub owner_id: i64,
    pub ingredient_id: i64,
    pub quantity: BigDecimal,
}
