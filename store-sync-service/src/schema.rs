diesel::table! {
    stores (id) {
        id -> Int8,
        name -> Varchar,
        is_active -> Bool,
        last_inventory_sync_at -> Timestamptz,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    products (id) {
        id -> Int8,
        name -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    product_sizes (id) {
        id -> Int8,
        product_id -> Int8,
        name -> Varchar,
        base_price -> Numeric,
        additives_updated_at -> Timestamptz,
        provisions_updated_at -> Timestamptz,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    ingredients (id) {
        id -> Int8,
        name -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    provisions (id) {
        id -> Int8,
        name -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    additives (id) {
        id -> Int8,
        name -> Varchar,
        base_price -> Numeric,
        ingredients_updated_at -> Timestamptz,
        provisions_updated_at -> Timestamptz,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    product_size_ingredients (id) {
        id -> Int8,
        product_size_id -> Int8,
        ingredient_id -> Int8,
        quantity -> Numeric,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    product_size_additives (id) {
        id -> Int8,
        product_size_id -> Int8,
        additive_id -> Int8,
        is_default -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    product_size_provisions (id) {
        id -> Int8,
        product_size_id -> Int8,
        provision_id -> Int8,
        volume -> Numeric,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    additive_ingredients (id) {
        id -> Int8,
        additive_id -> Int8,
        ingredient_id -> Int8,
        quantity -> Numeric,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    additive_provisions (id) {
        id -> Int8,
        additive_id -> Int8,
        provision_id -> Int8,
        volume -> Numeric,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    store_products (id) {
        id -> Int8,
        store_id -> Int8,
        product_id -> Int8,
        is_available -> Bool,
        is_out_of_stock -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    store_product_sizes (id) {
        id -> Int8,
        store_product_id -> Int8,
        product_size_id -> Int8,
        store_price -> Nullable<Numeric>,
        is_out_of_stock -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    store_additives (id) {
        id -> Int8,
        store_id -> Int8,
        additive_id -> Int8,
        store_price -> Numeric,
        is_out_of_stock -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    store_stocks (id) {
        id -> Int8,
        store_id -> Int8,
        ingredient_id -> Int8,
        quantity -> Numeric,
        low_stock_threshold -> Nullable<Numeric>,
        is_out_of_stock -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    stores,
    products,
    product_sizes,
    ingredients,
    provisions,
    additives,
    product_size_ingredients,
    product_size_additives,
    product_size_provisions,
    additive_ingredients,
    additive_provisions,
    store_products,
    store_product_sizes,
    store_additives,
    store_stocks,
);
