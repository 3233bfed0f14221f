diesel::table! {
    orders (order_id) {
        order_id -> Uuid,
        customer_id -> Varchar,
        items -> Jsonb,
        total_amount -> Numeric,
        status -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    processed_events (event_id) {
        event_id -> Uuid,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    idempotency_responses (idempotency_key) {
        idempotency_key -> Varchar,
        status_code -> Int4,
        response -> Jsonb,
        created_at -> Timestamptz,
        expires_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    orders,
    processed_events,
    idempotency_responses,
);
