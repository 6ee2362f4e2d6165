//! Esquema Diesel de las tablas de metadatos. Las tablas replicadas son
//! dinámicas y se manejan con SQL generado por el planificador.

diesel::table! {
    service_integrations (id) {
        id -> BigInt,
        opaque_id -> Text,
        organization_id -> BigInt,
        service_name -> Text,
        table_name -> Text,
        webhook_secret -> Nullable<Text>,
        backfill_key -> Nullable<Text>,
        backfill_secret -> Nullable<Text>,
        api_url -> Nullable<Text>,
        depends_on -> Nullable<BigInt>,
        last_backfilled_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    backfill_jobs (id) {
        id -> Uuid,
        service_integration_id -> BigInt,
        parent_job_id -> Nullable<Uuid>,
        incremental -> Bool,
        recursive -> Bool,
        criteria -> Jsonb,
        status -> Text,
        failure_reason -> Nullable<Text>,
        pages_fetched -> BigInt,
        items_upserted -> BigInt,
        created_at -> Timestamptz,
        started_at -> Nullable<Timestamptz>,
        finished_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    published_events (seq) {
        seq -> BigInt,
        name -> Text,
        payload -> Jsonb,
        ts -> Timestamptz,
    }
}

diesel::joinable!(backfill_jobs -> service_integrations (service_integration_id));

diesel::allow_tables_to_appear_in_same_query!(service_integrations, backfill_jobs, published_events,);
