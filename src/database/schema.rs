// Defines database schema for diesel to use. Mirrors migrations/*/up.sql.

pub mod sql_types {
    #[derive(diesel::query_builder::QueryId, diesel::sql_types::SqlType)]
    #[diesel(postgres_type(name = "subscription_status"))]
    pub struct SubscriptionStatus;

    #[derive(diesel::query_builder::QueryId, diesel::sql_types::SqlType)]
    #[diesel(postgres_type(name = "billing_interval"))]
    pub struct BillingInterval;
}

diesel::table! {
    customers (id) {
        id -> Uuid,
        email -> Text,
        name -> Text,
        company_name -> Text,
        phone -> Nullable<Text>,
        industry -> Nullable<Text>,
        website -> Nullable<Text>,
        stripe_customer_id -> Nullable<Text>,
        password_hash -> Text,
        onboarding_step -> Int4,
        onboarding_completed -> Bool,
        selected_plan_id -> Nullable<Text>,
        brand_color -> Nullable<Text>,
        widget_title -> Nullable<Text>,
        logo_url -> Nullable<Text>,
        trial_ends_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;
    use super::sql_types::BillingInterval;

    plans (id) {
        id -> Text,
        name -> Text,
        description -> Text,
        price_cents -> Int8,
        interval -> BillingInterval,
        stripe_price_id -> Text,
        features -> Array<Text>,
        sort_order -> Int4,
    }
}

diesel::table! {
    use diesel::sql_types::*;
    use super::sql_types::SubscriptionStatus;

    subscriptions (id) {
        id -> Uuid,
        customer_id -> Uuid,
        plan_id -> Text,
        status -> SubscriptionStatus,
        stripe_subscription_id -> Nullable<Text>,
        stripe_checkout_session_id -> Nullable<Text>,
        current_period_start -> Nullable<Timestamptz>,
        current_period_end -> Nullable<Timestamptz>,
        cancel_at_period_end -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    subscription_links (id) {
        id -> Uuid,
        token -> Text,
        customer_id -> Uuid,
        plan_id -> Text,
        expires_at -> Timestamptz,
        is_used -> Bool,
        used_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;
    use super::sql_types::BillingInterval;

    service_plans (id) {
        id -> Uuid,
        customer_id -> Uuid,
        name -> Text,
        description -> Nullable<Text>,
        price_cents -> Int8,
        interval -> BillingInterval,
        features -> Array<Text>,
        is_active -> Bool,
        sort_order -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    sessions (token) {
        token -> Text,
        customer_id -> Uuid,
        expires_at -> Timestamptz,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    webhook_events (id) {
        id -> Text,
        event_type -> Text,
        received_at -> Timestamptz,
    }
}

diesel::joinable!(subscriptions -> customers (customer_id));
diesel::joinable!(subscriptions -> plans (plan_id));
diesel::joinable!(subscription_links -> customers (customer_id));
diesel::joinable!(service_plans -> customers (customer_id));
diesel::joinable!(sessions -> customers (customer_id));

diesel::allow_tables_to_appear_in_same_query!(
    customers,
    plans,
    subscriptions,
    subscription_links,
    service_plans,
    sessions,
    webhook_events,
);
