// @generated-by-hand to match the Diesel CLI convention used across this
// codebase. Keep in sync with migrations/ if the CLI is ever pointed at a
// live database.

use diesel::sql_types::*;
use pgvector::sql_types::Vector;

diesel::table! {
    use diesel::sql_types::*;

    users (id) {
        id -> Uuid,
        user_id -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    sessions (id) {
        id -> Uuid,
        session_id -> Text,
        project_id -> Uuid,
        user_id -> Nullable<Text>,
        metadata -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
        ended_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    messages (sequence_id) {
        sequence_id -> Int8,
        id -> Uuid,
        session_id -> Uuid,
        role -> Text,
        role_type -> Text,
        content -> Text,
        token_count -> Int4,
        metadata -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    summary (id) {
        id -> Uuid,
        session_id -> Uuid,
        content -> Text,
        token_count -> Int4,
        summary_point_uuid -> Uuid,
        metadata -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    use diesel::sql_types::*;
    use pgvector::sql_types::Vector;

    message_embedding (id) {
        id -> Uuid,
        session_id -> Uuid,
        message_uuid -> Uuid,
        embedding -> Vector,
        is_embedded -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(messages -> sessions (session_id));
diesel::joinable!(summary -> sessions (session_id));
diesel::joinable!(message_embedding -> sessions (session_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    sessions,
    messages,
    summary,
    message_embedding,
);
