// Tables of the system database

diesel::table! {
    admins (email) {
        email -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    user_profiles (email) {
        email -> Text,
        username -> Text,
        auth_provider -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    directories (id) {
        id -> Text,
        name -> Text,
        description -> Nullable<Text>,
        storage_ref -> Text,
        sheet_id -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    directory_owners (directory_id, user_email) {
        directory_id -> Text,
        user_email -> Text,
        role -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    moderators (id) {
        id -> BigInt,
        user_email -> Text,
        username -> Text,
        auth_provider -> Text,
        directory_id -> Text,
        appointed_by -> Text,
        appointed_by_type -> Text,
        is_active -> Bool,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    moderator_domains (moderator_email, directory_id) {
        moderator_email -> Text,
        directory_id -> Text,
        row_filter_json -> Text,
        can_edit -> Bool,
        can_approve -> Bool,
        requires_approval -> Bool,
        updated_at -> Text,
    }
}

diesel::table! {
    moderator_hierarchy (parent_email, child_email, directory_id) {
        parent_email -> Text,
        child_email -> Text,
        directory_id -> Text,
        created_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    admins,
    user_profiles,
    directories,
    directory_owners,
    moderators,
    moderator_domains,
    moderator_hierarchy,
);

// Tables of each directory database

diesel::table! {
    directory_schema (id) {
        id -> Integer,
        columns_json -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    directory_rows (id) {
        id -> BigInt,
        data -> Text,
    }
}

diesel::table! {
    pending_changes (id) {
        id -> BigInt,
        directory_id -> Text,
        row_id -> BigInt,
        column_name -> Text,
        old_value -> Text,
        new_value -> Text,
        change_type -> Text,
        submitted_by -> Text,
        status -> Text,
        reviewed_by -> Nullable<Text>,
        reviewed_at -> Nullable<Text>,
        reason -> Nullable<Text>,
        column_schema_json -> Text,
        submitted_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(directory_schema, directory_rows, pending_changes,);
