table! {
    command (slug) {
        slug -> Text,
        title -> Text,
        description -> Nullable<Text>,
        command_to_run -> Text,
        created_date -> Timestamp,
        updated_date -> Timestamp,
    }
}

table! {
    run (id) {
        id -> Integer,
        command_slug -> Text,
        command_run -> Text,
        status -> Text,
        output -> Nullable<Text>,
        created_date -> Timestamp,
        updated_date -> Timestamp,
    }
}

joinable!(run -> command (command_slug));
allow_tables_to_appear_in_same_query!(command, run);
