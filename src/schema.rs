// Must match `migrations/`. Regenerate with `diesel print-schema`.

diesel::table! {
    users (id) {
        id -> Int4,
        name -> Varchar,
        email -> Varchar,
        password_hash -> Varchar,
        phone -> Nullable<Varchar>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    admins (id) {
        id -> Uuid,
        name -> Varchar,
        email -> Varchar,
        password_hash -> Varchar,
        phone -> Nullable<Varchar>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    barbers (id) {
        id -> Int4,
        name -> Varchar,
        age -> Int4,
        hire_date -> Date,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    specialties (id) {
        id -> Int4,
        name -> Varchar,
        description -> Nullable<Text>,
        price -> Float8,
        duration -> Int4,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    barber_specialties (barber_id, specialty_id) {
        barber_id -> Int4,
        specialty_id -> Int4,
    }
}

diesel::table! {
    appointments (id) {
        id -> Int4,
        user_id -> Int4,
        barber_id -> Int4,
        specialty_id -> Int4,
        appointment_date -> Date,
        appointment_time -> Varchar,
        status -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(appointments -> users (user_id));
diesel::joinable!(appointments -> barbers (barber_id));
diesel::joinable!(appointments -> specialties (specialty_id));
diesel::joinable!(barber_specialties -> barbers (barber_id));
diesel::joinable!(barber_specialties -> specialties (specialty_id));

diesel::allow_tables_to_appear_in_same_query!(
    admins,
    appointments,
    barber_specialties,
    barbers,
    specialties,
    users,
);
