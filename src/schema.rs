//! Handwritten Diesel schema declarations matching `migrations/`.
//!
//! Kept by hand so the row structs in `db::models` can derive
//! Queryable/Insertable without running `diesel print-schema`.

diesel::table! {
    actuator_states (actuator_id) {
        actuator_id -> Text,
        actuator_name -> Nullable<Text>,
        mode -> Integer,
        aperture -> Integer,
        behavior -> Nullable<Text>,
        full_travel_secs -> Nullable<Double>,
        group_no -> Nullable<Integer>,
        memo -> Nullable<Text>,
        created -> Timestamptz,
        version -> BigInt,
    }
}

diesel::table! {
    actuator_lines (actuator_id, role) {
        actuator_id -> Text,
        role -> Text,
        line_no -> Integer,
    }
}

// pattern_id: 0 temperature, 1 light, 2 time of day
diesel::table! {
    control_curves (actuator_id, pattern_id) {
        actuator_id -> Text,
        pattern_id -> Integer,
        priority -> Nullable<Integer>,
        first_stage -> Nullable<Double>,
        first_value -> Nullable<Double>,
        second_stage -> Nullable<Double>,
        second_value -> Nullable<Double>,
        third_stage -> Nullable<Double>,
        third_value -> Nullable<Double>,
        fourth_stage -> Nullable<Double>,
        fourth_value -> Nullable<Double>,
        fifth_stage -> Nullable<Double>,
        fifth_value -> Nullable<Double>,
        daytime_start -> Nullable<Text>,
        daytime_end -> Nullable<Text>,
        daytime_value -> Nullable<Double>,
        night_start -> Nullable<Text>,
        night_end -> Nullable<Text>,
        night_value -> Nullable<Double>,
        modified -> Timestamptz,
    }
}

diesel::table! {
    environment_values (id) {
        id -> BigInt,
        temperature -> Nullable<Double>,
        humidity -> Nullable<Double>,
        moisture -> Nullable<Double>,
        lux -> Nullable<Double>,
        updated -> Nullable<Timestamp>,
    }
}

diesel::table! {
    irrigation_schedule (actuator_id, start_time) {
        actuator_id -> Text,
        start_time -> Text,
        permission -> Bool,
        line_no -> Nullable<Integer>,
        irrigation_time -> Double,
        created -> Timestamptz,
        modified -> Timestamptz,
    }
}

diesel::joinable!(actuator_lines -> actuator_states (actuator_id));
diesel::joinable!(control_curves -> actuator_states (actuator_id));
diesel::joinable!(irrigation_schedule -> actuator_states (actuator_id));

diesel::allow_tables_to_appear_in_same_query!(
    actuator_states,
    actuator_lines,
    control_curves,
    environment_values,
    irrigation_schedule,
);
