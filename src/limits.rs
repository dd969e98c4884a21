/// Reservations held by a single (category, date) scope.
pub const MAX_RESERVATIONS_PER_SCOPE: usize = 500;

/// Generic records stored per resource kind.
pub const MAX_RECORDS_PER_KIND: usize = 10_000;

/// Title, location, booker name and apartment.
pub const MAX_TEXT_LEN: usize = 200;

/// Serialized JSON body of a generic record.
pub const MAX_RECORD_BYTES: usize = 64 * 1024;
