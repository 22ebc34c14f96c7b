//! Hard caps that keep one tenant from exhausting the process.

pub const MAX_PROVIDERS_PER_TENANT: usize = 10_000;
pub const MAX_SERVICES_PER_TENANT: usize = 100_000;
pub const MAX_CLIENTS_PER_TENANT: usize = 1_000_000;
pub const MAX_BOOKINGS_PER_DAY: usize = 1_440;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_SERVICE_DURATION_MIN: i32 = 24 * 60;
pub const MAX_PRICE: i64 = 100_000_000_000;
pub const MAX_TENANTS: usize = 1_000;
pub const MAX_TENANT_NAME_LEN: usize = 128;
