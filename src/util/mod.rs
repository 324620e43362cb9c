pub mod rate_limit;
pub mod room_code;
pub mod time;
