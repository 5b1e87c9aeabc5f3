pub mod api_client;
pub mod availability;
pub mod cleanup;
pub mod debounce;
pub mod normalize;
pub mod payload;
pub mod payment;
pub mod seat_session;
pub mod selection;
pub mod session;
