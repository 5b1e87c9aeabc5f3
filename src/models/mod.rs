pub mod booking;
pub mod payment;
pub mod seat;

pub use booking::{
    BookingSubmission, BusId, Gender, PassengerDraft, PassengerRecord, PendingBookingContext,
    Receipt, TripDetails,
};
pub use payment::{BookingPhase, CallbackParams, PaymentHandoff};
pub use seat::{BusConfig, Seat, SeatLayout, SeatStatus, SelectionState};
