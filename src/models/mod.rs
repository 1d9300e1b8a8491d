//! Data models for circulation

pub mod copy;
pub mod enums;
pub mod loan;
pub mod member;
pub mod pagination;
pub mod reservation;

// Re-export commonly used types
pub use copy::{Availability, BookCopy, CopyFilter, CopyQuery};
pub use enums::{AccountStatus, CopyStatus, LoanStatus, ReservationStatus, Role};
pub use loan::{Loan, NewLoan};
pub use member::Member;
pub use pagination::Pagination;
pub use reservation::{NewReservation, Reservation};
