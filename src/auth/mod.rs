pub mod password;
pub mod session;

pub use password::{hash_password, verify_password};
pub use session::{end_session, start_session, CurrentCustomer, SESSION_COOKIE};
