//! WSAA authentication: ticket request, CMS signing, `loginCms`, and the
//! ticket cache in front of them.
pub mod cache;
pub mod client;
pub mod provider;
pub mod request;
pub mod sign;
pub mod ticket;

pub use cache::{Clock, ManualClock, SystemClock, TicketCache};
pub use client::TicketClient;
pub use provider::{AuthParams, AuthorizationTicketProvider};
pub use request::TicketRequest;
pub use sign::{CmsSigner, Credentials, SigningError};
pub use ticket::AuthorizationTicket;
