pub mod token;
pub mod transport;

pub use token::{OAuthCredentials, OAuthTokenProvider};
pub use transport::ReqwestTransport;
