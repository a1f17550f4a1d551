//! Blockchain SDK access.

mod mock;
mod profile;
mod traits;

pub use mock::MockSdk;
pub use profile::{
    admin_identity, node_endpoint, node_profile_name, orderer_endpoint, NodeProfile, ADMIN_CERT_KEY, ADMIN_KEY_KEY,
    CA_CERT_KEY, PROFILE_KEY,
};
pub use traits::*;
