pub mod dilithium;
pub mod hash;
pub mod keypair;

pub use dilithium::{sign, verify_signature, SignatureError};
pub use hash::blake3_hash;
pub use keypair::ServiceKey;
