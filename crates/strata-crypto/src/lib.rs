//! strata-crypto: client-side encryption for strata vaults
//!
//! Every remote object is `header ‖ body`; neither part is readable without
//! the vault password.
//!
//! Key hierarchy:
//! ```text
//! Master Key (256-bit, Argon2id from password + vault salt)
//!   ├── Registry Key  (HKDF, info="strata-registry")  sealed registry blobs
//!   ├── Header Key    (HKDF, info="strata-header")    chunk headers
//!   ├── Verifier Key  (HKDF, info="strata-verifier")  password check value
//!   └── Chunk Key     (HKDF, info="strata-chunk" ‖ file_id)
//!         └── Chunk AEAD: XChaCha20-Poly1305 (nonce=random_192bit,
//!             AAD=file_id ‖ index ‖ chunk_count)
//! ```

pub mod blob;
pub mod chunk;
pub mod header;
pub mod kdf;
pub mod keys;
pub mod verifier;

pub use blob::{open_blob, peek_blob_vault_id, seal_blob};
pub use chunk::{decrypt_chunk, encrypt_chunk, encrypted_body_size};
pub use header::{ChunkHeader, HEADER_LEN};
pub use kdf::{derive_master_key, generate_salt, MasterKey};
pub use keys::{DerivedKey, KeyRing};
pub use verifier::{compute_verifier, verify};

/// Size of a master key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a vault salt
pub const SALT_SIZE: usize = 16;

/// Size of a binary file or vault id (UUID bytes)
pub const ID_SIZE: usize = 16;
